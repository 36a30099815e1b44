//! # `DropPath` - stochastic depth.
//!
//! Drops whole residual branches per sample, on autodiff backends only.
//!
//! See: [Deep Networks with Stochastic Depth](https://arxiv.org/abs/1603.09382)
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;

/// Asserts that the given probability is within ``[0, 1]``.
#[inline(always)]
pub fn expect_probability(prob: f64) -> f64 {
    assert!(
        (0.0..=1.0).contains(&prob),
        "Probability should be between 0 and 1, but got {prob}"
    );
    prob
}

/// Drop path (stochastic depth) on a batch.
///
/// # Arguments
///
/// - `x`: Input tensor, ``[batch, ...]``.
/// - `drop_prob`: Probability of dropping a sample's path.
/// - `training`: Whether the model is in training mode.
/// - `scale_by_keep`: Whether to scale kept samples by ``1 / (1 - drop_prob)``.
///
/// # Returns
///
/// A tensor of the same shape as the input.
#[must_use]
pub fn drop_path<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    drop_prob: f64,
    training: bool,
    scale_by_keep: bool,
) -> Tensor<B, D> {
    drop_path_with_sampler(
        x,
        drop_prob,
        training,
        scale_by_keep,
        |shape, keep_prob, device| {
            Tensor::<B, D>::random(shape, Distribution::Bernoulli(keep_prob), device)
        },
    )
}

/// Drop path, with an explicit keep-mask sampler.
#[inline(always)]
#[must_use]
fn drop_path_with_sampler<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    drop_prob: f64,
    training: bool,
    scale_by_keep: bool,
    sample: impl FnOnce([usize; D], f64, &B::Device) -> Tensor<B, D>,
) -> Tensor<B, D> {
    expect_probability(drop_prob);

    if !training || drop_prob == 0.0 {
        return x;
    }

    let keep_prob = 1.0 - drop_prob;

    let mut shape = [1; D];
    shape[0] = x.dims()[0];

    let mask = sample(shape, keep_prob, &x.device());

    let mask = if keep_prob > 0.0 && scale_by_keep {
        mask.div_scalar(keep_prob)
    } else {
        mask
    };

    x * mask
}

/// [`DropPath`] Meta API.
pub trait DropPathMeta {
    /// The drop probability.
    fn drop_prob(&self) -> f64;

    /// The keep probability.
    fn keep_prob(&self) -> f64 {
        1.0 - self.drop_prob()
    }

    /// Whether kept paths are rescaled.
    fn scale_by_keep(&self) -> bool;
}

/// [`DropPath`] Config.
#[derive(Config, Debug)]
pub struct DropPathConfig {
    /// The drop probability.
    #[config(default = 0.0)]
    pub drop_prob: f64,

    /// Whether kept paths are rescaled.
    #[config(default = true)]
    pub scale_by_keep: bool,
}

impl DropPathMeta for DropPathConfig {
    fn drop_prob(&self) -> f64 {
        self.drop_prob
    }

    fn scale_by_keep(&self) -> bool {
        self.scale_by_keep
    }
}

impl DropPathConfig {
    /// Initialize a [`DropPath`] module.
    #[must_use]
    pub fn init(&self) -> DropPath {
        DropPath {
            drop_prob: expect_probability(self.drop_prob),
            scale_by_keep: self.scale_by_keep,
        }
    }
}

/// Stochastic depth module.
///
/// Active only when the backend has autodiff enabled.
#[derive(Module, Clone, Debug)]
pub struct DropPath {
    /// The drop probability.
    pub drop_prob: f64,

    /// Whether kept paths are rescaled.
    pub scale_by_keep: bool,
}

impl DropPathMeta for DropPath {
    fn drop_prob(&self) -> f64 {
        self.drop_prob
    }

    fn scale_by_keep(&self) -> bool {
        self.scale_by_keep
    }
}

impl DropPath {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, ...]``
    ///
    /// # Returns
    ///
    /// ``[batch, ...]``
    #[must_use]
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        drop_path(input, self.drop_prob, B::ad_enabled(), self.scale_by_keep)
    }

    /// Residual application: ``x + drop_path(f(x))``.
    #[inline]
    #[must_use]
    pub fn with_skip<B: Backend, const D: usize, F>(
        &self,
        x: Tensor<B, D>,
        f: F,
    ) -> Tensor<B, D>
    where
        F: FnOnce(Tensor<B, D>) -> Tensor<B, D>,
    {
        x.clone() + self.forward(f(x))
    }
}
