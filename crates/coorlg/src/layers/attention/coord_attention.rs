//! # Coordinate Attention
//!
//! Factorizes channel attention into two 1d encodings, one along each
//! spatial axis, and gates the input with both.
//!
//! See: [Coordinate Attention for Efficient Mobile Network Design](https://arxiv.org/abs/2103.02907)

use crate::compat::activation_wrapper::ActivationConfig;
use crate::layers::blocks::cna::{CNA2d, CNA2dConfig, CNA2dMeta};
use crate::layers::init::init_conv2d;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::sigmoid;

/// [`CoordAttention`] Meta API.
pub trait CoordAttentionMeta {
    /// Input (and output) channels.
    fn channels(&self) -> usize;

    /// Width of the shared axis encoding.
    fn mip(&self) -> usize;
}

/// [`CoordAttention`] Config.
#[derive(Config, Debug)]
pub struct CoordAttentionConfig {
    /// Input (and output) channels.
    pub channels: usize,

    /// Channel reduction of the shared encoding.
    #[config(default = 32)]
    pub reduction: usize,

    /// Lower bound on the shared encoding width.
    #[config(default = 8)]
    pub min_mip: usize,
}

impl CoordAttentionMeta for CoordAttentionConfig {
    fn channels(&self) -> usize {
        self.channels
    }

    fn mip(&self) -> usize {
        self.min_mip.max(self.channels / self.reduction)
    }
}

impl CoordAttentionConfig {
    /// Initialize a [`CoordAttention`] module.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> CoordAttention<B> {
        let channels = self.channels();
        let mip = self.mip();

        let encode = CNA2dConfig::new(Conv2dConfig::new([channels, mip], [1, 1]))
            .with_act(ActivationConfig::HardSwish)
            .init(device);

        CoordAttention {
            encode,
            gate_h: init_conv2d(Conv2dConfig::new([mip, channels], [1, 1]), device),
            gate_w: init_conv2d(Conv2dConfig::new([mip, channels], [1, 1]), device),
        }
    }
}

/// Coordinate attention module.
#[derive(Module, Debug)]
pub struct CoordAttention<B: Backend> {
    /// Shared ``conv -> norm -> hard-swish`` axis encoder.
    pub encode: CNA2d<B>,

    /// Height gate projection.
    pub gate_h: Conv2d<B>,

    /// Width gate projection.
    pub gate_w: Conv2d<B>,
}

impl<B: Backend> CoordAttentionMeta for CoordAttention<B> {
    fn channels(&self) -> usize {
        self.encode.in_channels()
    }

    fn mip(&self) -> usize {
        self.encode.out_channels()
    }
}

impl<B: Backend> CoordAttention<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, channels, height, width]``
    ///
    /// # Returns
    ///
    /// ``[batch, channels, height, width]``
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &x,
            &["height", "width"],
            &[("channels", self.channels())]
        );

        // [b, c, h, 1] and [b, c, w, 1]
        let pool_h = x.clone().mean_dim(3);
        let pool_w = x.clone().mean_dim(2).swap_dims(2, 3);

        let y = self.encode.forward(Tensor::cat(vec![pool_h, pool_w], 2));

        let y_h = y.clone().narrow(2, 0, height);
        let y_w = y.narrow(2, height, width).swap_dims(2, 3);

        let a_h = sigmoid(self.gate_h.forward(y_h));
        let a_w = sigmoid(self.gate_w.forward(y_w));

        let out = x * a_w * a_h;

        assert_shape_contract_periodically!(
            ["batch", "channels", "height", "width"],
            &out,
            &[
                ("channels", self.channels()),
                ("height", height),
                ("width", width)
            ]
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_config() {
        let config = CoordAttentionConfig::new(64);
        assert_eq!(config.channels(), 64);
        assert_eq!(config.mip(), 8);

        let config = CoordAttentionConfig::new(512);
        assert_eq!(config.mip(), 16);
    }

    #[test]
    fn test_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let module: CoordAttention<B> = CoordAttentionConfig::new(16).init(&device);
        assert_eq!(module.channels(), 16);
        assert_eq!(module.mip(), 8);

        let x = Tensor::<B, 4>::random([2, 16, 5, 7], Distribution::Default, &device);
        let out = module.forward(x.clone());

        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &out,
            &[
                ("batch", 2),
                ("channels", 16),
                ("height", 5),
                ("width", 7)
            ]
        );

        // Gates are in (0, 1); they only ever shrink the input.
        let excess = (out.abs() - x.abs()).max().into_scalar();
        assert!(excess <= 1e-6, "excess: {excess}");
    }

    #[test]
    fn test_forward_autodiff() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let module: CoordAttention<B> = CoordAttentionConfig::new(8).init(&device);
        let x = Tensor::<B, 4>::random([3, 8, 4, 4], Distribution::Default, &device);
        assert_eq!(module.forward(x).dims(), [3, 8, 4, 4]);
    }
}
