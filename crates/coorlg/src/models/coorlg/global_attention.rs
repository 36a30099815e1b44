//! # Global spatial-reduction attention
//!
//! Every token attends to a spatially reduced copy of the whole map:
//! keys and values come from a grouped ``sr_ratio x sr_ratio`` strided
//! conv of the tokens, so the attention is ``N x M`` with
//! ``M = (H / sr) * (W / sr)``.
//!
//! A learned positional tensor ``[heads, N, M]``, owned by the stage,
//! is added to the scaled logits.

use crate::layers::blocks::conv_norm::{Conv2dNormBlock, Conv2dNormBlockConfig};
use crate::layers::drop::drop_path::expect_probability;
use crate::layers::init::init_linear;
use bimm_contracts::{assert_shape_contract, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::Conv2dConfig;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::softmax;

/// [`GlobalAttention`] Meta API.
pub trait GlobalAttentionMeta {
    /// Input/output feature size.
    fn d_input(&self) -> usize;

    /// Number of attention heads.
    fn num_heads(&self) -> usize;

    /// The query/key feature size.
    fn qk_dim(&self) -> usize;

    /// Spatial reduction ratio of the keys / values.
    fn sr_ratio(&self) -> usize;

    /// The logit scale.
    fn scale(&self) -> f64;

    /// The number of key/value tokens for a given token resolution.
    ///
    /// # Panics
    ///
    /// If the resolution is not divisible by the reduction ratio.
    fn reduced_tokens(
        &self,
        resolution: [usize; 2],
    ) -> usize {
        let [h, w] = resolution;
        let sr = self.sr_ratio();
        assert!(
            h % sr == 0 && w % sr == 0,
            "Resolution ({h}*{w}) is not divisible by sr_ratio {sr}"
        );
        (h / sr) * (w / sr)
    }
}

/// [`GlobalAttention`] Config.
#[derive(Config, Debug)]
pub struct GlobalAttentionConfig {
    /// Input/output feature size.
    pub d_input: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Enable bias on the q/k/v projections.
    #[config(default = true)]
    pub qkv_bias: bool,

    /// Override for the logit scale; defaults to ``(d_input / num_heads)^-0.5``.
    #[config(default = "None")]
    pub qk_scale: Option<f64>,

    /// Query/key feature reduction.
    #[config(default = 1)]
    pub qk_ratio: usize,

    /// Spatial reduction ratio of the keys / values.
    #[config(default = 1)]
    pub sr_ratio: usize,

    /// Dropout on attention weights.
    #[config(default = 0.0)]
    pub attn_drop: f64,

    /// Dropout on the output projection.
    #[config(default = 0.0)]
    pub proj_drop: f64,
}

impl GlobalAttentionMeta for GlobalAttentionConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn qk_dim(&self) -> usize {
        self.d_input / self.qk_ratio
    }

    fn sr_ratio(&self) -> usize {
        self.sr_ratio
    }

    fn scale(&self) -> f64 {
        self.qk_scale
            .unwrap_or_else(|| ((self.d_input / self.num_heads) as f64).powf(-0.5))
    }
}

impl GlobalAttentionConfig {
    /// Initialize a [`GlobalAttention`] module.
    ///
    /// # Panics
    ///
    /// If the head count does not divide the q/k or v feature sizes.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> GlobalAttention<B> {
        let d_input = self.d_input();
        let heads = self.num_heads();
        let qk_dim = self.qk_dim();
        assert!(
            d_input % heads == 0 && qk_dim % heads == 0,
            "num_heads ({heads}) must divide d_input ({d_input}) and qk_dim ({qk_dim})"
        );
        assert!(self.sr_ratio > 0, "sr_ratio must be positive");

        let sr = self.sr_ratio;
        let reduction = if sr > 1 {
            let config: Conv2dNormBlockConfig = Conv2dConfig::new([d_input, d_input], [sr, sr])
                .with_stride([sr, sr])
                .with_groups(d_input)
                .into();
            Some(config.init(device))
        } else {
            None
        };

        GlobalAttention {
            num_heads: heads,
            sr_ratio: sr,
            scale: self.scale(),
            q: init_linear(
                LinearConfig::new(d_input, qk_dim).with_bias(self.qkv_bias),
                device,
            ),
            k: init_linear(
                LinearConfig::new(d_input, qk_dim).with_bias(self.qkv_bias),
                device,
            ),
            v: init_linear(
                LinearConfig::new(d_input, d_input).with_bias(self.qkv_bias),
                device,
            ),
            proj: init_linear(LinearConfig::new(d_input, d_input), device),
            reduction,
            attn_drop: DropoutConfig::new(expect_probability(self.attn_drop)).init(),
            proj_drop: DropoutConfig::new(expect_probability(self.proj_drop)).init(),
        }
    }
}

/// Global spatial-reduction attention.
#[derive(Module, Debug)]
pub struct GlobalAttention<B: Backend> {
    /// Number of attention heads.
    pub num_heads: usize,

    /// Spatial reduction ratio.
    pub sr_ratio: usize,

    /// Logit scale.
    pub scale: f64,

    /// Query projection.
    pub q: Linear<B>,

    /// Key projection.
    pub k: Linear<B>,

    /// Value projection.
    pub v: Linear<B>,

    /// Output projection.
    pub proj: Linear<B>,

    /// Grouped strided reduction; present iff ``sr_ratio > 1``.
    pub reduction: Option<Conv2dNormBlock<B>>,

    /// Attention weight dropout.
    pub attn_drop: Dropout,

    /// Output dropout.
    pub proj_drop: Dropout,
}

impl<B: Backend> GlobalAttentionMeta for GlobalAttention<B> {
    fn d_input(&self) -> usize {
        self.v.weight.dims()[0]
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn qk_dim(&self) -> usize {
        self.q.weight.dims()[1]
    }

    fn sr_ratio(&self) -> usize {
        self.sr_ratio
    }

    fn scale(&self) -> f64 {
        self.scale
    }
}

impl<B: Backend> GlobalAttention<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, height * width, d_input]``
    /// - `resolution`: ``[height, width]``
    /// - `relative_pos`: ``[heads, height * width, (height/sr) * (width/sr)]``
    ///
    /// # Returns
    ///
    /// ``[batch, height * width, d_input]``
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        resolution: [usize; 2],
        relative_pos: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let [height, width] = resolution;
        let heads = self.num_heads();
        let d_input = self.d_input();

        let [batch] = unpack_shape_contract!(
            ["batch", "tokens" = "height" * "width", "d_input"],
            &x,
            &["batch"],
            &[("height", height), ("width", width), ("d_input", d_input)]
        );
        let n = height * width;
        let m = self.reduced_tokens(resolution);
        assert_shape_contract!(
            ["heads", "tokens", "reduced"],
            &relative_pos,
            &[("heads", heads), ("tokens", n), ("reduced", m)]
        );

        let qk_head = self.qk_dim() / heads;
        let v_head = d_input / heads;

        let q = self
            .q
            .forward(x.clone())
            .reshape([batch, n, heads, qk_head])
            .swap_dims(1, 2);

        let kv_source = match &self.reduction {
            Some(reduction) => {
                let x = x.swap_dims(1, 2).reshape([batch, d_input, height, width]);
                reduction.forward(x).flatten::<3>(2, 3).swap_dims(1, 2)
            }
            None => x,
        };

        let k = self
            .k
            .forward(kv_source.clone())
            .reshape([batch, m, heads, qk_head])
            .swap_dims(1, 2);
        let v = self
            .v
            .forward(kv_source)
            .reshape([batch, m, heads, v_head])
            .swap_dims(1, 2);

        // [batch, heads, n, m]
        let attn = q.matmul(k.swap_dims(2, 3)).mul_scalar(self.scale);
        let attn = attn + relative_pos.unsqueeze::<4>();
        let attn = softmax(attn, 3);
        let attn = self.attn_drop.forward(attn);

        let x = attn.matmul(v).swap_dims(1, 2).reshape([batch, n, d_input]);
        let x = self.proj.forward(x);
        self.proj_drop.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::{Distribution, Tolerance};

    #[test]
    fn test_config() {
        let config = GlobalAttentionConfig::new(64, 4).with_sr_ratio(8);
        assert_eq!(config.scale(), 0.25);
        assert_eq!(config.reduced_tokens([56, 56]), 49);

        let config = config.with_qk_scale(Some(0.5));
        assert_eq!(config.scale(), 0.5);
    }

    #[test]
    fn test_forward_reduced() {
        type B = NdArray<f32>;
        let device = Default::default();

        let module: GlobalAttention<B> = GlobalAttentionConfig::new(8, 2)
            .with_sr_ratio(2)
            .init(&device);
        assert!(module.reduction.is_some());

        let x = Tensor::<B, 3>::random([2, 24, 8], Distribution::Default, &device);
        let pos = Tensor::<B, 3>::random([2, 24, 6], Distribution::Default, &device);
        let y = module.forward(x, [4, 6], pos);

        assert_shape_contract!(
            ["batch", "tokens", "d_input"],
            &y,
            &[("batch", 2), ("tokens", 24), ("d_input", 8)]
        );
    }

    #[test]
    fn test_positional_bias_dominates() {
        type B = NdArray<f32>;
        let device = Default::default();

        let module: GlobalAttention<B> = GlobalAttentionConfig::new(6, 3).init(&device);
        assert!(module.reduction.is_none());

        let x = Tensor::<B, 3>::random([1, 9, 6], Distribution::Default, &device);

        // Every query attends to key 4.
        let pos = Tensor::<B, 3>::zeros([3, 9, 9], &device).slice_assign(
            [0..3, 0..9, 4..5],
            Tensor::<B, 3>::full([3, 9, 1], 1e4, &device),
        );
        let y = module.forward(x.clone(), [3, 3], pos);

        let token = x.slice([0..1, 4..5, 0..6]);
        let expected = module
            .proj
            .forward(module.v.forward(token))
            .repeat_dim(1, 9);

        y.to_data()
            .assert_approx_eq(&expected.to_data(), Tolerance::<f64>::default());
    }

    #[test]
    #[should_panic]
    fn test_positional_shape_mismatch() {
        type B = NdArray<f32>;
        let device = Default::default();

        let module: GlobalAttention<B> = GlobalAttentionConfig::new(8, 2)
            .with_sr_ratio(2)
            .init(&device);

        let x = Tensor::<B, 3>::zeros([1, 16, 8], &device);
        let pos = Tensor::<B, 3>::zeros([2, 16, 16], &device);
        let _ = module.forward(x, [4, 4], pos);
    }

    #[test]
    fn test_forward_autodiff() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let module: GlobalAttention<B> = GlobalAttentionConfig::new(4, 1)
            .with_sr_ratio(2)
            .with_proj_drop(0.2)
            .init(&device);

        let x = Tensor::<B, 3>::random([2, 16, 4], Distribution::Default, &device);
        let pos = Tensor::<B, 3>::zeros([1, 16, 4], &device);
        assert_eq!(module.forward(x, [4, 4], pos).dims(), [2, 16, 4]);
    }
}
