//! # `CoorLGBlock` - the composite local/global block.
//!
//! ```text
//! cnn = tokens -> (B, C, H, W)
//! x   = coord_attn(dw_conv(cnn)) + cnn  -> tokens
//! x   = x + dp(window_attn(norm1(x)))
//! x   = x + dp(ffn(norm2(x)))
//! x   = x + dp(global_attn(norm1(x), relative_pos))
//! x   = x + dp(res2_mlp(norm2(x)))
//! ```
//!
//! ``norm1`` and ``norm2`` are each applied twice; both feed-forward
//! branches contribute to the output.

use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use crate::layers::attention::coord_attention::{CoordAttention, CoordAttentionConfig};
use crate::layers::drop::drop_path::{DropPath, DropPathConfig};
use crate::layers::init::init_conv2d;
use crate::models::coorlg::ffn::{Ffn, FfnConfig};
use crate::models::coorlg::global_attention::{GlobalAttention, GlobalAttentionConfig};
use crate::models::coorlg::res2_mlp::{Res2Mlp, Res2MlpConfig};
use crate::models::coorlg::window_attention::{
    WindowAttention, WindowAttentionConfig, WindowAttentionMeta,
};
use crate::models::coorlg::windowing::{window_padding, window_partition, window_reverse};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LayerNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::ElementConversion;

/// [`CoorLGBlock`] Meta API.
pub trait CoorLGBlockMeta {
    /// Token feature size.
    fn d_input(&self) -> usize;

    /// Number of attention heads.
    fn num_heads(&self) -> usize;

    /// Local attention tile size.
    fn window_size(&self) -> usize;

    /// Hidden size of both feed-forward branches.
    fn d_hidden(&self) -> usize;
}

/// [`CoorLGBlock`] Config.
#[derive(Config, Debug)]
pub struct CoorLGBlockConfig {
    /// Token feature size.
    pub d_input: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Feed-forward expansion ratio.
    #[config(default = 4.0)]
    pub mlp_ratio: f64,

    /// Enable bias on the q/k/v projections.
    #[config(default = true)]
    pub qkv_bias: bool,

    /// Override for the global attention logit scale.
    #[config(default = "None")]
    pub qk_scale: Option<f64>,

    /// Query/key feature reduction.
    #[config(default = 1)]
    pub qk_ratio: usize,

    /// Global attention spatial reduction ratio.
    #[config(default = 1)]
    pub sr_ratio: usize,

    /// Local attention tile size.
    #[config(default = 7)]
    pub window_size: usize,

    /// Feed-forward and projection dropout.
    #[config(default = 0.0)]
    pub drop: f64,

    /// Attention weight dropout.
    #[config(default = 0.0)]
    pub attn_drop: f64,

    /// Residual branch drop path probability.
    #[config(default = 0.0)]
    pub drop_path: f64,

    /// Pre-norm ``LayerNorm`` epsilon.
    #[config(default = 1e-6)]
    pub norm_eps: f64,
}

impl CoorLGBlockMeta for CoorLGBlockConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn window_size(&self) -> usize {
        self.window_size
    }

    fn d_hidden(&self) -> usize {
        (self.d_input as f64 * self.mlp_ratio) as usize
    }
}

impl CoorLGBlockConfig {
    /// The token pre-norm config.
    pub fn pre_norm(&self) -> NormalizationConfig {
        LayerNormConfig::new(self.d_input)
            .with_epsilon(self.norm_eps)
            .into()
    }

    /// Initialize a [`CoorLGBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> CoorLGBlock<B> {
        let d_input = self.d_input();
        let d_hidden = self.d_hidden();

        CoorLGBlock {
            dw_conv: init_conv2d(
                Conv2dConfig::new([d_input, d_input], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .with_groups(d_input),
                device,
            ),
            coord_attn: CoordAttentionConfig::new(d_input).init(device),
            norm1: self.pre_norm().init(device),
            window_attn: WindowAttentionConfig::new(d_input, self.num_heads)
                .with_window_size(self.window_size)
                .with_qkv_bias(self.qkv_bias)
                .with_qk_ratio(self.qk_ratio)
                .with_sr_ratio(self.sr_ratio)
                .with_attn_drop(self.attn_drop)
                .with_proj_drop(self.drop)
                .init(device),
            norm2: self.pre_norm().init(device),
            ffn: FfnConfig::new(d_input)
                .with_d_hidden(Some(d_hidden))
                .with_drop(self.drop)
                .init(device),
            global_attn: GlobalAttentionConfig::new(d_input, self.num_heads)
                .with_qkv_bias(self.qkv_bias)
                .with_qk_scale(self.qk_scale)
                .with_qk_ratio(self.qk_ratio)
                .with_sr_ratio(self.sr_ratio)
                .with_attn_drop(self.attn_drop)
                .with_proj_drop(self.drop)
                .init(device),
            res2_mlp: Res2MlpConfig::new(d_input, d_hidden)
                .with_drop(self.drop)
                .init(device),
            drop_path: DropPathConfig::new()
                .with_drop_prob(self.drop_path)
                .init(),
        }
    }
}

/// Composite local/global block.
#[derive(Module, Debug)]
pub struct CoorLGBlock<B: Backend> {
    /// Depth-wise 3x3 conv.
    pub dw_conv: Conv2d<B>,

    /// Coordinate attention over the depth-wise conv output.
    pub coord_attn: CoordAttention<B>,

    /// Attention pre-norm.
    pub norm1: Normalization<B>,

    /// Windowed local attention.
    pub window_attn: WindowAttention<B>,

    /// Feed-forward pre-norm.
    pub norm2: Normalization<B>,

    /// Channel MLP.
    pub ffn: Ffn<B>,

    /// Spatial-reduction global attention.
    pub global_attn: GlobalAttention<B>,

    /// Multi-branch conv feed-forward.
    pub res2_mlp: Res2Mlp<B>,

    /// Residual branch drop path.
    pub drop_path: DropPath,
}

impl<B: Backend> CoorLGBlockMeta for CoorLGBlock<B> {
    fn d_input(&self) -> usize {
        self.window_attn.d_input()
    }

    fn num_heads(&self) -> usize {
        self.window_attn.num_heads()
    }

    fn window_size(&self) -> usize {
        self.window_attn.window_size()
    }

    fn d_hidden(&self) -> usize {
        self.ffn.fc1.weight.dims()[1]
    }
}

impl<B: Backend> CoorLGBlock<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, height * width, d_input]``
    /// - `resolution`: ``[height, width]``
    /// - `relative_pos`: the stage positional tensor, ``[heads, tokens, reduced_tokens]``
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
        let d_input = self.d_input();
        let [batch] = unpack_shape_contract!(
            ["batch", "tokens" = "height" * "width", "d_input"],
            &x,
            &["batch"],
            &[("height", height), ("width", width), ("d_input", d_input)]
        );

        let cnn = x.swap_dims(1, 2).reshape([batch, d_input, height, width]);
        let cnn = self.coord_attn.forward(self.dw_conv.forward(cnn.clone())) + cnn;
        let x = cnn.flatten::<3>(2, 3).swap_dims(1, 2);

        let x = self.drop_path.with_skip(x, |x| {
            self.local_attention(self.norm1.forward(x), resolution)
        });
        let x = self
            .drop_path
            .with_skip(x, |x| self.ffn.forward(self.norm2.forward(x)));
        let x = self.drop_path.with_skip(x, |x| {
            self.global_attn
                .forward(self.norm1.forward(x), resolution, relative_pos)
        });
        let x = self.drop_path.with_skip(x, |x| {
            self.res2_mlp.forward(self.norm2.forward(x), resolution)
        });

        assert_shape_contract_periodically!(
            ["batch", "tokens", "d_input"],
            &x,
            &[
                ("batch", batch),
                ("tokens", height * width),
                ("d_input", d_input)
            ]
        );

        x
    }

    /// Windowed attention over a token map.
    ///
    /// The map is zero-padded on the bottom/right to a multiple of the
    /// tile size, attended per tile, merged, and cropped back.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, height * width, d_input]``
    /// - `resolution`: ``[height, width]``
    ///
    /// # Returns
    ///
    /// ``[batch, height * width, d_input]``
    pub fn local_attention(
        &self,
        x: Tensor<B, 3>,
        resolution: [usize; 2],
    ) -> Tensor<B, 3> {
        let [height, width] = resolution;
        let [batch, _, channels] = x.dims();
        let ws = self.window_size();

        let [pad_b, pad_r] = window_padding(resolution, ws);
        let x = x.reshape([batch, height, width, channels]);
        let x = if pad_b > 0 || pad_r > 0 {
            x.permute([0, 3, 1, 2])
                .pad((0, pad_r, 0, pad_b), B::FloatElem::from_elem(0.0))
                .permute([0, 2, 3, 1])
        } else {
            x
        };
        let [_, hp, wp, _] = x.dims();

        let windows = window_partition(x, ws);
        let num_windows = windows.dims()[0];
        let windows = self
            .window_attn
            .forward(windows.reshape([num_windows, ws * ws, channels]));

        let x = window_reverse(windows.reshape([num_windows, ws, ws, channels]), ws, hp, wp);
        let x = if pad_b > 0 || pad_r > 0 {
            x.slice([0..batch, 0..height, 0..width, 0..channels])
        } else {
            x
        };

        x.reshape([batch, height * width, channels])
    }
}
