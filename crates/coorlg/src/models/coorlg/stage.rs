//! # `CoorLGStage` - patch embedding, blocks, and the stage positional tensor.

use crate::layers::patching::patch_embed::{PatchEmbed, PatchEmbedConfig, PatchEmbedMeta};
use crate::models::coorlg::block::{CoorLGBlock, CoorLGBlockConfig};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::Initializer;
use burn::prelude::{Backend, Tensor};

/// [`CoorLGStage`] Meta API.
pub trait CoorLGStageMeta {
    /// Input image resolution ``[height, width]``.
    fn input_resolution(&self) -> [usize; 2];

    /// Input channels.
    fn d_input(&self) -> usize;

    /// Token (and output) feature size.
    fn d_output(&self) -> usize;

    /// Number of blocks.
    fn depth(&self) -> usize;

    /// Number of attention heads.
    fn num_heads(&self) -> usize;

    /// Global attention spatial reduction ratio.
    fn sr_ratio(&self) -> usize;

    /// Embedding patch size.
    fn patch_size(&self) -> usize;

    /// Token resolution ``[height, width]``.
    fn output_resolution(&self) -> [usize; 2] {
        let [h, w] = self.input_resolution();
        [h / self.patch_size(), w / self.patch_size()]
    }

    /// Number of tokens.
    fn num_tokens(&self) -> usize {
        let [h, w] = self.output_resolution();
        h * w
    }

    /// Number of reduced (key/value) tokens.
    fn num_reduced_tokens(&self) -> usize {
        self.num_tokens() / (self.sr_ratio() * self.sr_ratio())
    }
}

/// [`CoorLGStage`] Config.
#[derive(Config, Debug)]
pub struct CoorLGStageConfig {
    /// Input image resolution ``[height, width]``.
    pub input_resolution: [usize; 2],

    /// Input channels.
    pub d_input: usize,

    /// Token feature size.
    pub d_output: usize,

    /// Number of blocks.
    pub depth: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Embedding patch size.
    #[config(default = 2)]
    pub patch_size: usize,

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

    /// Per-block drop path rates; empty means no drop path.
    #[config(default = "Vec::new()")]
    pub drop_path_rates: Vec<f64>,
}

impl CoorLGStageMeta for CoorLGStageConfig {
    fn input_resolution(&self) -> [usize; 2] {
        self.input_resolution
    }

    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_output(&self) -> usize {
        self.d_output
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn sr_ratio(&self) -> usize {
        self.sr_ratio
    }

    fn patch_size(&self) -> usize {
        self.patch_size
    }
}

impl CoorLGStageConfig {
    /// The drop path rate of each block.
    pub fn block_drop_paths(&self) -> Vec<f64> {
        if self.drop_path_rates.is_empty() {
            vec![0.0; self.depth]
        } else {
            self.drop_path_rates.clone()
        }
    }

    /// Initialize a [`CoorLGStage`].
    ///
    /// # Panics
    ///
    /// If the token resolution is not divisible by ``sr_ratio``,
    /// or the drop path rates do not match the depth.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> CoorLGStage<B> {
        let drop_paths = self.block_drop_paths();
        assert_eq!(
            drop_paths.len(),
            self.depth,
            "Expected {} drop path rates, got {:?}",
            self.depth,
            drop_paths
        );

        let [h, w] = self.output_resolution();
        let sr = self.sr_ratio;
        assert!(
            sr > 0 && h % sr == 0 && w % sr == 0,
            "Stage token resolution ({h}*{w}) must be divisible by sr_ratio {sr}"
        );

        let patch_embed = PatchEmbedConfig::new(self.input_resolution, self.d_input, self.d_output)
            .with_patch_size(self.patch_size)
            .init(device);

        let blocks = drop_paths
            .into_iter()
            .map(|drop_path| {
                CoorLGBlockConfig::new(self.d_output, self.num_heads)
                    .with_mlp_ratio(self.mlp_ratio)
                    .with_qkv_bias(self.qkv_bias)
                    .with_qk_scale(self.qk_scale)
                    .with_qk_ratio(self.qk_ratio)
                    .with_sr_ratio(sr)
                    .with_window_size(self.window_size)
                    .with_drop(self.drop)
                    .with_attn_drop(self.attn_drop)
                    .with_drop_path(drop_path)
                    .init(device)
            })
            .collect();

        let relative_pos = Initializer::Normal {
            mean: 0.0,
            std: 1.0,
        }
        .init(
            [self.num_heads, self.num_tokens(), self.num_reduced_tokens()],
            device,
        );

        tracing::debug!(
            resolution = ?[h, w],
            tokens = self.num_tokens(),
            reduced_tokens = self.num_reduced_tokens(),
            d_output = self.d_output,
            depth = self.depth,
            "initialized stage"
        );

        CoorLGStage {
            patch_embed,
            blocks,
            relative_pos,
        }
    }
}

/// One downsampling stage of the network.
#[derive(Module, Debug)]
pub struct CoorLGStage<B: Backend> {
    /// Patch embedding; halves the resolution.
    pub patch_embed: PatchEmbed<B>,

    /// The blocks.
    pub blocks: Vec<CoorLGBlock<B>>,

    /// ``[heads, tokens, reduced_tokens]`` global attention positional tensor.
    pub relative_pos: Param<Tensor<B, 3>>,
}

impl<B: Backend> CoorLGStageMeta for CoorLGStage<B> {
    fn input_resolution(&self) -> [usize; 2] {
        self.patch_embed.input_resolution()
    }

    fn d_input(&self) -> usize {
        self.patch_embed.d_input()
    }

    fn d_output(&self) -> usize {
        self.patch_embed.d_output()
    }

    fn depth(&self) -> usize {
        self.blocks.len()
    }

    fn num_heads(&self) -> usize {
        self.relative_pos.val().dims()[0]
    }

    fn sr_ratio(&self) -> usize {
        let [_, n, m] = self.relative_pos.val().dims();
        ((n / m) as f64).sqrt().round() as usize
    }

    fn patch_size(&self) -> usize {
        self.patch_embed.patch_size()
    }
}

impl<B: Backend> CoorLGStage<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, d_input, height, width]``
    ///
    /// # Returns
    ///
    /// ``[batch, d_output, height / patch_size, width / patch_size]``
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch] = unpack_shape_contract!(
            ["batch", "d_input", "height", "width"],
            &x,
            &["batch"],
            &[("d_input", self.d_input())]
        );

        let (mut x, resolution) = self.patch_embed.forward(x);
        let relative_pos = self.relative_pos.val();
        for block in &self.blocks {
            x = block.forward(x, resolution, relative_pos.clone());
        }

        let [h, w] = resolution;
        let d_output = self.d_output();
        let x = x.swap_dims(1, 2).reshape([batch, d_output, h, w]);

        assert_shape_contract_periodically!(
            ["batch", "d_output", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("d_output", d_output),
                ("height", h),
                ("width", w)
            ]
        );

        x
    }
}
