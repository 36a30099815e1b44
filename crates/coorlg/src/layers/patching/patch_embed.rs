//! # Patch Embedding
//!
//! Projects non-overlapping ``patch_size x patch_size`` patches of a
//! ``(B, C, H, W)`` map to normalized ``(B, N, D)`` tokens.

use crate::layers::init::init_conv2d;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LayerNorm, LayerNormConfig};
use burn::prelude::{Backend, Tensor};

/// [`PatchEmbed`] Meta API.
pub trait PatchEmbedMeta {
    /// Input resolution ``[height, width]``.
    fn input_resolution(&self) -> [usize; 2];

    /// Input feature dimension size.
    fn d_input(&self) -> usize;

    /// Output feature dimension size.
    fn d_output(&self) -> usize;

    /// The size of each patch.
    fn patch_size(&self) -> usize;

    /// Image resolution, measured in patches.
    fn patches_resolution(&self) -> [usize; 2] {
        let [h, w] = self.input_resolution();
        [h / self.patch_size(), w / self.patch_size()]
    }

    /// Total number of patches.
    fn num_patches(&self) -> usize {
        let [h, w] = self.patches_resolution();
        h * w
    }
}

/// [`PatchEmbed`] Config.
#[derive(Config, Debug, Copy)]
pub struct PatchEmbedConfig {
    /// Input resolution ``[height, width]``.
    pub input_resolution: [usize; 2],

    /// Input feature dimension size.
    pub d_input: usize,

    /// Output feature dimension size.
    pub d_output: usize,

    /// Patch size.
    #[config(default = 2)]
    pub patch_size: usize,

    /// [`LayerNorm`] epsilon.
    #[config(default = 1e-5)]
    pub norm_eps: f64,
}

impl PatchEmbedMeta for PatchEmbedConfig {
    fn input_resolution(&self) -> [usize; 2] {
        self.input_resolution
    }

    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_output(&self) -> usize {
        self.d_output
    }

    fn patch_size(&self) -> usize {
        self.patch_size
    }
}

impl PatchEmbedConfig {
    /// Initialize a [`PatchEmbed`] module.
    ///
    /// # Panics
    ///
    /// If the input resolution is not divisible by the patch size.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PatchEmbed<B> {
        let [h, w] = self.input_resolution;
        let p = self.patch_size;
        assert!(
            p > 0 && h % p == 0 && w % p == 0,
            "Input resolution {:?} must be divisible by patch size {p}",
            self.input_resolution
        );

        PatchEmbed {
            input_resolution: self.input_resolution,
            patch_size: p,
            projection: init_conv2d(
                Conv2dConfig::new([self.d_input, self.d_output], [p, p]).with_stride([p, p]),
                device,
            ),
            norm: LayerNormConfig::new(self.d_output)
                .with_epsilon(self.norm_eps)
                .init(device),
        }
    }
}

/// Patch embedding module.
#[derive(Module, Debug)]
pub struct PatchEmbed<B: Backend> {
    /// Input resolution ``[height, width]``.
    pub input_resolution: [usize; 2],

    /// Size of each patch.
    pub patch_size: usize,

    /// Patch projection.
    pub projection: Conv2d<B>,

    /// Token norm.
    pub norm: LayerNorm<B>,
}

impl<B: Backend> PatchEmbedMeta for PatchEmbed<B> {
    fn input_resolution(&self) -> [usize; 2] {
        self.input_resolution
    }

    fn d_input(&self) -> usize {
        self.projection.weight.dims()[1]
    }

    fn d_output(&self) -> usize {
        self.projection.weight.dims()[0]
    }

    fn patch_size(&self) -> usize {
        self.patch_size
    }
}

impl<B: Backend> PatchEmbed<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, d_input, height, width]``, at exactly the configured resolution.
    ///
    /// # Returns
    ///
    /// A tuple of:
    /// - ``[batch, height/patch_size * width/patch_size, d_output]``
    /// - ``[height/patch_size, width/patch_size]``
    ///
    /// # Panics
    ///
    /// If the input resolution does not match the configured resolution.
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> (Tensor<B, 3>, [usize; 2]) {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "d_input", "height", "width"],
            &x,
            &["batch", "height", "width"],
            &[("d_input", self.d_input())]
        );
        let [h, w] = self.input_resolution;
        assert!(
            height == h && width == w,
            "Input image size ({height}*{width}) doesn't match model ({h}*{w})."
        );

        let x = self.projection.forward(x);
        let [_, _, out_h, out_w] = x.dims();

        let x = x.flatten::<3>(2, 3).swap_dims(1, 2);
        let x = self.norm.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "num_patches", "d_output"],
            &x,
            &[
                ("batch", batch),
                ("num_patches", self.num_patches()),
                ("d_output", self.d_output())
            ]
        );

        (x, [out_h, out_w])
    }
}
