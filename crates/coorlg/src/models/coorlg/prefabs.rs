//! # Prefab configs and input preprocessing.

use crate::models::coorlg::coorlg_model::{CoorLGNetConfig, NUM_STAGES};
use burn::config::Config;
use burn::prelude::{Backend, Tensor, TensorData};
use serde::{Deserialize, Serialize};

/// ImageNet channel means.
pub const IMAGENET_DEFAULT_MEAN: [f64; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations.
pub const IMAGENET_DEFAULT_STD: [f64; 3] = [0.229, 0.224, 0.225];

impl CoorLGNetConfig {
    /// The ``coorlgnet`` prefab.
    pub fn coorlgnet(num_classes: usize) -> Self {
        Self::new()
            .with_num_classes(num_classes)
            .with_embed_dims([64, 128, 256, 512])
            .with_stem_channels(32)
            .with_num_heads([1, 2, 4, 8])
            .with_depths([3, 3, 16, 3])
            .with_mlp_ratios([4.0; NUM_STAGES])
            .with_qk_ratio(1)
            .with_sr_ratios([8, 4, 2, 1])
            .with_qkv_bias(true)
    }

    /// The preprocessing config matching this model's input.
    pub fn input_config(&self) -> CoorLGInputConfig {
        CoorLGInputConfig::new().with_input_size([self.in_channels, self.img_size, self.img_size])
    }
}

/// Resize interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    /// Bilinear.
    Bilinear,

    /// Bicubic.
    Bicubic,
}

/// Input preprocessing config.
#[derive(Config, Debug)]
pub struct CoorLGInputConfig {
    /// ``[channels, height, width]``.
    #[config(default = "[3, 224, 224]")]
    pub input_size: [usize; 3],

    /// Center crop fraction of the resized image.
    #[config(default = 0.9)]
    pub crop_pct: f64,

    /// Resize interpolation.
    #[config(default = "Interpolation::Bicubic")]
    pub interpolation: Interpolation,

    /// Per-channel mean.
    #[config(default = "IMAGENET_DEFAULT_MEAN")]
    pub mean: [f64; 3],

    /// Per-channel standard deviation.
    #[config(default = "IMAGENET_DEFAULT_STD")]
    pub std: [f64; 3],
}

impl CoorLGInputConfig {
    /// Crop size ``[height, width]``.
    pub fn crop_size(&self) -> [usize; 2] {
        [self.input_size[1], self.input_size[2]]
    }

    /// Shorter-side size to resize to before the center crop.
    pub fn resize_size(&self) -> usize {
        let [h, w] = self.crop_size();
        (h.max(w) as f64 / self.crop_pct).floor() as usize
    }

    /// Normalize ``[0, 1]`` images per channel: ``(x - mean) / std``.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, 3, height, width]``
    ///
    /// # Returns
    ///
    /// ``[batch, 3, height, width]``
    pub fn normalize<B: Backend>(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let device = x.device();
        let stat = |values: [f64; 3]| {
            let values: Vec<f32> = values.iter().map(|&v| v as f32).collect();
            Tensor::<B, 4>::from_data(TensorData::new(values, [1, 3, 1, 1]), &device)
        };

        (x - stat(self.mean)) / stat(self.std)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::coorlg::coorlg_model::{CoorLGNet, CoorLGNetMeta};
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tolerance};

    #[test]
    fn test_prefab() {
        let config = CoorLGNetConfig::coorlgnet(2);
        assert_eq!(config.embed_dims, [64, 128, 256, 512]);
        assert_eq!(config.stem_channels, 32);
        assert_eq!(config.depths, [3, 3, 16, 3]);
        assert_eq!(config.mlp_ratios, [4.0; 4]);
        assert_eq!(config.num_features(), 1280);
    }

    #[test]
    fn test_prefab_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: CoorLGNet<B> = CoorLGNetConfig::coorlgnet(2).init(&device);

        let x = Tensor::<B, 4>::random([2, 3, 224, 224], Distribution::Default, &device);
        assert_eq!(model.forward(x).dims(), [2, 2]);
    }

    #[test]
    fn test_input_config() {
        let config = CoorLGNetConfig::new().input_config();
        assert_eq!(config.input_size, [3, 224, 224]);
        assert_eq!(config.crop_size(), [224, 224]);
        assert_eq!(config.resize_size(), 248);
        assert_eq!(config.interpolation, Interpolation::Bicubic);
    }

    #[test]
    fn test_normalize() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = CoorLGInputConfig::new();
        let x = Tensor::<B, 4>::from_data(
            [[[[0.485, 1.0]], [[0.456, 0.0]], [[0.406, 0.5]]]],
            &device,
        );

        let y = config.normalize(x);
        let expected = Tensor::<B, 4>::from_data(
            [[
                [[0.0, (1.0 - 0.485) / 0.229]],
                [[0.0, -0.456 / 0.224]],
                [[0.0, (0.5 - 0.406) / 0.225]],
            ]],
            &device,
        );
        y.to_data()
            .assert_approx_eq(&expected.to_data(), Tolerance::<f64>::default());
    }
}
