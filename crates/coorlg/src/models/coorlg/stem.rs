//! # Convolutional stem.
//!
//! Three ``conv3x3 -> gelu -> bn`` units; only the first is strided.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::layers::blocks::cna::{CNA2d, CNA2dMeta, CNA2dPolicy};
use bimm_contracts::assert_shape_contract_periodically;
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Tensor};

/// [`CoorLGStem`] Config.
#[derive(Config, Debug)]
pub struct CoorLGStemConfig {
    /// Image channels.
    pub in_channels: usize,

    /// Output channels.
    pub stem_channels: usize,

    /// Per-unit strides.
    #[config(default = "[2, 1, 1]")]
    pub strides: [usize; 3],
}

impl CoorLGStemConfig {
    /// Total downsampling factor.
    pub fn reduction(&self) -> usize {
        self.strides.iter().product()
    }

    /// Initialize a [`CoorLGStem`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> CoorLGStem<B> {
        let policy = CNA2dPolicy::new()
            .with_act(ActivationConfig::Gelu)
            .with_act_first(true);

        let mut d_input = self.in_channels;
        let layers = self
            .strides
            .iter()
            .map(|&stride| {
                let conv = Conv2dConfig::new([d_input, self.stem_channels], [3, 3])
                    .with_stride([stride, stride])
                    .with_padding(PaddingConfig2d::Explicit(1, 1));
                d_input = self.stem_channels;
                policy.wrap(conv).init(device)
            })
            .collect();

        CoorLGStem { layers }
    }
}

/// Convolutional stem.
#[derive(Module, Debug)]
pub struct CoorLGStem<B: Backend> {
    /// The ``conv -> gelu -> bn`` units.
    pub layers: Vec<CNA2d<B>>,
}

impl<B: Backend> CoorLGStem<B> {
    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.layers.first().map_or(0, |layer| layer.in_channels())
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        self.layers.last().map_or(0, |layer| layer.out_channels())
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, in_channels, height, width]``
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, height / 2, width / 2]``
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        assert_shape_contract_periodically!(
            ["batch", "in_channels", "height", "width"],
            &x,
            &[("in_channels", self.in_channels())]
        );

        self.layers.iter().fold(x, |x, layer| layer.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_stem() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = CoorLGStemConfig::new(3, 16);
        assert_eq!(config.reduction(), 2);

        let stem: CoorLGStem<B> = config.init(&device);
        assert_eq!(stem.layers.len(), 3);
        assert_eq!(stem.in_channels(), 3);
        assert_eq!(stem.out_channels(), 16);
        assert_eq!(stem.layers[0].stride(), [2, 2]);
        assert_eq!(stem.layers[2].stride(), [1, 1]);
        assert!(stem.layers.iter().all(|layer| layer.act_first));

        let x = Tensor::<B, 4>::random([2, 3, 32, 24], Distribution::Default, &device);
        assert_eq!(stem.forward(x).dims(), [2, 16, 16, 12]);
    }
}
