//! # `Conv2dNormBlock` - a conv with a trailing batch norm.
//!
//! Used where a projection must stay linear up to normalization,
//! such as the `Res2Mlp` output projection ahead of its residual add.

use crate::layers::init::init_conv2d;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::prelude::{Backend, Tensor};

/// Shape accessors shared by [`Conv2dNormBlockConfig`] and [`Conv2dNormBlock`].
pub trait Conv2dNormBlockMeta {
    /// Input channels.
    fn in_channels(&self) -> usize;

    /// Output channels.
    fn out_channels(&self) -> usize;

    /// Conv stride, ``[height, width]``.
    fn stride(&self) -> [usize; 2];
}

/// [`Conv2dNormBlock`] Config.
#[derive(Config, Debug)]
pub struct Conv2dNormBlockConfig {
    /// Conv layer.
    pub conv: Conv2dConfig,

    /// Batch norm epsilon.
    #[config(default = 1e-5)]
    pub norm_eps: f64,
}

impl From<Conv2dConfig> for Conv2dNormBlockConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self::new(conv)
    }
}

impl Conv2dNormBlockMeta for Conv2dNormBlockConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }
}

impl Conv2dNormBlockConfig {
    /// Initialize a [`Conv2dNormBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Conv2dNormBlock<B> {
        Conv2dNormBlock {
            conv: init_conv2d(self.conv.clone(), device),
            norm: BatchNormConfig::new(self.out_channels())
                .with_epsilon(self.norm_eps)
                .init(device),
        }
    }
}

/// Conv followed by batch norm.
#[derive(Module, Debug)]
pub struct Conv2dNormBlock<B: Backend> {
    /// Conv layer.
    pub conv: Conv2d<B>,

    /// Batch norm over the conv output.
    pub norm: BatchNorm<B, 2>,
}

impl<B: Backend> Conv2dNormBlockMeta for Conv2dNormBlock<B> {
    fn in_channels(&self) -> usize {
        let [_, per_group, _, _] = self.conv.weight.dims();
        per_group * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.dims()[0]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }
}

impl<B: Backend> Conv2dNormBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())]
        );

        let x = self.norm.forward(self.conv.forward(input));

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[("batch", batch), ("out_channels", self.out_channels())]
        );
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_pointwise_projection() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config: Conv2dNormBlockConfig = Conv2dConfig::new([12, 3], [1, 1]).into();
        assert_eq!(config.in_channels(), 12);
        assert_eq!(config.out_channels(), 3);
        assert_eq!(config.stride(), [1, 1]);
        assert_eq!(config.norm_eps, 1e-5);

        let block: Conv2dNormBlock<B> = config.init(&device);
        assert_eq!(block.in_channels(), 12);
        assert_eq!(block.norm.gamma.dims(), [3]);

        let input = Tensor::random([2, 12, 5, 7], Distribution::Default, &device);
        let output = block.forward(input.clone());
        assert_eq!(output.dims(), [2, 3, 5, 7]);

        let expected = block.norm.forward(block.conv.forward(input));
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_strided_training_stats() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let block: Conv2dNormBlock<B> = Conv2dNormBlockConfig::new(
            Conv2dConfig::new([4, 6], [2, 2]).with_stride([2, 2]),
        )
        .init(&device);

        let input = Tensor::random([3, 4, 8, 6], Distribution::Default, &device);
        let output = block.forward(input);
        assert_eq!(output.dims(), [3, 6, 4, 3]);

        // Training-mode batch norm zero-centers each channel.
        let means = output.clone().mean_dim(3).mean_dim(2).mean_dim(0);
        let max_mean: f32 = means.abs().max().into_scalar();
        assert!(max_mean < 1e-4, "channel means not centered: {max_mean}");

        output.sum().backward();
    }
}
