//! # `CNA2d` - conv, norm and activation in one block.
//!
//! ``conv -> norm -> act`` by default. With [`CNA2dConfig::act_first`] the
//! trailing pair is swapped to ``conv -> act -> norm``, which is what the
//! `CoorLGNet` stem and the `Res2Mlp` expansion use.
//!
//! The norm layer is always sized to the conv output; a [`CNA2dPolicy`]
//! carries the norm / act choice across several differently sized convs.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use crate::layers::init::init_conv2d;
use bimm_contracts::assert_shape_contract_periodically;
use burn::config::Config;
use burn::module::Module;
use burn::nn::BatchNormConfig;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};

/// Norm / activation choice shared by a family of [`CNA2d`] layers.
#[derive(Config, Debug)]
pub struct CNA2dPolicy {
    /// Norm layer; its feature count is replaced on [`CNA2dPolicy::wrap`].
    #[config(default = "NormalizationConfig::Batch(BatchNormConfig::new(0))")]
    pub norm: NormalizationConfig,

    /// Activation layer.
    #[config(default = "ActivationConfig::Gelu")]
    pub act: ActivationConfig,

    /// Run the activation before the norm.
    #[config(default = false)]
    pub act_first: bool,
}

impl CNA2dPolicy {
    /// Wrap a conv config with this policy's norm and activation.
    pub fn wrap(
        &self,
        conv: Conv2dConfig,
    ) -> CNA2dConfig {
        let norm = self.norm.clone().with_num_features(conv.channels[1]);
        CNA2dConfig {
            conv,
            norm,
            act: self.act.clone(),
            act_first: self.act_first,
        }
    }
}

/// Shape accessors shared by [`CNA2dConfig`] and [`CNA2d`].
pub trait CNA2dMeta {
    /// Input channels.
    fn in_channels(&self) -> usize;

    /// Output channels.
    fn out_channels(&self) -> usize;

    /// Conv groups.
    fn groups(&self) -> usize;

    /// Conv stride, ``[height, width]``.
    fn stride(&self) -> [usize; 2];
}

/// [`CNA2d`] Config.
#[derive(Config, Debug)]
pub struct CNA2dConfig {
    /// Conv layer.
    pub conv: Conv2dConfig,

    /// Norm layer; resized to ``conv.channels[1]`` on init.
    #[config(default = "NormalizationConfig::Batch(BatchNormConfig::new(0))")]
    pub norm: NormalizationConfig,

    /// Activation layer.
    #[config(default = "ActivationConfig::Gelu")]
    pub act: ActivationConfig,

    /// Run the activation before the norm.
    #[config(default = false)]
    pub act_first: bool,
}

impl CNA2dMeta for CNA2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }
}

impl CNA2dConfig {
    /// Initialize a [`CNA2d`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> CNA2d<B> {
        let norm = self.norm.clone().with_num_features(self.out_channels());
        CNA2d {
            conv: init_conv2d(self.conv.clone(), device),
            norm: norm.init(device),
            act: self.act.init(),
            act_first: self.act_first,
        }
    }
}

/// Conv, norm and activation block.
#[derive(Module, Debug)]
pub struct CNA2d<B: Backend> {
    /// Conv layer.
    pub conv: Conv2d<B>,

    /// Norm layer.
    pub norm: Normalization<B>,

    /// Activation layer.
    pub act: Activation,

    /// Run the activation before the norm.
    pub act_first: bool,
}

impl<B: Backend> CNA2dMeta for CNA2d<B> {
    fn in_channels(&self) -> usize {
        let [_, per_group, _, _] = self.conv.weight.dims();
        per_group * self.groups()
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.dims()[0]
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }
}

impl<B: Backend> CNA2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        assert_shape_contract_periodically!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &[("in_channels", self.in_channels())]
        );

        let x = self.conv.forward(input);
        if self.act_first {
            self.norm.forward(self.act.forward(x))
        } else {
            self.act.forward(self.norm.forward(x))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::nn::PaddingConfig2d;
    use burn::tensor::Distribution;

    fn stem_conv(
        d_input: usize,
        d_output: usize,
        stride: usize,
    ) -> Conv2dConfig {
        Conv2dConfig::new([d_input, d_output], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
    }

    #[test]
    fn test_policy_sizes_norm_per_conv() {
        let policy = CNA2dPolicy::new()
            .with_act(ActivationConfig::Swish)
            .with_act_first(true);

        let narrow = policy.wrap(stem_conv(3, 8, 2));
        let wide = policy.wrap(stem_conv(8, 24, 1));

        assert_eq!(narrow.norm.num_features(), 8);
        assert_eq!(wide.norm.num_features(), 24);
        assert_eq!(narrow.stride(), [2, 2]);
        assert_eq!(wide.in_channels(), 8);
        assert!(wide.act_first);
        assert!(matches!(wide.act, ActivationConfig::Swish));
    }

    #[test]
    fn test_norm_then_act() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: CNA2d<B> = CNA2dConfig::new(stem_conv(4, 6, 2))
            .with_act(ActivationConfig::HardSwish)
            .init(&device);
        assert_eq!(layer.in_channels(), 4);
        assert_eq!(layer.out_channels(), 6);

        let input = Tensor::random([2, 4, 9, 9], Distribution::Default, &device);
        let output = layer.forward(input.clone());
        assert_eq!(output.dims(), [2, 6, 5, 5]);

        let expected = layer
            .act
            .forward(layer.norm.forward(layer.conv.forward(input)));
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_act_first_depthwise() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let layer: CNA2d<B> = CNA2dConfig::new(
            Conv2dConfig::new([5, 5], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_groups(5)
                .with_bias(false),
        )
        .with_act_first(true)
        .init(&device);
        assert_eq!(layer.groups(), 5);
        assert_eq!(layer.in_channels(), 5);

        let input = Tensor::random([1, 5, 6, 7], Distribution::Default, &device);
        let output = layer.forward(input.clone());

        let expected = layer
            .norm
            .forward(layer.act.forward(layer.conv.forward(input)));
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
