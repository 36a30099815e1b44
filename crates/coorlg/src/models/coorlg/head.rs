//! # Classifier head.
//!
//! ```text
//! x = swish(bn(conv1x1(x)))   // [B, fc_dim, H, W]
//! x = dropout(mean_hw(x))     // [B, fc_dim]
//! x = tanh(pre_logits(x))     // when representation_size is set
//! y = classifier(x)           // when num_classes > 0
//! ```

use crate::compat::activation_wrapper::ActivationConfig;
use crate::layers::blocks::cna::{CNA2d, CNA2dConfig, CNA2dMeta};
use crate::layers::drop::drop_path::expect_probability;
use crate::layers::init::init_linear;
use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::Conv2dConfig;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::tanh;

/// [`CoorLGHead`] Meta API.
pub trait CoorLGHeadMeta {
    /// Input channels.
    fn d_input(&self) -> usize;

    /// Pooled feature size.
    fn fc_dim(&self) -> usize;

    /// Representation layer size, if any.
    fn representation_size(&self) -> Option<usize>;

    /// Number of classes; ``0`` disables the classifier.
    fn num_classes(&self) -> usize;

    /// Size of the features fed to the classifier.
    fn num_features(&self) -> usize {
        self.representation_size().unwrap_or(self.fc_dim())
    }

    /// Size of the head output.
    fn d_output(&self) -> usize {
        match self.num_classes() {
            0 => self.num_features(),
            n => n,
        }
    }
}

/// [`CoorLGHead`] Config.
#[derive(Config, Debug)]
pub struct CoorLGHeadConfig {
    /// Input channels.
    pub d_input: usize,

    /// Pooled feature size.
    #[config(default = 1280)]
    pub fc_dim: usize,

    /// Number of classes; ``0`` disables the classifier.
    #[config(default = 2)]
    pub num_classes: usize,

    /// Representation layer size.
    #[config(default = "None")]
    pub representation_size: Option<usize>,

    /// Dropout on the pooled features.
    #[config(default = 0.1)]
    pub drop: f64,
}

impl CoorLGHeadMeta for CoorLGHeadConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn fc_dim(&self) -> usize {
        self.fc_dim
    }

    fn representation_size(&self) -> Option<usize> {
        self.representation_size
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl CoorLGHeadConfig {
    /// Initialize a [`CoorLGHead`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> CoorLGHead<B> {
        CoorLGHead {
            features: CNA2dConfig::new(Conv2dConfig::new([self.d_input, self.fc_dim], [1, 1]))
                .with_act(ActivationConfig::Swish)
                .init(device),
            drop: DropoutConfig::new(expect_probability(self.drop)).init(),
            pre_logits: self
                .representation_size
                .map(|size| init_linear(LinearConfig::new(self.fc_dim, size), device)),
            classifier: init_classifier(self.num_features(), self.num_classes, device),
        }
    }
}

/// Build the classifier layer; ``None`` when ``num_classes == 0``.
pub fn init_classifier<B: Backend>(
    num_features: usize,
    num_classes: usize,
    device: &B::Device,
) -> Option<Linear<B>> {
    (num_classes > 0).then(|| init_linear(LinearConfig::new(num_features, num_classes), device))
}

/// Pooling classifier head.
#[derive(Module, Debug)]
pub struct CoorLGHead<B: Backend> {
    /// ``conv1x1 -> bn -> swish``.
    pub features: CNA2d<B>,

    /// Pooled feature dropout.
    pub drop: Dropout,

    /// Representation layer, followed by ``tanh``.
    pub pre_logits: Option<Linear<B>>,

    /// Classifier.
    pub classifier: Option<Linear<B>>,
}

impl<B: Backend> CoorLGHeadMeta for CoorLGHead<B> {
    fn d_input(&self) -> usize {
        self.features.in_channels()
    }

    fn fc_dim(&self) -> usize {
        self.features.out_channels()
    }

    fn representation_size(&self) -> Option<usize> {
        self.pre_logits
            .as_ref()
            .map(|layer| layer.weight.dims()[1])
    }

    fn num_classes(&self) -> usize {
        self.classifier
            .as_ref()
            .map_or(0, |layer| layer.weight.dims()[1])
    }
}

impl<B: Backend> CoorLGHead<B> {
    /// Pooled pre-classifier features.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, d_input, height, width]``
    ///
    /// # Returns
    ///
    /// ``[batch, num_features]``
    pub fn forward_features(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [batch] = unpack_shape_contract!(
            ["batch", "d_input", "height", "width"],
            &x,
            &["batch"],
            &[("d_input", self.d_input())]
        );

        let x = self.features.forward(x);
        let x = x.mean_dim(3).mean_dim(2).reshape([batch, self.fc_dim()]);
        let x = self.drop.forward(x);

        match &self.pre_logits {
            Some(layer) => tanh(layer.forward(x)),
            None => x,
        }
    }

    /// Apply the classifier to pooled features; identity without one.
    ///
    /// # Arguments
    ///
    /// - `features`: ``[batch, num_features]``
    ///
    /// # Returns
    ///
    /// ``[batch, d_output]``
    pub fn classify(
        &self,
        features: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        match &self.classifier {
            Some(classifier) => classifier.forward(features),
            None => features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_config() {
        let config = CoorLGHeadConfig::new(368);
        assert_eq!(config.num_features(), 1280);
        assert_eq!(config.d_output(), 2);

        let config = config
            .with_representation_size(Some(64))
            .with_num_classes(0);
        assert_eq!(config.num_features(), 64);
        assert_eq!(config.d_output(), 64);
    }

    #[test]
    fn test_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let head: CoorLGHead<B> = CoorLGHeadConfig::new(8)
            .with_fc_dim(32)
            .with_num_classes(5)
            .init(&device);
        assert_eq!(head.num_classes(), 5);
        assert_eq!(head.representation_size(), None);

        let x = Tensor::<B, 4>::random([2, 8, 3, 3], Distribution::Default, &device);
        assert_eq!(head.forward_features(x.clone()).dims(), [2, 32]);
        assert_eq!(head.classify(head.forward_features(x)).dims(), [2, 5]);
    }

    #[test]
    fn test_representation() {
        type B = NdArray<f32>;
        let device = Default::default();

        let head: CoorLGHead<B> = CoorLGHeadConfig::new(8)
            .with_fc_dim(32)
            .with_representation_size(Some(12))
            .init(&device);
        assert_eq!(head.representation_size(), Some(12));
        assert_eq!(head.num_features(), 12);

        let x = Tensor::<B, 4>::random([2, 8, 3, 3], Distribution::Default, &device);
        let features = head.forward_features(x.clone());
        assert_eq!(features.dims(), [2, 12]);

        // tanh bounds the representation.
        let max = features.abs().max().into_scalar();
        assert!(max <= 1.0);

        assert_eq!(head.classify(head.forward_features(x)).dims(), [2, 2]);
    }

    #[test]
    fn test_no_classifier() {
        type B = NdArray<f32>;
        let device = Default::default();

        let head: CoorLGHead<B> = CoorLGHeadConfig::new(8)
            .with_fc_dim(16)
            .with_num_classes(0)
            .init(&device);
        assert!(head.classifier.is_none());

        let x = Tensor::<B, 4>::random([1, 8, 2, 2], Distribution::Default, &device);
        assert_eq!(head.classify(head.forward_features(x)).dims(), [1, 16]);
    }
}
