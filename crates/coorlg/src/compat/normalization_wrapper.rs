//! # Normalization Wrapper
//!
//! One config-selectable norm layer for both halves of the network:
//! * [`BatchNorm`] over ``(B, C, H, W)`` conv feature maps,
//!   as used by [`crate::layers::blocks::cna::CNA2d`].
//! * [`LayerNorm`] over ``(B, N, C)`` token sequences,
//!   as used by the `CoorLGBlock` pre-norms.
//!
//! Configs are built with a placeholder feature count, and resized with
//! [`NormalizationConfig::with_num_features`] once the layer width is known.

use burn::nn::{BatchNorm, BatchNormConfig, LayerNorm, LayerNormConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Normalization`] Configuration.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum NormalizationConfig {
    /// [`BatchNorm`] Configuration.
    Batch(BatchNormConfig),

    /// [`LayerNorm`] Configuration.
    Layer(LayerNormConfig),
}

impl From<BatchNormConfig> for NormalizationConfig {
    fn from(config: BatchNormConfig) -> Self {
        Self::Batch(config)
    }
}

impl From<LayerNormConfig> for NormalizationConfig {
    fn from(config: LayerNormConfig) -> Self {
        Self::Layer(config)
    }
}

impl NormalizationConfig {
    /// Initialize a [`Normalization`] layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Normalization<B> {
        match self {
            NormalizationConfig::Batch(config) => config.init(device).into(),
            NormalizationConfig::Layer(config) => config.init(device).into(),
        }
    }

    /// Replace the feature count, keeping every other setting.
    pub fn with_num_features(
        self,
        num_features: usize,
    ) -> Self {
        match self {
            NormalizationConfig::Batch(config) => BatchNormConfig {
                num_features,
                ..config
            }
            .into(),
            NormalizationConfig::Layer(config) => LayerNormConfig {
                d_model: num_features,
                ..config
            }
            .into(),
        }
    }

    /// Get the number of features.
    pub fn num_features(&self) -> usize {
        match self {
            NormalizationConfig::Batch(config) => config.num_features,
            NormalizationConfig::Layer(config) => config.d_model,
        }
    }
}

/// Normalization Layer Wrapper.
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Normalization<B: Backend> {
    /// [`BatchNorm`] layer; restricted to `BatchNorm<2>`.
    Batch(BatchNorm<B, 2>),

    /// [`LayerNorm`] layer.
    Layer(LayerNorm<B>),
}

impl<B: Backend> From<BatchNorm<B, 2>> for Normalization<B> {
    fn from(layer: BatchNorm<B, 2>) -> Self {
        Self::Batch(layer)
    }
}

impl<B: Backend> From<LayerNorm<B>> for Normalization<B> {
    fn from(layer: LayerNorm<B>) -> Self {
        Self::Layer(layer)
    }
}

impl<B: Backend> Normalization<B> {
    /// Normalize ``input``; the output has the input's shape.
    ///
    /// Batch norm expects ``D == 4``; layer norm normalizes the last dim.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Normalization::Batch(norm) => norm.forward(input),
            Normalization::Layer(norm) => norm.forward(input),
        }
    }

    /// Get the number of features.
    pub fn num_features(&self) -> usize {
        match self {
            Normalization::Batch(norm) => norm.gamma.dims()[0],
            Normalization::Layer(norm) => norm.gamma.dims()[0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_batch_norm() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let num_features = 12;
        let input: Tensor<B, 4> =
            Tensor::random([2, num_features, 3, 4], Distribution::Default, &device);

        let config: NormalizationConfig = BatchNormConfig::new(num_features).into();
        assert_eq!(config.num_features(), num_features);

        let layer: Normalization<B> = config.init(&device);
        assert_eq!(layer.num_features(), num_features);

        let expected = match &layer {
            Normalization::Batch(inner) => inner.forward(input.clone()),
            other => panic!("expected a batch norm: {other:?}"),
        };

        let output = layer.forward(input);

        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_layer_norm() {
        type B = NdArray<f32>;
        let device = Default::default();

        let num_features = 12;
        let input: Tensor<B, 3> =
            Tensor::random([2, 5, num_features], Distribution::Default, &device);

        let config: NormalizationConfig = LayerNormConfig::new(num_features)
            .with_epsilon(1e-6)
            .into();

        let layer: Normalization<B> = config.init(&device);

        let expected = match &layer {
            Normalization::Layer(inner) => inner.forward(input.clone()),
            other => panic!("expected a layer norm: {other:?}"),
        };

        let output = layer.forward(input);

        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_with_num_features() {
        let config: NormalizationConfig = BatchNormConfig::new(0).into();
        assert_eq!(config.with_num_features(7).num_features(), 7);

        let config: NormalizationConfig = LayerNormConfig::new(0).into();
        assert_eq!(config.with_num_features(9).num_features(), 9);
    }
}
