//! # Activation Layer Wrapper
//!
//! A config-selectable activation layer over the activations the
//! `CoorLGNet` layers choose between:
//! * [`Gelu`] - feed-forward and stem layers.
//! * [`HardSwish`] - coordinate attention encoder.
//! * [`Swish`] - classifier head features.
//!
//! ``burn`` ships [`Gelu`] as a layer, but not the two gated activations.
//! All three are stateless, so [`Activation`] is a constant module.
use burn::nn::Gelu;
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::{hard_sigmoid, silu};

/// Swish activation: ``x * sigmoid(x)``.
#[derive(Module, Clone, Debug, Default)]
pub struct Swish;

impl Swish {
    /// Forward pass.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        silu(input)
    }
}

/// Hard-swish activation: ``x * clamp(x / 6 + 1 / 2, 0, 1)``.
#[derive(Module, Clone, Debug, Default)]
pub struct HardSwish;

impl HardSwish {
    /// Forward pass.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        input.clone() * hard_sigmoid(input, 1.0 / 6.0, 0.5)
    }
}

/// [`Activation`] Configuration.
#[derive(Config, Debug)]
pub enum ActivationConfig {
    /// [`Gelu`] activation.
    Gelu,

    /// [`HardSwish`] activation.
    HardSwish,

    /// [`Swish`] activation.
    Swish,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self::Gelu
    }
}

impl ActivationConfig {
    /// Initialize a wrapped activation layer.
    pub fn init(&self) -> Activation {
        match self {
            Self::Gelu => Activation::Gelu(Gelu),
            Self::HardSwish => Activation::HardSwish(HardSwish),
            Self::Swish => Activation::Swish(Swish),
        }
    }
}

/// Activation Layer Wrapper.
#[derive(Module, Clone, Debug)]
pub enum Activation {
    /// [`Gelu`] activation.
    Gelu(Gelu),

    /// [`HardSwish`] activation.
    HardSwish(HardSwish),

    /// [`Swish`] activation.
    Swish(Swish),
}

impl Activation {
    /// Forward pass.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Self::Gelu(layer) => layer.forward(input),
            Self::HardSwish(layer) => layer.forward(input),
            Self::Swish(layer) => layer.forward(input),
        }
    }
}
