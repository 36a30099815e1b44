//! # Layer Initialization
//!
//! Weight initialization is keyed on the declared kind of layer being
//! built, rather than on inspecting the built module:
//!
//! | kind | weight | bias |
//! |---|---|---|
//! | [`LayerKind::Linear`] | ``Normal(0, 0.02)`` | zeros |
//! | [`LayerKind::Conv2d`] | ``KaimingNormal(gain=sqrt(2), fan_out)`` | zeros |
//!
//! Norm layers use the ``burn`` defaults (``gamma = 1, beta = 0``).

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::Backend;

/// The kind of layer being initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Fully connected layers.
    Linear,

    /// 2d convolution layers.
    Conv2d,
}

impl LayerKind {
    /// The weight [`Initializer`] for this kind of layer.
    pub fn weight_initializer(&self) -> Initializer {
        match self {
            LayerKind::Linear => Initializer::Normal {
                mean: 0.0,
                std: 0.02,
            },
            LayerKind::Conv2d => Initializer::KaimingNormal {
                gain: 2.0_f64.sqrt(),
                fan_out_only: true,
            },
        }
    }

    /// The bias [`Initializer`] for this kind of layer.
    pub fn bias_initializer(&self) -> Initializer {
        Initializer::Zeros
    }
}

/// Initialize a [`Linear`] layer with the [`LayerKind::Linear`] policy.
pub fn init_linear<B: Backend>(
    config: LinearConfig,
    device: &B::Device,
) -> Linear<B> {
    let kind = LayerKind::Linear;
    let mut layer = config
        .with_initializer(kind.weight_initializer())
        .init(device);

    let [d_output] = match &layer.bias {
        Some(bias) => bias.dims(),
        None => return layer,
    };
    layer.bias = Some(kind.bias_initializer().init([d_output], device));
    layer
}

/// Initialize a [`Conv2d`] layer with the [`LayerKind::Conv2d`] policy.
pub fn init_conv2d<B: Backend>(
    config: Conv2dConfig,
    device: &B::Device,
) -> Conv2d<B> {
    let kind = LayerKind::Conv2d;
    let mut layer = config
        .with_initializer(kind.weight_initializer())
        .init(device);

    let [out_channels] = match &layer.bias {
        Some(bias) => bias.dims(),
        None => return layer,
    };
    layer.bias = Some(kind.bias_initializer().init([out_channels], device));
    layer
}
