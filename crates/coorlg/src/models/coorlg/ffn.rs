//! # Two-layer channel MLP.
//!
//! ``fc1 -> act -> drop -> fc2 -> drop``, applied per token.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::layers::drop::drop_path::expect_probability;
use crate::layers::init::init_linear;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};

/// [`Ffn`] Meta API.
pub trait FfnMeta {
    /// Input feature size.
    fn d_input(&self) -> usize;

    /// Hidden feature size.
    fn d_hidden(&self) -> usize;

    /// Output feature size.
    fn d_output(&self) -> usize;
}

/// [`Ffn`] Config.
#[derive(Config, Debug)]
pub struct FfnConfig {
    /// Input feature size.
    pub d_input: usize,

    /// Hidden feature size; defaults to ``d_input``.
    #[config(default = "None")]
    pub d_hidden: Option<usize>,

    /// Output feature size; defaults to ``d_input``.
    #[config(default = "None")]
    pub d_output: Option<usize>,

    /// Hidden activation.
    #[config(default = "ActivationConfig::Gelu")]
    pub act: ActivationConfig,

    /// Dropout after each layer.
    #[config(default = 0.0)]
    pub drop: f64,
}

impl FfnMeta for FfnConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_hidden(&self) -> usize {
        self.d_hidden.unwrap_or(self.d_input)
    }

    fn d_output(&self) -> usize {
        self.d_output.unwrap_or(self.d_input)
    }
}

impl FfnConfig {
    /// Initialize an [`Ffn`] module.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Ffn<B> {
        Ffn {
            fc1: init_linear(LinearConfig::new(self.d_input(), self.d_hidden()), device),
            act: self.act.init(),
            fc2: init_linear(LinearConfig::new(self.d_hidden(), self.d_output()), device),
            drop: DropoutConfig::new(expect_probability(self.drop)).init(),
        }
    }
}

/// Two-layer channel MLP.
#[derive(Module, Debug)]
pub struct Ffn<B: Backend> {
    /// Input projection.
    pub fc1: Linear<B>,

    /// Hidden activation.
    pub act: Activation,

    /// Output projection.
    pub fc2: Linear<B>,

    /// Shared dropout.
    pub drop: Dropout,
}

impl<B: Backend> FfnMeta for Ffn<B> {
    fn d_input(&self) -> usize {
        self.fc1.weight.dims()[0]
    }

    fn d_hidden(&self) -> usize {
        self.fc1.weight.dims()[1]
    }

    fn d_output(&self) -> usize {
        self.fc2.weight.dims()[1]
    }
}

impl<B: Backend> Ffn<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, tokens, d_input]``
    ///
    /// # Returns
    ///
    /// ``[batch, tokens, d_output]``
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let [batch, tokens] = unpack_shape_contract!(
            ["batch", "tokens", "d_input"],
            &x,
            &["batch", "tokens"],
            &[("d_input", self.d_input())]
        );

        let x = self.fc1.forward(x);
        let x = self.act.forward(x);
        let x = self.drop.forward(x);
        let x = self.fc2.forward(x);
        let x = self.drop.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "tokens", "d_output"],
            &x,
            &[
                ("batch", batch),
                ("tokens", tokens),
                ("d_output", self.d_output())
            ]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::activation::gelu;
    use burn::tensor::{Distribution, Tolerance};

    #[test]
    fn test_config() {
        let config = FfnConfig::new(46);
        assert_eq!(config.d_hidden(), 46);
        assert_eq!(config.d_output(), 46);

        let config = config.with_d_hidden(Some(165));
        assert_eq!(config.d_hidden(), 165);
        assert_eq!(config.d_output(), 46);
    }

    #[test]
    fn test_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let module: Ffn<B> = FfnConfig::new(6)
            .with_d_hidden(Some(10))
            .with_drop(0.5)
            .init(&device);
        assert_eq!(module.d_hidden(), 10);

        let x = Tensor::<B, 3>::random([2, 5, 6], Distribution::Default, &device);
        let y = module.forward(x.clone());

        // Dropout is inert without autodiff.
        let expected = module.fc2.forward(gelu(module.fc1.forward(x)));
        y.to_data()
            .assert_approx_eq(&expected.to_data(), Tolerance::<f64>::default());
    }
}
