//! # `Res2Mlp` - multi-branch convolutional feed-forward.
//!
//! The token map is expanded by a 1x1 conv, split into ``scale`` channel
//! groups of ``width``, and run through a cascade of depth-wise 3x3
//! branches; each branch sees its own group plus the previous branch's
//! output. The branch outputs (and the untouched last group) are
//! re-joined, projected back by a 1x1 conv, and added to the input.
//!
//! ```text
//! width = floor(d_hidden * base_width / 64)
//! out_0 = branch_0(g_0)
//! out_i = branch_i(g_i + out_{i-1})
//! y     = gelu(project(cat[out_0, .., out_{nums-1}, g_{scale-1}]) + x)
//! ```
//!
//! See: [Res2Net](https://arxiv.org/abs/1904.01169)

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::layers::blocks::cna::{CNA2d, CNA2dConfig};
use crate::layers::blocks::conv_norm::{Conv2dNormBlock, Conv2dNormBlockConfig};
use crate::layers::drop::drop_path::expect_probability;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::Conv2dConfig;
use burn::nn::{Dropout, DropoutConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

/// [`Res2Mlp`] Meta API.
pub trait Res2MlpMeta {
    /// Input/output feature size.
    fn d_input(&self) -> usize;

    /// Channels per group.
    fn width(&self) -> usize;

    /// Number of channel groups.
    fn scale(&self) -> usize;

    /// Number of cascaded branch convolutions.
    fn nums(&self) -> usize {
        if self.scale() == 1 { 1 } else { self.scale() - 1 }
    }

    /// Expanded feature size.
    fn d_expanded(&self) -> usize {
        self.width() * self.scale()
    }
}

/// [`Res2Mlp`] Config.
#[derive(Config, Debug)]
pub struct Res2MlpConfig {
    /// Input feature size.
    pub d_input: usize,

    /// Hidden feature size; sets the group width.
    pub d_hidden: usize,

    /// Output feature size; must equal ``d_input`` when set.
    #[config(default = "None")]
    pub d_output: Option<usize>,

    /// Group width per 64 hidden features.
    #[config(default = 26)]
    pub base_width: usize,

    /// Number of channel groups.
    #[config(default = 4)]
    pub scale: usize,

    /// Output dropout.
    #[config(default = 0.0)]
    pub drop: f64,
}

impl Res2MlpMeta for Res2MlpConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn width(&self) -> usize {
        self.d_hidden * self.base_width / 64
    }

    fn scale(&self) -> usize {
        self.scale
    }
}

impl Res2MlpConfig {
    /// Initialize a [`Res2Mlp`] module.
    ///
    /// # Panics
    ///
    /// If ``d_output != d_input``, or the group width is zero.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Res2Mlp<B> {
        let d_input = self.d_input();
        if let Some(d_output) = self.d_output {
            assert_eq!(
                d_output, d_input,
                "Res2Mlp requires d_output ({d_output}) == d_input ({d_input})"
            );
        }
        let width = self.width();
        assert!(
            width > 0 && self.scale > 0,
            "Res2Mlp requires a non-empty group width: {self:?}"
        );
        let expanded = self.d_expanded();

        let expand = CNA2dConfig::new(Conv2dConfig::new([d_input, expanded], [1, 1]))
            .with_act(ActivationConfig::Gelu)
            .with_act_first(true)
            .init(device);

        let branches = (0..self.nums())
            .map(|_| {
                CNA2dConfig::new(
                    Conv2dConfig::new([width, width], [3, 3])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .with_groups(width)
                        .with_bias(false),
                )
                .with_act(ActivationConfig::Gelu)
                .init(device)
            })
            .collect();

        let project: Conv2dNormBlockConfig = Conv2dConfig::new([expanded, d_input], [1, 1]).into();

        Res2Mlp {
            width,
            scale: self.scale,
            expand,
            branches,
            project: project.init(device),
            act: ActivationConfig::Gelu.init(),
            drop: DropoutConfig::new(expect_probability(self.drop)).init(),
        }
    }
}

/// Multi-branch convolutional feed-forward module.
#[derive(Module, Debug)]
pub struct Res2Mlp<B: Backend> {
    /// Channels per group.
    pub width: usize,

    /// Number of channel groups.
    pub scale: usize,

    /// ``conv1x1 -> gelu -> bn`` expansion.
    pub expand: CNA2d<B>,

    /// Cascaded depth-wise ``conv3x3 -> bn -> gelu`` branches.
    pub branches: Vec<CNA2d<B>>,

    /// ``conv1x1 -> bn`` projection.
    pub project: Conv2dNormBlock<B>,

    /// Post-residual activation.
    pub act: Activation,

    /// Output dropout.
    pub drop: Dropout,
}

impl<B: Backend> Res2MlpMeta for Res2Mlp<B> {
    fn d_input(&self) -> usize {
        self.expand.conv.weight.dims()[1]
    }

    fn width(&self) -> usize {
        self.width
    }

    fn scale(&self) -> usize {
        self.scale
    }
}

impl<B: Backend> Res2Mlp<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, height * width, d_input]``
    /// - `resolution`: ``[height, width]``
    ///
    /// # Returns
    ///
    /// ``[batch, height * width, d_input]``
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        resolution: [usize; 2],
    ) -> Tensor<B, 3> {
        let [height, width] = resolution;
        let d_input = self.d_input();
        let [batch] = unpack_shape_contract!(
            ["batch", "tokens" = "height" * "width", "d_input"],
            &x,
            &["batch"],
            &[("height", height), ("width", width), ("d_input", d_input)]
        );

        let x = x.swap_dims(1, 2).reshape([batch, d_input, height, width]);
        let residual = x.clone();

        let groups = self.expand.forward(x).chunk(self.scale, 1);

        let mut outs = Vec::with_capacity(self.scale);
        let mut carry: Option<Tensor<B, 4>> = None;
        for (group, branch) in groups.iter().zip(self.branches.iter()) {
            let input = match carry {
                Some(prev) => group.clone() + prev,
                None => group.clone(),
            };
            let out = branch.forward(input);
            outs.push(out.clone());
            carry = Some(out);
        }
        if self.scale != 1 {
            outs.extend(groups.last().cloned());
        }

        let x = self.project.forward(Tensor::cat(outs, 1));
        let x = self.act.forward(x + residual);

        let x = x.flatten::<3>(2, 3).swap_dims(1, 2);

        assert_shape_contract_periodically!(
            ["batch", "tokens", "d_input"],
            &x,
            &[
                ("batch", batch),
                ("tokens", height * width),
                ("d_input", d_input)
            ]
        );

        self.drop.forward(x)
    }
}
