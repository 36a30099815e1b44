//! # `CoorLGNet` - the top-level network.
//!
//! ```text
//! (B, 3, S, S)
//!   stem    -> (B, stem_channels, S/2, S/2)
//!   stage 0 -> (B, embed_dims[0], S/4, S/4)
//!   stage 1 -> (B, embed_dims[1], S/8, S/8)
//!   stage 2 -> (B, embed_dims[2], S/16, S/16)
//!   stage 3 -> (B, embed_dims[3], S/32, S/32)
//!   head    -> (B, num_classes)
//! ```

use crate::layers::drop::dpr::DropPathRateDepthTable;
use crate::layers::drop::drop_path::expect_probability;
use crate::models::coorlg::head::{CoorLGHead, CoorLGHeadConfig, CoorLGHeadMeta, init_classifier};
use crate::models::coorlg::stage::{CoorLGStage, CoorLGStageConfig, CoorLGStageMeta};
use crate::models::coorlg::stem::{CoorLGStem, CoorLGStemConfig};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// Number of stages.
pub const NUM_STAGES: usize = 4;

/// Image size must be divisible by this.
pub const TOTAL_REDUCTION: usize = 32;

/// [`CoorLGNet`] Meta API.
pub trait CoorLGNetMeta {
    /// Image size.
    fn img_size(&self) -> usize;

    /// Image channels.
    fn in_channels(&self) -> usize;

    /// Number of classes; ``0`` disables the classifier.
    fn num_classes(&self) -> usize;

    /// Size of the pre-classifier features.
    fn num_features(&self) -> usize;
}

/// [`CoorLGNet`] Config.
#[derive(Config, Debug)]
pub struct CoorLGNetConfig {
    /// Square image size.
    #[config(default = 224)]
    pub img_size: usize,

    /// Image channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// Number of classes; ``0`` disables the classifier.
    #[config(default = 2)]
    pub num_classes: usize,

    /// Per-stage token feature size.
    #[config(default = "[46, 92, 184, 368]")]
    pub embed_dims: [usize; NUM_STAGES],

    /// Stem output channels.
    #[config(default = 16)]
    pub stem_channels: usize,

    /// Head feature size.
    #[config(default = 1280)]
    pub fc_dim: usize,

    /// Per-stage attention heads.
    #[config(default = "[1, 2, 4, 8]")]
    pub num_heads: [usize; NUM_STAGES],

    /// Per-stage feed-forward expansion ratio.
    #[config(default = "[3.6, 3.6, 3.6, 3.6]")]
    pub mlp_ratios: [f64; NUM_STAGES],

    /// Enable bias on the q/k/v projections.
    #[config(default = true)]
    pub qkv_bias: bool,

    /// Override for the global attention logit scale.
    #[config(default = "None")]
    pub qk_scale: Option<f64>,

    /// Representation layer size.
    #[config(default = "None")]
    pub representation_size: Option<usize>,

    /// Block dropout.
    #[config(default = 0.2)]
    pub drop_rate: f64,

    /// Attention weight dropout.
    #[config(default = 0.0)]
    pub attn_drop_rate: f64,

    /// Stochastic depth rate of the last block.
    #[config(default = 0.0)]
    pub drop_path_rate: f64,

    /// Per-stage block counts.
    #[config(default = "[2, 2, 10, 2]")]
    pub depths: [usize; NUM_STAGES],

    /// Query/key feature reduction.
    #[config(default = 1)]
    pub qk_ratio: usize,

    /// Per-stage global attention spatial reduction.
    #[config(default = "[8, 4, 2, 1]")]
    pub sr_ratios: [usize; NUM_STAGES],

    /// Local attention tile size.
    #[config(default = 7)]
    pub window_size: usize,

    /// Head dropout.
    #[config(default = 0.1)]
    pub head_drop_rate: f64,
}

impl CoorLGNetMeta for CoorLGNetConfig {
    fn img_size(&self) -> usize {
        self.img_size
    }

    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn num_features(&self) -> usize {
        self.head_config().num_features()
    }
}

impl CoorLGNetConfig {
    /// Adapt the config for fine-tuning on ``num_classes``.
    ///
    /// The representation layer is dropped unless the class count
    /// matches the default.
    pub fn for_finetune(
        self,
        num_classes: usize,
    ) -> Self {
        let default_classes = Self::new().num_classes;
        let representation_size = match self.representation_size {
            Some(size) if num_classes != default_classes => {
                tracing::warn!(
                    representation_size = size,
                    num_classes,
                    "removing representation layer for fine-tuning"
                );
                None
            }
            other => other,
        };

        Self {
            num_classes,
            representation_size,
            ..self
        }
    }

    /// The stem config.
    pub fn stem_config(&self) -> CoorLGStemConfig {
        CoorLGStemConfig::new(self.in_channels, self.stem_channels)
    }

    /// The per-stage configs.
    pub fn stage_configs(&self) -> Vec<CoorLGStageConfig> {
        let dpr = DropPathRateDepthTable::new(self.drop_path_rate, &self.depths);
        let stem_reduction = self.stem_config().reduction();

        (0..NUM_STAGES)
            .map(|i| {
                let size = self.img_size / (stem_reduction << i);
                let d_input = match i {
                    0 => self.stem_channels,
                    _ => self.embed_dims[i - 1],
                };
                CoorLGStageConfig::new(
                    [size, size],
                    d_input,
                    self.embed_dims[i],
                    self.depths[i],
                    self.num_heads[i],
                )
                .with_mlp_ratio(self.mlp_ratios[i])
                .with_qkv_bias(self.qkv_bias)
                .with_qk_scale(self.qk_scale)
                .with_qk_ratio(self.qk_ratio)
                .with_sr_ratio(self.sr_ratios[i])
                .with_window_size(self.window_size)
                .with_drop(self.drop_rate)
                .with_attn_drop(self.attn_drop_rate)
                .with_drop_path_rates(dpr.stage_dprs(i))
            })
            .collect()
    }

    /// The head config.
    pub fn head_config(&self) -> CoorLGHeadConfig {
        CoorLGHeadConfig::new(self.embed_dims[NUM_STAGES - 1])
            .with_fc_dim(self.fc_dim)
            .with_num_classes(self.num_classes)
            .with_representation_size(self.representation_size)
            .with_drop(self.head_drop_rate)
    }

    /// Initialize a [`CoorLGNet`].
    ///
    /// # Panics
    ///
    /// On invalid head counts, probabilities, or image sizes.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> CoorLGNet<B> {
        assert!(
            self.img_size > 0 && self.img_size % TOTAL_REDUCTION == 0,
            "img_size ({}) must be a positive multiple of {TOTAL_REDUCTION}",
            self.img_size
        );
        for i in 0..NUM_STAGES {
            let (dim, heads) = (self.embed_dims[i], self.num_heads[i]);
            assert!(
                heads > 0 && dim % heads == 0,
                "embed_dims[{i}] ({dim}) must be divisible by num_heads[{i}] ({heads})"
            );
        }
        expect_probability(self.drop_rate);
        expect_probability(self.attn_drop_rate);
        expect_probability(self.drop_path_rate);
        expect_probability(self.head_drop_rate);

        let stem = self.stem_config().init(device);
        let stages = self
            .stage_configs()
            .iter()
            .map(|config| config.init(device))
            .collect();
        let head = self.head_config().init(device);

        tracing::debug!(
            img_size = self.img_size,
            num_classes = self.num_classes,
            depths = ?self.depths,
            "initialized CoorLGNet"
        );

        CoorLGNet {
            img_size: self.img_size,
            stem,
            stages,
            head,
        }
    }
}

/// Hybrid local/global conv-transformer classifier.
#[derive(Module, Debug)]
pub struct CoorLGNet<B: Backend> {
    /// Square image size.
    pub img_size: usize,

    /// Convolutional stem.
    pub stem: CoorLGStem<B>,

    /// The stages.
    pub stages: Vec<CoorLGStage<B>>,

    /// Pooling classifier head.
    pub head: CoorLGHead<B>,
}

impl<B: Backend> CoorLGNetMeta for CoorLGNet<B> {
    fn img_size(&self) -> usize {
        self.img_size
    }

    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn num_classes(&self) -> usize {
        self.head.num_classes()
    }

    fn num_features(&self) -> usize {
        self.head.num_features()
    }
}

impl<B: Backend> CoorLGNet<B> {
    /// Replace the classifier with a freshly initialized one.
    ///
    /// ``num_classes == 0`` removes it.
    pub fn with_classes(
        self,
        num_classes: usize,
    ) -> Self {
        let device = self.devices().into_iter().next().unwrap_or_default();
        let classifier = init_classifier(self.num_features(), num_classes, &device);
        Self {
            head: CoorLGHead {
                classifier,
                ..self.head
            },
            ..self
        }
    }

    /// Run the stem and stages.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, in_channels, img_size, img_size]``
    ///
    /// # Returns
    ///
    /// ``[batch, embed_dims[3], img_size / 32, img_size / 32]``
    pub fn forward_stages(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.stem.forward(x);
        self.stages.iter().fold(x, |x, stage| stage.forward(x))
    }

    /// Pre-classifier features.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, in_channels, img_size, img_size]``
    ///
    /// # Returns
    ///
    /// ``[batch, num_features]``
    pub fn forward_features(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &x,
            &["batch"],
            &[
                ("in_channels", self.in_channels()),
                ("height", self.img_size),
                ("width", self.img_size)
            ]
        );

        let x = self.head.forward_features(self.forward_stages(x));

        assert_shape_contract_periodically!(
            ["batch", "features"],
            &x,
            &[("batch", batch), ("features", self.num_features())]
        );

        x
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch, in_channels, img_size, img_size]``
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]``, or ``[batch, num_features]`` without a classifier.
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        self.head.classify(self.forward_features(x))
    }
}
