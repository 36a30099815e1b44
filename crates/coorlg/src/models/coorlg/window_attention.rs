//! # Windowed local attention
//!
//! Multi-head self-attention within ``window_size x window_size`` tiles,
//! with a learned relative position bias shared by every tile.
//!
//! The bias table holds one entry per ``(dy, dx)`` offset per head;
//! a constant index maps each ``(query, key)`` pair in a tile to its
//! offset row:
//!
//! ```text
//! index[i][j] = (dy + ws - 1) * (2 * ws - 1) + (dx + ws - 1)
//! (dy, dx) = coord(i) - coord(j)
//! ```

use crate::layers::drop::drop_path::expect_probability;
use crate::layers::init::init_linear;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig};
use burn::prelude::{Backend, Int, Tensor, TensorData};
use burn::tensor::activation::softmax;

/// Build the relative position index for a square tile.
///
/// # Returns
///
/// ``[ws*ws, ws*ws]`` indices into a ``(2*ws-1)^2`` offset table.
pub fn relative_position_index<B: Backend>(
    window_size: usize,
    device: &B::Device,
) -> Tensor<B, 2, Int> {
    let ws = window_size as i64;
    let n = window_size * window_size;

    let coords: Vec<(i64, i64)> = (0..ws)
        .flat_map(|y| (0..ws).map(move |x| (y, x)))
        .collect();

    let mut index = Vec::with_capacity(n * n);
    for &(yi, xi) in &coords {
        for &(yj, xj) in &coords {
            let dy = yi - yj + ws - 1;
            let dx = xi - xj + ws - 1;
            index.push(dy * (2 * ws - 1) + dx);
        }
    }

    Tensor::from_data(TensorData::new(index, [n, n]), device)
}

/// [`WindowAttention`] Meta API.
pub trait WindowAttentionMeta {
    /// Input/output feature size.
    fn d_input(&self) -> usize;

    /// Number of attention heads.
    fn num_heads(&self) -> usize;

    /// Tile size.
    fn window_size(&self) -> usize;

    /// The query/key feature size.
    fn qk_dim(&self) -> usize;

    /// The (unused) spatial reduction ratio.
    fn sr_ratio(&self) -> usize;

    /// Tokens per tile.
    fn window_tokens(&self) -> usize {
        self.window_size() * self.window_size()
    }

    /// The query scale, ``(d_input / num_heads)^-0.5``.
    fn head_scale(&self) -> f64 {
        ((self.d_input() / self.num_heads()) as f64).powf(-0.5)
    }
}

/// [`WindowAttention`] Config.
#[derive(Config, Debug)]
pub struct WindowAttentionConfig {
    /// Input/output feature size.
    pub d_input: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Tile size.
    #[config(default = 7)]
    pub window_size: usize,

    /// Enable bias on the q/k/v projections.
    #[config(default = true)]
    pub qkv_bias: bool,

    /// Query/key feature reduction.
    #[config(default = 1)]
    pub qk_ratio: usize,

    /// Spatial reduction ratio; recorded, but not used by the attention.
    #[config(default = 1)]
    pub sr_ratio: usize,

    /// Dropout on attention weights.
    #[config(default = 0.0)]
    pub attn_drop: f64,

    /// Dropout on the output projection.
    #[config(default = 0.0)]
    pub proj_drop: f64,
}

impl WindowAttentionMeta for WindowAttentionConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn window_size(&self) -> usize {
        self.window_size
    }

    fn qk_dim(&self) -> usize {
        self.d_input / self.qk_ratio
    }

    fn sr_ratio(&self) -> usize {
        self.sr_ratio
    }
}

impl WindowAttentionConfig {
    /// Initialize a [`WindowAttention`] module.
    ///
    /// # Panics
    ///
    /// If the head count does not divide the q/k or v feature sizes.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> WindowAttention<B> {
        let d_input = self.d_input();
        let heads = self.num_heads();
        let qk_dim = self.qk_dim();
        assert!(
            d_input % heads == 0 && qk_dim % heads == 0,
            "num_heads ({heads}) must divide d_input ({d_input}) and qk_dim ({qk_dim})"
        );

        let ws = self.window_size();
        let offsets = (2 * ws - 1) * (2 * ws - 1);

        WindowAttention {
            num_heads: heads,
            window_size: ws,
            sr_ratio: self.sr_ratio,
            q: init_linear(
                LinearConfig::new(d_input, qk_dim).with_bias(self.qkv_bias),
                device,
            ),
            k: init_linear(
                LinearConfig::new(d_input, qk_dim).with_bias(self.qkv_bias),
                device,
            ),
            v: init_linear(
                LinearConfig::new(d_input, d_input).with_bias(self.qkv_bias),
                device,
            ),
            proj: init_linear(LinearConfig::new(d_input, d_input), device),
            relative_position_bias_table: Initializer::Normal {
                mean: 0.0,
                std: 0.02,
            }
            .init([offsets, heads], device),
            relative_position_index: relative_position_index(ws, device),
            attn_drop: DropoutConfig::new(expect_probability(self.attn_drop)).init(),
            proj_drop: DropoutConfig::new(expect_probability(self.proj_drop)).init(),
        }
    }
}

/// Windowed multi-head self-attention.
#[derive(Module, Debug)]
pub struct WindowAttention<B: Backend> {
    /// Number of attention heads.
    pub num_heads: usize,

    /// Tile size.
    pub window_size: usize,

    /// Spatial reduction ratio; not used.
    pub sr_ratio: usize,

    /// Query projection.
    pub q: Linear<B>,

    /// Key projection.
    pub k: Linear<B>,

    /// Value projection.
    pub v: Linear<B>,

    /// Output projection.
    pub proj: Linear<B>,

    /// ``[(2*ws-1)^2, heads]`` learned offset biases.
    pub relative_position_bias_table: Param<Tensor<B, 2>>,

    /// ``[ws*ws, ws*ws]`` constant offset index.
    pub relative_position_index: Tensor<B, 2, Int>,

    /// Attention weight dropout.
    pub attn_drop: Dropout,

    /// Output dropout.
    pub proj_drop: Dropout,
}

impl<B: Backend> WindowAttentionMeta for WindowAttention<B> {
    fn d_input(&self) -> usize {
        self.v.weight.dims()[0]
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn window_size(&self) -> usize {
        self.window_size
    }

    fn qk_dim(&self) -> usize {
        self.q.weight.dims()[1]
    }

    fn sr_ratio(&self) -> usize {
        self.sr_ratio
    }
}

impl<B: Backend> WindowAttention<B> {
    /// The gathered relative position bias.
    ///
    /// # Returns
    ///
    /// ``[heads, ws*ws, ws*ws]``
    pub fn relative_position_bias(&self) -> Tensor<B, 3> {
        let n = self.window_tokens();
        let idx = self.relative_position_index.clone().reshape([n * n]);

        self.relative_position_bias_table
            .val()
            .select(0, idx)
            .reshape([n, n, self.num_heads])
            .permute([2, 0, 1])
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `x`: ``[batch * num_windows, ws*ws, d_input]``
    ///
    /// # Returns
    ///
    /// ``[batch * num_windows, ws*ws, d_input]``
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let heads = self.num_heads();
        let d_input = self.d_input();
        let [b_nw] = unpack_shape_contract!(
            ["b_nw", "tokens" = "ws" * "ws", "d_input"],
            &x,
            &["b_nw"],
            &[("ws", self.window_size()), ("d_input", d_input)]
        );
        let n = self.window_tokens();
        let qk_head = self.qk_dim() / heads;
        let v_head = d_input / heads;

        let q = self
            .q
            .forward(x.clone())
            .reshape([b_nw, n, heads, qk_head])
            .swap_dims(1, 2)
            .mul_scalar(self.head_scale());
        let k = self
            .k
            .forward(x.clone())
            .reshape([b_nw, n, heads, qk_head])
            .swap_dims(1, 2);
        let v = self
            .v
            .forward(x)
            .reshape([b_nw, n, heads, v_head])
            .swap_dims(1, 2);

        // [b_nw, heads, n, n]
        let attn = q.matmul(k.swap_dims(2, 3));
        let attn = attn + self.relative_position_bias().unsqueeze::<4>();
        let attn = softmax(attn, 3);
        let attn = self.attn_drop.forward(attn);

        let x = attn.matmul(v).swap_dims(1, 2).reshape([b_nw, n, d_input]);
        let x = self.proj.forward(x);
        let x = self.proj_drop.forward(x);

        assert_shape_contract_periodically!(
            ["b_nw", "tokens", "d_input"],
            &x,
            &[("b_nw", b_nw), ("tokens", n), ("d_input", d_input)]
        );

        x
    }
}
