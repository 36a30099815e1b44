//! # CoorLGNet
//!
//! A hybrid conv/transformer image classifier mixing windowed local
//! attention, spatial-reduction global attention, coordinate attention,
//! and multi-branch convolutional feed-forward blocks.
pub mod block;
pub mod checkpoint;
pub mod coorlg_model;
pub mod ffn;
pub mod global_attention;
pub mod head;
pub mod prefabs;
pub mod res2_mlp;
pub mod stage;
pub mod stem;
pub mod window_attention;
pub mod windowing;
