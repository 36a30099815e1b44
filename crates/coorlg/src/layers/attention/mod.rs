//! # Attention Layers
//!
//! * [`coord_attention`] - coordinate attention over ``(B, C, H, W)`` maps.
pub mod coord_attention;
