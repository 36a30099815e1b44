//! # Patching Layers
//!
//! * [`patch_embed`] - 2d patch embedding layer.
pub mod patch_embed;
