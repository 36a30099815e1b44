//! # Miscellaneous Blocks
//!
//! * [`cna`] - ``Conv2d + Norm + Activation`` block.
//! * [`conv_norm`] - ``Conv2d + BatchNorm2d`` block.
pub mod cna;
pub mod conv_norm;
