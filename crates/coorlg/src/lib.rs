#![warn(missing_docs)]
//!# coorlg - CoorLGNet for Burn
//!
//! ## Notable Components
//!
//! * [`compat`] - compat code, ported or planned for an upcoming release of ``burn``.
//!   * [`compat::activation_wrapper::Activation`] - activation layer abstraction wrapper.
//!   * [`compat::normalization_wrapper::Normalization`] - norm layer abstraction wrapper.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::attention::coord_attention`] - coordinate attention.
//!   * [`layers::blocks`] - miscellaneous blocks.
//!     * [`layers::blocks::cna`] - ``Conv2d + Norm + Activation`` block.
//!     * [`layers::blocks::conv_norm`] - ``Conv2d + BatchNorm2d`` block.
//!   * [`layers::drop`] - dropout layers.
//!     * [`layers::drop::drop_path`] - drop path / stochastic depth.
//!   * [`layers::init`] - layer-kind weight initializers.
//!   * [`layers::patching::patch_embed`] - 2d patch embedding layer.
//! * [`models`] - complete model families.
//!   * [`models::coorlg`] - `CoorLGNet`
//!     * [`models::coorlg::coorlg_model`] - the network and its config.
//!     * [`models::coorlg::prefabs`] - prefab configs and input preprocessing.
//!     * [`models::coorlg::checkpoint`] - checkpoint save / load.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod compat;

#[cfg(test)]
pub(crate) mod testing;

pub mod layers;

pub mod models;
