//! # Drop Layers
//!
//! * [`drop_path`] - drop path / stochastic depth.
//! * [`dpr`] - progressive drop path rate schedules.
pub mod dpr;
pub mod drop_path;
