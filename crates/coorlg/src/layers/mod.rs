//! Reusable layers: init rules, conv blocks, drop path, attention, patching.
pub mod attention;
pub mod blocks;
pub mod drop;
pub mod init;
pub mod patching;
