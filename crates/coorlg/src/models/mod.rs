//! Model families.
pub mod coorlg;
