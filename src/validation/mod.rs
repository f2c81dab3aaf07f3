//! Validation module - transaction model and extra-field parsing

pub mod extra;
mod transaction;

pub use transaction::*;
