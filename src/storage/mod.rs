//! Storage module - block store, indices and cache files

mod block_index;
pub mod cache;
mod db;
mod indices;

pub use block_index::*;
pub use db::*;
pub use indices::*;
