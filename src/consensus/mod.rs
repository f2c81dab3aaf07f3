//! Consensus module - blocks, currency parameters, difficulty, rewards,
//! checkpoints and the upgrade detector

mod block;
mod checkpoints;
mod currency;
mod difficulty;
mod rewards;
mod upgrade;

pub use block::*;
pub use checkpoints::*;
pub use currency::*;
pub use difficulty::*;
pub use rewards::*;
pub use upgrade::*;
