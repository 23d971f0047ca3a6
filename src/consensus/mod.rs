//! Consensus module - difficulty retarget, rewards and checkpoints

mod block;
mod checkpoints;
mod difficulty;
mod rewards;
mod target;

pub use block::*;
pub use checkpoints::*;
pub use difficulty::*;
pub use rewards::*;
pub use target::*;
