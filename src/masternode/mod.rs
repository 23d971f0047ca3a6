//! Masternode module - payment winner election and gossip verification

mod payments;
mod registry;
mod winner;

pub use payments::*;
pub use registry::*;
pub use winner::*;
