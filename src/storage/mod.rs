//! Storage module - in-memory header index

mod chain;

pub use chain::*;
