//! P2P networking module - framing, peer book and masternode payment gossip

mod handler;
mod peer;
mod protocol;

pub use handler::*;
pub use peer::*;
pub use protocol::*;
