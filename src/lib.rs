//! CampusCash (CCASH) Consensus Parameter Core
//!
//! The consensus-parameter layer of a hybrid PoW/PoS node: VRX difficulty
//! retargeting, the block subsidy schedule, masternode payment election and
//! the checkpoint reorg guard.
//!
//! Block validation, storage, wallets and transport internals are external;
//! this crate only ships the minimal in-memory collaborators it needs to run.

pub mod consensus;
pub mod crypto;
pub mod masternode;
pub mod node;
pub mod p2p;
pub mod storage;

/// Protocol constants shared by every network
pub mod constants {
    /// Base units per coin (8 decimal places)
    pub const COIN: u64 = 100_000_000;

    /// Number of decimal places
    pub const DECIMAL_PLACES: u8 = 8;

    /// Ticker used in logs and addresses
    pub const CHAIN_NAME: &str = "CCASH";

    /// Full chain name
    pub const CHAIN_FULL_NAME: &str = "CampusCash";

    /// Address prefix used when rendering payee scripts
    pub const ADDRESS_PREFIX: &str = "CC";

    /// Protocol version spoken by this node
    pub const PROTOCOL_VERSION: u32 = 60040;

    /// Peers below this version never receive or get trusted with winner relays
    pub const MIN_MASTERNODE_RELAY_VERSION: u32 = 60030;

    /// Convert a milli-coin figure (e.g. 2905 for 2.905 CCASH) to base units
    pub const fn milli_coins(milli: u64) -> u64 {
        milli * (COIN / 1000)
    }
}
