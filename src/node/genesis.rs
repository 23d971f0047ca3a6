//! Genesis header generation for CampusCash (CCASH)
//!
//! The genesis header is fully determined by the network parameters, so
//! every node derives the same height-0 checkpoint.

use crate::consensus::{target_to_compact, BlockHeader, BlockKind};
use crate::crypto::{hash_bytes, Hash};

use super::ChainParams;

/// Headline embedded in the genesis coinbase
pub const GENESIS_TIMESTAMP_TEXT: &str =
    "The COVID-19 Economy in Isolation | Brian Wallace | May 14, 2020 | Infographics | TheMerkle";

/// Genesis block version
const GENESIS_VERSION: u32 = 1;

/// Create the genesis header for a network
///
/// Reproducible byte-for-byte from the parameter set.
pub fn create_genesis_header(params: &ChainParams) -> BlockHeader {
    BlockHeader {
        version: GENESIS_VERSION,
        prev_hash: Hash::zero(),
        merkle_root: hash_bytes(GENESIS_TIMESTAMP_TEXT.as_bytes()),
        timestamp: params.genesis_time,
        bits: target_to_compact(params.pow_limit),
        nonce: params.genesis_nonce,
        kind: BlockKind::ProofOfWork,
    }
}

/// Genesis block statistics
#[derive(Debug)]
pub struct GenesisInfo {
    pub hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u64,
    pub bits: u32,
}

impl GenesisInfo {
    pub fn new(params: &ChainParams) -> Self {
        let genesis = create_genesis_header(params);
        Self {
            hash: genesis.hash(),
            merkle_root: genesis.merkle_root,
            timestamp: genesis.timestamp,
            bits: genesis.bits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_deterministic() {
        let params = ChainParams::main();
        assert_eq!(create_genesis_header(&params), create_genesis_header(&params));
    }

    #[test]
    fn test_networks_have_distinct_genesis() {
        let main = GenesisInfo::new(&ChainParams::main());
        let testnet = GenesisInfo::new(&ChainParams::testnet());
        let regtest = GenesisInfo::new(&ChainParams::regtest());
        assert_ne!(main.hash, testnet.hash);
        assert_ne!(testnet.hash, regtest.hash);
        assert_eq!(main.merkle_root, testnet.merkle_root);
    }

    #[test]
    fn test_genesis_uses_pow_ceiling() {
        let params = ChainParams::main();
        let header = create_genesis_header(&params);
        assert_eq!(header.bits, target_to_compact(params.pow_limit));
        assert_eq!(header.timestamp, 1_589_457_600);
        assert_eq!(header.nonce, 14018);
    }
}
