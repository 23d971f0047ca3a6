//! Block headers and the read-only chain view
//!
//! The consensus engine never owns the chain; it walks ancestry through the
//! [`ChainView`] trait supplied by the chain-index collaborator.

use serde::{Deserialize, Serialize};
use crate::crypto::Hash;

/// Production lane of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    ProofOfWork,
    ProofOfStake,
}

impl BlockKind {
    pub fn from_stake_flag(proof_of_stake: bool) -> Self {
        if proof_of_stake {
            BlockKind::ProofOfStake
        } else {
            BlockKind::ProofOfWork
        }
    }

    pub fn is_proof_of_stake(self) -> bool {
        self == BlockKind::ProofOfStake
    }

    /// Short label used in log lines
    pub fn label(self) -> &'static str {
        match self {
            BlockKind::ProofOfWork => "PoW",
            BlockKind::ProofOfStake => "PoS",
        }
    }
}

/// Block header fields the consensus parameters depend on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Protocol version
    pub version: u32,
    /// Hash of the previous block
    pub prev_hash: Hash,
    /// Merkle root of all transactions
    pub merkle_root: Hash,
    /// Block timestamp (seconds since Unix epoch)
    pub timestamp: u64,
    /// Difficulty target (compact representation)
    pub bits: u32,
    /// Nonce used for PoW
    pub nonce: u64,
    /// Which lane produced the block
    pub kind: BlockKind,
}

impl BlockHeader {
    /// Serialize the header for hashing
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + 32 + 32 + 8 + 4 + 8 + 1);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.prev_hash.0);
        bytes.extend_from_slice(&self.merkle_root.0);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.bits.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes.push(self.kind.is_proof_of_stake() as u8);
        bytes
    }

    /// Calculate the hash of this header
    pub fn hash(&self) -> Hash {
        crate::crypto::hash_bytes(&self.to_bytes())
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.kind.is_proof_of_stake()
    }
}

/// A header as seen through the chain index: position and running supply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedHeader {
    pub header: BlockHeader,
    pub hash: Hash,
    pub height: u64,
    /// Total coins in existence after this block (base units)
    pub money_supply: u64,
}

impl IndexedHeader {
    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn bits(&self) -> u32 {
        self.header.bits
    }

    pub fn kind(&self) -> BlockKind {
        self.header.kind
    }
}

/// Read-only ancestry access provided by the chain index
pub trait ChainView {
    /// Best known header
    fn tip(&self) -> Option<&IndexedHeader>;

    /// Look up an indexed header by hash
    fn get(&self, hash: &Hash) -> Option<&IndexedHeader>;

    /// Parent of `entry`, `None` at genesis or outside the view
    fn parent(&self, entry: &IndexedHeader) -> Option<&IndexedHeader> {
        self.get(&entry.header.prev_hash)
    }

    /// Most recent header at or before `from` produced by `kind`.
    ///
    /// Falls back to the oldest reachable ancestor when the lane has never
    /// produced a block.
    fn last_of_kind<'a>(&'a self, from: &'a IndexedHeader, kind: BlockKind) -> &'a IndexedHeader {
        let mut cursor = from;
        while cursor.kind() != kind {
            match self.parent(cursor) {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        cursor
    }
}
