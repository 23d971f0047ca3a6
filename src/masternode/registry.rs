//! Masternode registry
//!
//! The payment consensus only needs four questions answered about the
//! masternode list; [`MasternodeRegistry`] is that contract. The in-memory
//! registry elects by score against a per-height seed.

use serde::{Deserialize, Serialize};

use super::{calculate_score, PayeeScript, TxIn};
use crate::crypto::{hash_bytes, Hash, PublicKey};

/// Collateral tier of a masternode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MasternodeTier {
    One,
    Two,
}

/// Registered masternode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasternodeEntry {
    pub vin: TxIn,
    pub pubkey: PublicKey,
    pub tier: MasternodeTier,
}

impl MasternodeEntry {
    pub fn payee(&self) -> PayeeScript {
        PayeeScript::pay_to_key(&self.pubkey)
    }
}

pub trait MasternodeRegistry: Send + Sync {
    /// Node this instance elects when producing the winner for `height`
    fn current_eligible(&self, height: u64) -> Option<MasternodeEntry>;

    /// Winner every node derives for `height` without gossip
    fn deterministic_winner(&self, height: u64) -> Option<MasternodeEntry> {
        self.current_eligible(height)
    }

    /// Number of registered masternodes
    fn size(&self) -> usize;

    fn is_tier_two(&self, vin: &TxIn) -> bool;
}

/// Static masternode list held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    entries: Vec<MasternodeEntry>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a masternode; a second entry for the same collateral replaces the first
    pub fn register(&mut self, entry: MasternodeEntry) {
        self.entries.retain(|existing| existing.vin != entry.vin);
        self.entries.push(entry);
    }

    pub fn remove(&mut self, vin: &TxIn) -> bool {
        let before = self.entries.len();
        self.entries.retain(|existing| existing.vin != *vin);
        self.entries.len() != before
    }

    pub fn get(&self, vin: &TxIn) -> Option<&MasternodeEntry> {
        self.entries.iter().find(|entry| entry.vin == *vin)
    }

    /// Election seed for a height
    fn seed(height: u64) -> Hash {
        hash_bytes(&height.to_le_bytes())
    }
}

impl MasternodeRegistry for InMemoryRegistry {
    fn current_eligible(&self, height: u64) -> Option<MasternodeEntry> {
        let seed = Self::seed(height);
        self.entries
            .iter()
            .max_by_key(|entry| (calculate_score(&seed, &entry.vin), entry.vin.prevout))
            .cloned()
    }

    fn size(&self) -> usize {
        self.entries.len()
    }

    fn is_tier_two(&self, vin: &TxIn) -> bool {
        self.get(vin).map_or(false, |entry| entry.tier == MasternodeTier::Two)
    }
}
