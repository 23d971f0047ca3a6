//! Checkpoint reorg guard
//!
//! A fixed table of historically accepted blocks plus a sync checkpoint that
//! trails the best block by a fixed span. Blocks may not contradict the table
//! and reorganizations may not fork at or below the sync checkpoint.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{info, warn};

use super::{ChainView, IndexedHeader};
use crate::crypto::Hash;
use crate::node::ChainParams;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("block {hash} at height {height} does not match checkpoint {expected}")]
    Mismatch { height: u64, hash: Hash, expected: Hash },

    #[error("fork at height {fork_height} reaches behind sync checkpoint {checkpoint_height}")]
    BehindSyncCheckpoint { fork_height: u64, checkpoint_height: u64 },
}

/// Ancestor of the best block at least `span` blocks below it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCheckpoint {
    pub height: u64,
    pub hash: Hash,
}

#[derive(Debug, Clone)]
pub struct Checkpoints {
    table: BTreeMap<u64, Hash>,
    span: u64,
    sync: Option<SyncCheckpoint>,
}

impl Checkpoints {
    /// Build the table for a network; `genesis` becomes the height-0 entry
    pub fn new(params: &ChainParams, genesis: Hash) -> Self {
        let mut table: BTreeMap<u64, Hash> = params.checkpoints.iter().copied().collect();
        table.insert(0, genesis);
        Self {
            table,
            span: params.checkpoint_span,
            sync: None,
        }
    }

    /// Unknown heights pass; known heights must match exactly
    pub fn is_hardened(&self, height: u64, hash: &Hash) -> bool {
        match self.table.get(&height) {
            Some(expected) => expected == hash,
            None => true,
        }
    }

    pub fn check_block(&self, height: u64, hash: &Hash) -> Result<(), CheckpointError> {
        match self.table.get(&height) {
            Some(expected) if expected != hash => {
                warn!(height, %hash, %expected, "Block rejected by checkpoint");
                Err(CheckpointError::Mismatch {
                    height,
                    hash: *hash,
                    expected: *expected,
                })
            }
            _ => Ok(()),
        }
    }

    /// Height of the highest table entry
    pub fn estimated_chain_length(&self) -> u64 {
        self.table.keys().next_back().copied().unwrap_or(0)
    }

    /// Highest table entry the chain view actually contains
    pub fn last_checkpoint<'a, C: ChainView>(&self, chain: &'a C) -> Option<&'a IndexedHeader> {
        self.table
            .iter()
            .rev()
            .find_map(|(height, hash)| chain.get(hash).filter(|entry| entry.height == *height))
    }

    /// Recompute the sync checkpoint for a new best block
    pub fn select_sync_checkpoint<C: ChainView>(&mut self, chain: &C, tip: &IndexedHeader) -> SyncCheckpoint {
        let mut cursor = tip;
        while cursor.height + self.span > tip.height {
            match chain.parent(cursor) {
                Some(parent) => cursor = parent,
                None => break,
            }
        }

        let selected = SyncCheckpoint {
            height: cursor.height,
            hash: cursor.hash,
        };
        if self.sync != Some(selected) {
            info!(height = selected.height, hash = %selected.hash, "Sync checkpoint selected");
        }
        self.sync = Some(selected);
        selected
    }

    pub fn sync_checkpoint(&self) -> Option<SyncCheckpoint> {
        self.sync
    }

    pub fn is_behind_sync_checkpoint(&self, height: u64) -> bool {
        self.sync.map_or(false, |sync| height <= sync.height)
    }

    /// Reject a reorganization whose fork point lies at or below the sync checkpoint
    pub fn check_reorg(&self, fork_height: u64) -> Result<(), CheckpointError> {
        match self.sync {
            Some(sync) if fork_height <= sync.height => {
                warn!(fork_height, checkpoint = sync.height, "Reorganization refused");
                Err(CheckpointError::BehindSyncCheckpoint {
                    fork_height,
                    checkpoint_height: sync.height,
                })
            }
            _ => Ok(()),
        }
    }
}
