//! In-memory header chain
//!
//! Indexes every known header by hash and tracks the best (highest) branch.
//! This is the chain view the consensus engine walks; it holds no block
//! bodies and persists nothing.

use std::collections::HashMap;

use thiserror::Error;

use crate::consensus::{BlockHeader, ChainView, IndexedHeader};
use crate::crypto::Hash;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Unknown parent block: {0}")]
    UnknownParent(Hash),
    #[error("Duplicate block: {0}")]
    Duplicate(Hash),
}

/// Header index with a best-chain pointer
#[derive(Debug, Clone)]
pub struct HeaderChain {
    /// Block index: hash -> indexed header
    index: HashMap<Hash, IndexedHeader>,
    /// Best chain hashes by height
    main: Vec<Hash>,
    tip: IndexedHeader,
}

impl HeaderChain {
    /// Create a chain holding only the genesis header
    pub fn new(genesis: BlockHeader) -> Self {
        let hash = genesis.hash();
        let entry = IndexedHeader {
            header: genesis,
            hash,
            height: 0,
            money_supply: 0,
        };
        let mut index = HashMap::new();
        index.insert(hash, entry.clone());
        Self {
            index,
            main: vec![hash],
            tip: entry,
        }
    }

    /// Index a header on top of its parent.
    ///
    /// `minted` is the value the block added to the money supply. A header
    /// that ends up higher than the current tip becomes the new best block.
    pub fn push(&mut self, header: BlockHeader, minted: u64) -> Result<&IndexedHeader, ChainError> {
        let hash = header.hash();
        if self.index.contains_key(&hash) {
            return Err(ChainError::Duplicate(hash));
        }
        let parent = self
            .index
            .get(&header.prev_hash)
            .ok_or(ChainError::UnknownParent(header.prev_hash))?;

        let entry = IndexedHeader {
            hash,
            height: parent.height + 1,
            money_supply: parent.money_supply.saturating_add(minted),
            header,
        };

        if entry.height > self.tip.height {
            self.switch_tip(&entry);
        }
        self.index.insert(hash, entry);
        Ok(&self.index[&hash])
    }

    fn switch_tip(&mut self, entry: &IndexedHeader) {
        let mut branch = vec![entry.hash];
        let mut cursor = entry.header.prev_hash;
        while let Some(ancestor) = self.index.get(&cursor) {
            if self.main.get(ancestor.height as usize) == Some(&ancestor.hash) {
                break;
            }
            branch.push(ancestor.hash);
            cursor = ancestor.header.prev_hash;
        }

        let fork_base = entry.height as usize + 1 - branch.len();
        self.main.truncate(fork_base);
        self.main.extend(branch.into_iter().rev());
        self.tip = entry.clone();
    }

    /// Best block
    pub fn tip_entry(&self) -> &IndexedHeader {
        &self.tip
    }

    pub fn height(&self) -> u64 {
        self.tip.height
    }

    pub fn genesis_hash(&self) -> Hash {
        self.main[0]
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.contains_key(hash)
    }

    /// Best-chain header at `height`
    pub fn at_height(&self, height: u64) -> Option<&IndexedHeader> {
        self.main
            .get(height as usize)
            .and_then(|hash| self.index.get(hash))
    }

    /// Height of the last best-chain block shared with the branch ending at `hash`
    pub fn fork_height(&self, hash: &Hash) -> Option<u64> {
        let mut cursor = self.index.get(hash)?;
        loop {
            if self.main.get(cursor.height as usize) == Some(&cursor.hash) {
                return Some(cursor.height);
            }
            cursor = self.index.get(&cursor.header.prev_hash)?;
        }
    }
}

impl ChainView for HeaderChain {
    fn tip(&self) -> Option<&IndexedHeader> {
        Some(&self.tip)
    }

    fn get(&self, hash: &Hash) -> Option<&IndexedHeader> {
        self.index.get(hash)
    }
}
