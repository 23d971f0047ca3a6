//! Consensus parameter engine
//!
//! Composes difficulty, payment election, subsidy and checkpoints for a
//! candidate block. The components share nothing but the chain view and the
//! winner query.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::ChainParams;
use crate::consensus::{
    devops_payment, masternode_payment, next_target, proof_of_stake_reward, proof_of_work_reward,
    BlockHeader, BlockKind, ChainView, CheckpointError, Checkpoints, IndexedHeader, RewardBreakdown,
    RewardContext, SyncCheckpoint,
};
use crate::crypto::Hash;
use crate::masternode::{MasternodePayments, MasternodeRegistry, PayeeScript, PaymentWinner, TxIn};
use crate::storage::{ChainError, HeaderChain};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Chain view has no best block")]
    EmptyChain,
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl EngineError {
    /// Misbehavior points for a peer that sent the offending header
    pub fn penalty(&self) -> u32 {
        match self {
            EngineError::Checkpoint(_) => 100,
            EngineError::EmptyChain | EngineError::Chain(_) => 0,
        }
    }
}

/// Consensus parameters decided for a candidate block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEvaluation {
    pub height: u64,
    /// Required compact target
    pub bits: u32,
    pub rewards: RewardBreakdown,
    /// Elected masternode and its payee, if any
    pub payee: Option<(TxIn, PayeeScript)>,
}

pub struct ConsensusEngine<R> {
    params: ChainParams,
    payments: MasternodePayments<R>,
    checkpoints: Mutex<Checkpoints>,
}

impl<R: MasternodeRegistry> ConsensusEngine<R> {
    pub fn new(params: ChainParams, registry: R, genesis: Hash) -> Self {
        let checkpoints = Checkpoints::new(&params, genesis);
        let payments = MasternodePayments::new(params.payments.clone(), registry);
        Self {
            params,
            payments,
            checkpoints: Mutex::new(checkpoints),
        }
    }

    fn checkpoints(&self) -> MutexGuard<'_, Checkpoints> {
        self.checkpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn payments(&self) -> &MasternodePayments<R> {
        &self.payments
    }

    /// Required compact target for the block after `last`
    pub fn next_target<C: ChainView>(&self, chain: &C, last: &IndexedHeader, proof_of_stake: bool) -> u32 {
        next_target(&self.params, chain, last, proof_of_stake)
    }

    /// Reward split for a block at `tip.height + 1`
    pub fn rewards(&self, tip: &IndexedHeader, kind: BlockKind, coin_age: u64, fees: u64) -> RewardBreakdown {
        let height = tip.height + 1;
        let rules = &self.params.rewards;
        let ctx = RewardContext::new(tip, self.payments.payee_tier(height));

        let producer = match kind {
            BlockKind::ProofOfWork => proof_of_work_reward(rules, &ctx, height, fees),
            BlockKind::ProofOfStake => proof_of_stake_reward(rules, &ctx, tip, coin_age, fees),
        };
        RewardBreakdown {
            producer,
            masternode: masternode_payment(rules, &ctx, height),
            devops: devops_payment(rules, &ctx, height),
        }
    }

    /// Everything a producer or validator needs to know about the next block.
    ///
    /// `hash` is the candidate's own hash, checked against the checkpoint table.
    pub fn evaluate_candidate<C: ChainView>(
        &self,
        chain: &C,
        kind: BlockKind,
        coin_age: u64,
        fees: u64,
        hash: &Hash,
    ) -> Result<CandidateEvaluation, EngineError> {
        let tip = chain.tip().ok_or(EngineError::EmptyChain)?;
        let height = tip.height + 1;
        self.checkpoints().check_block(height, hash)?;

        let evaluation = CandidateEvaluation {
            height,
            bits: self.next_target(chain, tip, kind.is_proof_of_stake()),
            rewards: self.rewards(tip, kind, coin_age, fees),
            payee: self.payments.winning_masternode(height),
        };
        debug!(
            height,
            lane = kind.label(),
            bits = format_args!("{:08x}", evaluation.bits),
            total = evaluation.rewards.total(),
            "Candidate evaluated"
        );
        Ok(evaluation)
    }

    /// Index a header after the checkpoint and reorg checks.
    ///
    /// A new best block moves the sync checkpoint.
    pub fn accept_header(
        &self,
        chain: &mut HeaderChain,
        header: BlockHeader,
        minted: u64,
    ) -> Result<IndexedHeader, EngineError> {
        let parent = chain
            .get(&header.prev_hash)
            .ok_or(ChainError::UnknownParent(header.prev_hash))?;
        let height = parent.height + 1;
        let hash = header.hash();

        {
            let checkpoints = self.checkpoints();
            checkpoints.check_block(height, &hash)?;
            if header.prev_hash != chain.tip_entry().hash {
                let fork_height = chain.fork_height(&header.prev_hash).unwrap_or(0);
                checkpoints.check_reorg(fork_height)?;
            }
        }

        let entry = chain.push(header, minted)?.clone();
        if chain.tip_entry().hash == entry.hash {
            let mut checkpoints = self.checkpoints();
            checkpoints.select_sync_checkpoint(&*chain, &entry);
        }
        Ok(entry)
    }

    /// Elect and record the local winner for the block after the best one
    pub fn produce_winner<C: ChainView>(&self, chain: &C) -> Option<PaymentWinner> {
        let tip = chain.tip()?;
        let winner = self.payments.process_block(tip.height + 1)?;
        info!(height = winner.height, vin = %winner.vin, "Local masternode winner ready for relay");
        Some(winner)
    }

    pub fn is_hardened(&self, height: u64, hash: &Hash) -> bool {
        self.checkpoints().is_hardened(height, hash)
    }

    pub fn is_behind_sync_checkpoint(&self, height: u64) -> bool {
        self.checkpoints().is_behind_sync_checkpoint(height)
    }

    pub fn sync_checkpoint(&self) -> Option<SyncCheckpoint> {
        self.checkpoints().sync_checkpoint()
    }

    pub fn estimated_chain_length(&self) -> u64 {
        self.checkpoints().estimated_chain_length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;
    use crate::crypto::PrivateKey;
    use crate::masternode::{InMemoryRegistry, MasternodeEntry, MasternodeTier, OutPoint};
    use crate::node::{create_genesis_header, REWARDS_TRANSITION_END};

    fn engine_with(params: ChainParams, registry: InMemoryRegistry) -> (ConsensusEngine<InMemoryRegistry>, HeaderChain) {
        let genesis = create_genesis_header(&params);
        let chain = HeaderChain::new(genesis.clone());
        (ConsensusEngine::new(params, registry, genesis.hash()), chain)
    }

    fn extend(engine: &ConsensusEngine<InMemoryRegistry>, chain: &mut HeaderChain, count: u64, minted: u64) {
        for _ in 0..count {
            let tip = chain.tip_entry().clone();
            let header = BlockHeader {
                version: 1,
                prev_hash: tip.hash,
                merkle_root: Hash::zero(),
                timestamp: tip.timestamp() + 120,
                bits: tip.bits(),
                nonce: tip.height,
                kind: BlockKind::ProofOfWork,
            };
            engine.accept_header(chain, header, minted).unwrap();
        }
    }

    #[test]
    fn test_evaluate_empty_registry() {
        let mut params = ChainParams::regtest();
        params.genesis_time = REWARDS_TRANSITION_END + 10;
        params.rewards.reserve_phase_start = u64::MAX;
        let (engine, mut chain) = engine_with(params, InMemoryRegistry::new());
        extend(&engine, &mut chain, 3, 0);

        let eval = engine
            .evaluate_candidate(&chain, BlockKind::ProofOfWork, 0, 5, &Hash([1u8; 32]))
            .unwrap();
        assert_eq!(eval.height, 4);
        assert_eq!(eval.payee, None);
        assert_eq!(eval.rewards.masternode, 0);
        assert_eq!(eval.rewards.producer, 50 * COIN + 5);
        assert_eq!(eval.bits, chain.tip_entry().bits());
    }

    #[test]
    fn test_evaluate_with_tier_two_winner() {
        let mut params = ChainParams::regtest();
        params.genesis_time = 1_700_000_000;
        params.rewards.reserve_phase_start = u64::MAX;
        let mut registry = InMemoryRegistry::new();
        registry.register(MasternodeEntry {
            vin: TxIn::new(OutPoint {
                hash: Hash([3u8; 32]),
                index: 0,
            }),
            pubkey: PrivateKey::generate().public_key(),
            tier: MasternodeTier::Two,
        });
        let (engine, mut chain) = engine_with(params, registry);
        extend(&engine, &mut chain, 2, 0);

        assert!(engine.produce_winner(&chain).is_some());
        let eval = engine
            .evaluate_candidate(&chain, BlockKind::ProofOfWork, 0, 0, &Hash([1u8; 32]))
            .unwrap();
        assert!(eval.payee.is_some());
        assert_eq!(eval.rewards.masternode, 160 * COIN);
        assert_eq!(eval.rewards.producer, 168 * COIN);
    }

    #[test]
    fn test_checkpoint_mismatch_rejects_candidate() {
        let params = ChainParams::main();
        let (engine, chain) = engine_with(params, InMemoryRegistry::new());
        // height 1 is checkpointed on main
        let result = engine.evaluate_candidate(&chain, BlockKind::ProofOfWork, 0, 0, &Hash([1u8; 32]));
        assert!(matches!(result, Err(EngineError::Checkpoint(CheckpointError::Mismatch { .. }))));
        assert!(!engine.is_hardened(1, &Hash([1u8; 32])));
        assert_eq!(engine.estimated_chain_length(), 406_095);
    }

    #[test]
    fn test_deep_reorg_refused() {
        let mut params = ChainParams::regtest();
        params.checkpoint_span = 5;
        let (engine, mut chain) = engine_with(params, InMemoryRegistry::new());
        extend(&engine, &mut chain, 12, 0);
        assert_eq!(engine.sync_checkpoint().map(|sync| sync.height), Some(7));
        assert!(engine.is_behind_sync_checkpoint(7));

        let fork_base = chain.at_height(3).unwrap().clone();
        let side = BlockHeader {
            version: 1,
            prev_hash: fork_base.hash,
            merkle_root: Hash([9u8; 32]),
            timestamp: fork_base.timestamp() + 60,
            bits: fork_base.bits(),
            nonce: 99,
            kind: BlockKind::ProofOfStake,
        };
        let result = engine.accept_header(&mut chain, side, 0);
        assert!(matches!(
            result,
            Err(EngineError::Checkpoint(CheckpointError::BehindSyncCheckpoint { fork_height: 3, .. }))
        ));

        let recent_base = chain.at_height(10).unwrap().clone();
        let shallow = BlockHeader {
            prev_hash: recent_base.hash,
            timestamp: recent_base.timestamp() + 60,
            ..recent_base.header.clone()
        };
        assert!(engine.accept_header(&mut chain, shallow, 0).is_ok());
    }
}
