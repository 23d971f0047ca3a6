//! Masternode payment consensus
//!
//! Keeps the height-indexed window of accepted winners and the map of
//! already-processed announcements. Both live behind one mutex so every
//! check-then-insert is atomic with respect to concurrent connections.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{MasternodeRegistry, MasternodeTier, PaymentWinner, PayeeScript, TxIn};
use crate::crypto::{Hash, PrivateKey};
use crate::node::PaymentParams;

/// Misbehavior points for a winner outside the accepted height range
pub const PENALTY_OUT_OF_RANGE: u32 = 20;
/// Misbehavior points for a masternode input with a non-final sequence
pub const PENALTY_BAD_SEQUENCE: u32 = 100;
/// Misbehavior points for relaying winners from an outdated protocol version
pub const PENALTY_OUTDATED_PEER: u32 = 50;
/// Misbehavior points for a winner not signed by the payments key
pub const PENALTY_BAD_SIGNATURE: u32 = 100;

/// Why an announced winner was not recorded
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WinnerRejection {
    #[error("winner {0} already processed")]
    AlreadySeen(Hash),

    #[error("winner height {height} outside [{min}, {max}]")]
    OutOfRange { height: u64, min: u64, max: u64 },

    #[error("masternode input {0} has a non-final sequence")]
    NonFinalSequence(TxIn),

    #[error("peer protocol version {version} below relay minimum {minimum}")]
    OutdatedPeer { version: u32, minimum: u32 },

    #[error("winner for height {0} carries no valid payments signature")]
    BadSignature(u64),

    #[error("height {height} already has winner {existing}")]
    HeightTaken { height: u64, existing: TxIn },
}

impl WinnerRejection {
    /// Misbehavior points charged to the sending peer
    pub fn penalty(&self) -> u32 {
        match self {
            WinnerRejection::AlreadySeen(_) | WinnerRejection::HeightTaken { .. } => 0,
            WinnerRejection::OutOfRange { .. } => PENALTY_OUT_OF_RANGE,
            WinnerRejection::NonFinalSequence(_) => PENALTY_BAD_SEQUENCE,
            WinnerRejection::OutdatedPeer { .. } => PENALTY_OUTDATED_PEER,
            WinnerRejection::BadSignature(_) => PENALTY_BAD_SIGNATURE,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("no masternode-payments public key configured for this network")]
    NoNetworkKey,
    #[error("payments private key does not match the network key")]
    KeyMismatch,
}

/// Window, seen map and signer, guarded together
#[derive(Debug, Default)]
struct PaymentState {
    window: BTreeMap<u64, PaymentWinner>,
    seen: HashMap<Hash, PaymentWinner>,
    signer: Option<PrivateKey>,
}

impl PaymentState {
    /// First-accepted-wins insert
    fn add(&mut self, winner: PaymentWinner) -> Result<(), WinnerRejection> {
        if let Some(existing) = self.window.get(&winner.height) {
            return Err(WinnerRejection::HeightTaken {
                height: winner.height,
                existing: existing.vin,
            });
        }
        self.window.insert(winner.height, winner);
        Ok(())
    }
}

pub struct MasternodePayments<R> {
    params: PaymentParams,
    registry: R,
    state: Mutex<PaymentState>,
}

impl<R: MasternodeRegistry> MasternodePayments<R> {
    pub fn new(params: PaymentParams, registry: R) -> Self {
        Self {
            params,
            registry,
            state: Mutex::new(PaymentState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PaymentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn params(&self) -> &PaymentParams {
        &self.params
    }

    /// Enable local signing once a test winner signed with `key` verifies
    pub fn set_private_key(&self, key: PrivateKey) -> Result<(), PaymentError> {
        let network_key = self.params.signer_key.as_ref().ok_or(PaymentError::NoNetworkKey)?;

        let mut check = PaymentWinner::new(0, TxIn::new(Default::default()), PayeeScript([0u8; 20]));
        check.sign(&key);
        if !check.verify(network_key) {
            warn!("Masternode payments key rejected, does not match network key");
            return Err(PaymentError::KeyMismatch);
        }

        self.lock().signer = Some(key);
        info!("Initialized as masternode payments signer");
        Ok(())
    }

    pub fn is_signer(&self) -> bool {
        self.lock().signer.is_some()
    }

    /// Record a winner; a height that already has one keeps it
    pub fn add_winning_masternode(&self, winner: PaymentWinner) -> Result<(), WinnerRejection> {
        self.lock().add(winner)
    }

    /// Elect, sign and record the local winner for `height`.
    ///
    /// Returns the winner to relay, or `None` when no masternode is eligible
    /// or the height already has a winner.
    pub fn process_block(&self, height: u64) -> Option<PaymentWinner> {
        let Some(elected) = self.registry.current_eligible(height) else {
            warn!(height, "Masternode winner election failed, no masternodes detected");
            return None;
        };

        let mut winner = PaymentWinner::new(height, elected.vin, elected.payee());
        let mut state = self.lock();
        if let Some(key) = &state.signer {
            winner.sign(key);
        }

        let hash = winner.hash();
        match state.add(winner.clone()) {
            Ok(()) => {
                state.seen.insert(hash, winner.clone());
                let tier = if self.registry.is_tier_two(&winner.vin) { 2 } else { 1 };
                info!(height, payee = %winner.payee, tier, "Masternode winner elected");
                Some(winner)
            }
            Err(rejection) => {
                debug!(height, %rejection, "Local masternode winner not recorded");
                None
            }
        }
    }

    /// Run an inbound `mnw` through dedup, range, input, version and signature checks.
    ///
    /// On success the winner is recorded and marked seen; the returned hash is
    /// what the caller relays. Rejected winners other than conflicts are not
    /// marked seen.
    pub fn process_winner(
        &self,
        winner: PaymentWinner,
        best_height: u64,
        peer_version: u32,
    ) -> Result<Hash, WinnerRejection> {
        let hash = winner.hash();
        let mut state = self.lock();

        if state.seen.contains_key(&hash) {
            debug!(%hash, height = winner.height, best_height, "mnw - seen vote");
            return Err(WinnerRejection::AlreadySeen(hash));
        }

        let min = best_height.saturating_sub(self.params.window_behind);
        let max = best_height.saturating_add(self.params.window_ahead);
        if winner.height < min || winner.height > max {
            warn!(height = winner.height, best_height, vin = %winner.vin, "mnw - winner out of range");
            return Err(WinnerRejection::OutOfRange {
                height: winner.height,
                min,
                max,
            });
        }

        if !winner.vin.is_final() {
            warn!(vin = %winner.vin, "mnw - invalid sequence");
            return Err(WinnerRejection::NonFinalSequence(winner.vin));
        }

        if peer_version < self.params.min_relay_version {
            warn!(peer_version, "mnw - peer is unable to relay masternode winners");
            return Err(WinnerRejection::OutdatedPeer {
                version: peer_version,
                minimum: self.params.min_relay_version,
            });
        }

        let signed = self
            .params
            .signer_key
            .as_ref()
            .map_or(false, |key| winner.verify(key));
        if !signed {
            warn!(height = winner.height, vin = %winner.vin, "mnw - invalid signature");
            return Err(WinnerRejection::BadSignature(winner.height));
        }

        let height = winner.height;
        let result = state.add(winner.clone());
        state.seen.insert(hash, winner);
        match result {
            Ok(()) => {
                info!(height, best_height, %hash, "mnw - winning vote accepted");
                Ok(hash)
            }
            Err(rejection) => {
                debug!(height, %rejection, "mnw - conflicting winner ignored");
                Err(rejection)
            }
        }
    }

    /// Collateral input and payee of the winner for `height`.
    ///
    /// Gossiped winners take precedence over the registry's own election.
    pub fn winning_masternode(&self, height: u64) -> Option<(TxIn, PayeeScript)> {
        if let Some(winner) = self.lock().window.get(&height) {
            return Some((winner.vin, winner.payee));
        }
        self.registry
            .deterministic_winner(height)
            .map(|entry| (entry.vin, entry.payee()))
    }

    /// Tier of the winner for `height`, `None` when no winner is known
    pub fn payee_tier(&self, height: u64) -> Option<MasternodeTier> {
        let (vin, _) = self.winning_masternode(height)?;
        if self.registry.is_tier_two(&vin) {
            Some(MasternodeTier::Two)
        } else {
            Some(MasternodeTier::One)
        }
    }

    /// Lowest height kept by cleanup for a given best height
    pub fn retention_floor(&self, best_height: u64) -> u64 {
        let scaled = (self.registry.size() as u64).saturating_mul(5) / 4;
        best_height.saturating_sub(scaled.max(self.params.min_retained_heights))
    }

    /// Drop winners (and their seen entries) below the retention floor
    pub fn clean_payment_list(&self, best_height: u64) {
        let floor = self.retention_floor(best_height);
        let mut state = self.lock();
        let before = state.window.len();
        let retained = state.window.split_off(&floor);
        state.window = retained;
        state.seen.retain(|_, winner| winner.height >= floor);
        let pruned = before - state.window.len();
        if pruned > 0 {
            debug!(floor, pruned, "Cleaned masternode payment list");
        }
    }

    /// Retained winners a peer should receive in reply to `mnget`
    pub fn sync_winners(&self, best_height: u64) -> Vec<PaymentWinner> {
        let min = best_height.saturating_sub(self.params.window_behind);
        let max = best_height.saturating_add(self.params.window_ahead);
        self.lock()
            .window
            .range(min..=max)
            .map(|(_, winner)| winner.clone())
            .collect()
    }

    /// Processed winner by content hash, used to serve `getdata`
    pub fn seen_winner(&self, hash: &Hash) -> Option<PaymentWinner> {
        self.lock().seen.get(hash).cloned()
    }

    pub fn winner_at(&self, height: u64) -> Option<PaymentWinner> {
        self.lock().window.get(&height).cloned()
    }

    pub fn window_len(&self) -> usize {
        self.lock().window.len()
    }

    pub fn seen_len(&self) -> usize {
        self.lock().seen.len()
    }

    /// Lowest retained height
    pub fn oldest_height(&self) -> Option<u64> {
        self.lock().window.keys().next().copied()
    }
}
