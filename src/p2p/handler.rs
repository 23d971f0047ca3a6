//! Inbound message handling for the masternode payment protocol

use std::net::SocketAddr;

use tracing::{debug, info};

use super::{InvItem, InvType, Message, PeerBook};
use crate::masternode::{MasternodePayments, MasternodeRegistry};

/// Misbehavior points for asking for the winner list twice
pub const PENALTY_REPEATED_MNGET: u32 = 20;

/// What handling one message produced
#[derive(Debug, Default, PartialEq)]
pub struct HandleOutcome {
    /// Messages to send back to the originating peer
    pub replies: Vec<Message>,
    /// Peers the message was relayed to
    pub relayed: usize,
    /// Misbehavior points charged to the originating peer
    pub penalty: u32,
}

impl HandleOutcome {
    fn reply(replies: Vec<Message>) -> Self {
        Self {
            replies,
            ..Default::default()
        }
    }

    fn penalize(points: u32) -> Self {
        Self {
            penalty: points,
            ..Default::default()
        }
    }
}

/// Process one message received from `from`.
///
/// Misbehavior is charged to the peer book and accepted winners are relayed
/// to every other eligible peer before returning.
pub fn handle_message<R: MasternodeRegistry>(
    payments: &MasternodePayments<R>,
    peers: &mut PeerBook,
    from: SocketAddr,
    best_height: u64,
    message: Message,
) -> HandleOutcome {
    if let Some(peer) = peers.get_mut(&from) {
        peer.touch();
    }
    let min_relay_version = payments.params().min_relay_version;

    let outcome = match message {
        Message::Version(version) => {
            peers.handshake(&from, version.version, version.best_height);
            let mut replies = vec![Message::VerAck];
            if version.version >= min_relay_version {
                replies.push(Message::MasternodeGet);
            }
            HandleOutcome::reply(replies)
        }
        Message::VerAck => HandleOutcome::default(),
        Message::Inv(items) => {
            let wanted: Vec<InvItem> = items
                .into_iter()
                .filter(|item| item.inv_type == InvType::MasternodeWinner)
                .filter(|item| payments.seen_winner(&item.hash).is_none())
                .collect();
            if wanted.is_empty() {
                HandleOutcome::default()
            } else {
                HandleOutcome::reply(vec![Message::GetData(wanted)])
            }
        }
        Message::GetData(items) => HandleOutcome::reply(
            items
                .iter()
                .filter_map(|item| payments.seen_winner(&item.hash))
                .map(Message::MasternodeWinner)
                .collect(),
        ),
        Message::MasternodeGet => {
            let first_request = peers.get_mut(&from).map_or(false, |peer| peer.fulfill("mnget"));
            if !first_request {
                debug!(peer = %from, "mnget - peer already asked me for the list");
                HandleOutcome::penalize(PENALTY_REPEATED_MNGET)
            } else {
                let winners = payments.sync_winners(best_height);
                info!(peer = %from, count = winners.len(), "mnget - sent masternode winners");
                HandleOutcome::reply(winners.into_iter().map(Message::MasternodeWinner).collect())
            }
        }
        Message::MasternodeWinner(winner) => {
            let version = peers.version_of(&from);
            match payments.process_winner(winner, best_height, version) {
                Ok(hash) => {
                    let inv = Message::Inv(vec![InvItem::winner(hash)]);
                    HandleOutcome {
                        relayed: peers.relay(&inv, min_relay_version, Some(&from)),
                        ..Default::default()
                    }
                }
                Err(rejection) => HandleOutcome::penalize(rejection.penalty()),
            }
        }
        // Headers extend the chain, which the node service owns
        Message::Headers(_) => HandleOutcome::default(),
    };

    peers.report_misbehavior(&from, outcome.penalty);
    outcome
}
