//! Network service
//!
//! One task per connection reads frames in arrival order. Header batches
//! go to the chain, everything else to the payment message handler. Replies and relays go through per-peer
//! outboxes drained by a writer task, so no handler ever waits on a socket.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ConsensusEngine, EngineError};
use crate::consensus::{BlockHeader, ChainView, IndexedHeader};
use crate::constants::{CHAIN_NAME, PROTOCOL_VERSION};
use crate::masternode::MasternodeRegistry;
use crate::p2p::{
    handle_message, read_message, write_message, HandleOutcome, InvItem, Message, PeerBook, VersionMessage,
    MAX_HEADERS_PER_MESSAGE,
};
use crate::storage::HeaderChain;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared node state handed to every connection task
pub struct NodeService<R> {
    engine: Arc<ConsensusEngine<R>>,
    chain: Arc<Mutex<HeaderChain>>,
    peers: Arc<Mutex<PeerBook>>,
}

impl<R> Clone for NodeService<R> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            chain: Arc::clone(&self.chain),
            peers: Arc::clone(&self.peers),
        }
    }
}

impl<R: MasternodeRegistry + 'static> NodeService<R> {
    pub fn new(engine: ConsensusEngine<R>, chain: HeaderChain) -> Self {
        Self {
            engine: Arc::new(engine),
            chain: Arc::new(Mutex::new(chain)),
            peers: Arc::new(Mutex::new(PeerBook::new())),
        }
    }

    pub fn engine(&self) -> &ConsensusEngine<R> {
        &self.engine
    }

    pub fn best_height(&self) -> u64 {
        lock(&self.chain).height()
    }

    /// Index a header through the engine's checkpoint and reorg checks.
    ///
    /// The minted amount is the scheduled issuance for the block's lane. A
    /// new best block moves the payment window along with it.
    pub fn accept_header(&self, header: BlockHeader) -> Result<IndexedHeader, EngineError> {
        let (entry, best_height, tip_moved) = {
            let mut chain = lock(&self.chain);
            let previous_tip = chain.tip_entry().hash;
            let minted = chain
                .get(&header.prev_hash)
                .map_or(0, |parent| self.engine.rewards(parent, header.kind, 0, 0).total());
            let entry = self.engine.accept_header(&mut chain, header, minted)?;
            let tip = chain.tip_entry();
            (entry, tip.height, tip.hash != previous_tip)
        };

        if tip_moved {
            debug!(height = best_height, hash = %entry.hash, "New best header");
            self.engine.payments().clean_payment_list(best_height);
        }
        Ok(entry)
    }

    fn ingest_headers(&self, from: SocketAddr, headers: Vec<BlockHeader>) -> HandleOutcome {
        if headers.len() > MAX_HEADERS_PER_MESSAGE {
            warn!(peer = %from, count = headers.len(), "headers - oversized batch");
            return HandleOutcome {
                penalty: 20,
                ..Default::default()
            };
        }

        let mut accepted = 0usize;
        for header in headers {
            match self.accept_header(header) {
                Ok(_) => accepted += 1,
                Err(e) => {
                    let penalty = e.penalty();
                    if penalty > 0 {
                        warn!(peer = %from, error = %e, "headers - header rejected");
                        return HandleOutcome {
                            penalty,
                            ..Default::default()
                        };
                    }
                    debug!(peer = %from, error = %e, "headers - header skipped");
                }
            }
        }
        debug!(peer = %from, accepted, best_height = self.best_height(), "headers - batch processed");
        HandleOutcome::default()
    }

    /// Accept connections until the listener fails
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (socket, addr) = listener.accept().await?;
            info!(peer = %addr, "Peer connected");
            let service = self.clone();
            tokio::spawn(async move {
                service.handle_connection(socket, addr).await;
                info!(peer = %addr, "Peer disconnected");
            });
        }
    }

    async fn handle_connection(&self, socket: TcpStream, addr: SocketAddr) {
        let magic = self.engine.params().message_start;
        let (mut reader, mut writer) = socket.into_split();
        let (outbox, mut inbox) = mpsc::unbounded_channel::<Message>();

        let writer_task = tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                if let Err(e) = write_message(&mut writer, magic, &message).await {
                    debug!(peer = %addr, error = %e, "Write failed");
                    break;
                }
            }
        });

        if !lock(&self.peers).connected(addr, outbox.clone()) {
            warn!(peer = %addr, "Dropping connection from banned host");
            drop(outbox);
            let _ = writer_task.await;
            return;
        }

        let version = Message::Version(VersionMessage {
            version: PROTOCOL_VERSION,
            best_height: self.best_height(),
            nonce: rand::random(),
            user_agent: format!("/{}:{}/", CHAIN_NAME, env!("CARGO_PKG_VERSION")),
        });
        let _ = outbox.send(version);

        loop {
            let message = match read_message(&mut reader, magic).await {
                Ok(message) => message,
                Err(e) => {
                    let penalty = e.penalty();
                    if penalty > 0 {
                        warn!(peer = %addr, error = %e, "Malformed frame");
                        lock(&self.peers).report_misbehavior(&addr, penalty);
                    }
                    break;
                }
            };

            debug!(peer = %addr, command = message.command(), "Received message");
            let (outcome, banned) = match message {
                Message::Headers(headers) => {
                    let outcome = self.ingest_headers(addr, headers);
                    let mut peers = lock(&self.peers);
                    peers.report_misbehavior(&addr, outcome.penalty);
                    (outcome, peers.is_banned(&addr))
                }
                message => {
                    let best_height = self.best_height();
                    let mut peers = lock(&self.peers);
                    let outcome = handle_message(self.engine.payments(), &mut peers, addr, best_height, message);
                    (outcome, peers.is_banned(&addr))
                }
            };

            for reply in outcome.replies {
                let _ = outbox.send(reply);
            }
            if banned {
                warn!(peer = %addr, "Disconnecting banned peer");
                break;
            }
        }

        lock(&self.peers).disconnected(&addr);
        drop(outbox);
        let _ = writer_task.await;
    }

    /// Produce the local winner for the next block and announce it
    pub fn announce_local_winner(&self) -> usize {
        let winner = {
            let chain = lock(&self.chain);
            self.engine.produce_winner(&*chain)
        };
        match winner {
            Some(winner) => {
                let inv = Message::Inv(vec![InvItem::winner(winner.hash())]);
                lock(&self.peers).relay(&inv, self.engine.params().payments.min_relay_version, None)
            }
            None => 0,
        }
    }

    /// Periodic maintenance: prune the payment window and, when signing, elect
    pub async fn run_maintenance(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let best_height = self.best_height();
            self.engine.payments().clean_payment_list(best_height);
            if self.engine.payments().is_signer() {
                self.announce_local_winner();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::BlockKind;
    use crate::crypto::{Hash, PrivateKey};
    use crate::masternode::{
        InMemoryRegistry, MasternodeEntry, MasternodeTier, OutPoint, PayeeScript, PaymentWinner, TxIn,
        WinnerRejection,
    };
    use crate::node::{create_genesis_header, ChainParams};

    fn service(signing: bool) -> (NodeService<InMemoryRegistry>, PrivateKey) {
        let key = PrivateKey::generate();
        let mut params = ChainParams::regtest();
        params.payments.signer_key = Some(key.public_key());

        let mut registry = InMemoryRegistry::new();
        registry.register(MasternodeEntry {
            vin: TxIn::new(OutPoint {
                hash: Hash([1u8; 32]),
                index: 0,
            }),
            pubkey: PrivateKey::generate().public_key(),
            tier: MasternodeTier::One,
        });

        let genesis = create_genesis_header(&params);
        let chain = HeaderChain::new(genesis.clone());
        let engine = ConsensusEngine::new(params, registry, genesis.hash());
        if signing {
            engine.payments().set_private_key(key.clone()).unwrap();
        }
        (NodeService::new(engine, chain), key)
    }

    #[tokio::test]
    async fn test_connection_receives_version_and_winners() {
        let (node, key) = service(true);
        assert_eq!(node.announce_local_winner(), 0);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = node.clone();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let magic = node.engine().params().message_start;
        let mut client = TcpStream::connect(addr).await.unwrap();
        let greeting = read_message(&mut client, magic).await.unwrap();
        assert!(matches!(greeting, Message::Version(_)));

        let hello = Message::Version(VersionMessage {
            version: PROTOCOL_VERSION,
            best_height: 0,
            nonce: 7,
            user_agent: "/test/".into(),
        });
        write_message(&mut client, magic, &hello).await.unwrap();
        assert_eq!(read_message(&mut client, magic).await.unwrap(), Message::VerAck);
        assert_eq!(read_message(&mut client, magic).await.unwrap(), Message::MasternodeGet);

        write_message(&mut client, magic, &Message::MasternodeGet).await.unwrap();
        match read_message(&mut client, magic).await.unwrap() {
            Message::MasternodeWinner(winner) => {
                assert_eq!(winner.height, 1);
                assert!(winner.verify(&key.public_key()));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_magic_disconnects() {
        let (node, _) = service(false);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = node.clone();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let magic = node.engine().params().message_start;
        let _ = read_message(&mut client, magic).await.unwrap();
        write_message(&mut client, [0, 0, 0, 0], &Message::VerAck).await.unwrap();

        let closed = read_message(&mut client, magic).await;
        assert!(closed.is_err());
    }

    fn headers_after(node: &NodeService<InMemoryRegistry>, count: u64) -> Vec<BlockHeader> {
        let tip = lock(&node.chain).tip_entry().clone();
        let mut prev_hash = tip.hash;
        let mut timestamp = tip.timestamp();
        (0..count)
            .map(|n| {
                timestamp += 120;
                let header = BlockHeader {
                    prev_hash,
                    timestamp,
                    nonce: n,
                    kind: if n % 2 == 0 { BlockKind::ProofOfWork } else { BlockKind::ProofOfStake },
                    ..tip.header.clone()
                };
                prev_hash = header.hash();
                header
            })
            .collect()
    }

    #[test]
    fn test_ingested_headers_move_the_payment_window() {
        let (node, key) = service(true);
        let vin = TxIn::new(OutPoint {
            hash: Hash([9u8; 32]),
            index: 0,
        });
        let mut far = PaymentWinner::new(40, vin, PayeeScript([9u8; 20]));
        far.sign(&key);
        assert!(matches!(
            node.engine().payments().process_winner(far.clone(), node.best_height(), PROTOCOL_VERSION),
            Err(WinnerRejection::OutOfRange { .. })
        ));

        let genesis_supply = lock(&node.chain).tip_entry().money_supply;
        for header in headers_after(&node, 30) {
            node.accept_header(header).unwrap();
        }
        assert_eq!(node.best_height(), 30);
        assert!(lock(&node.chain).tip_entry().money_supply > genesis_supply);

        let local = node.engine().produce_winner(&*lock(&node.chain)).unwrap();
        assert_eq!(local.height, 31);

        node.engine()
            .payments()
            .process_winner(far.clone(), node.best_height(), PROTOCOL_VERSION)
            .unwrap();
        assert_eq!(node.engine().payments().winner_at(40), Some(far));
    }

    #[test]
    fn test_orphan_and_duplicate_headers_are_not_penalized() {
        let (node, _) = service(false);
        let from: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let headers = headers_after(&node, 3);

        let orphan = headers[2].clone();
        assert!(matches!(node.accept_header(orphan), Err(EngineError::Chain(_))));

        let mut batch = headers.clone();
        batch.push(headers[0].clone());
        assert_eq!(node.ingest_headers(from, batch).penalty, 0);
        assert_eq!(node.best_height(), 3);
    }

    #[test]
    fn test_oversized_header_batch_is_penalized() {
        let (node, _) = service(false);
        let from: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let headers = headers_after(&node, MAX_HEADERS_PER_MESSAGE as u64 + 1);
        assert_eq!(node.ingest_headers(from, headers).penalty, 20);
        assert_eq!(node.best_height(), 0);
    }

    #[tokio::test]
    async fn test_headers_message_advances_best_height() {
        let (node, _) = service(false);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = node.clone();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let magic = node.engine().params().message_start;
        let mut client = TcpStream::connect(addr).await.unwrap();
        let _ = read_message(&mut client, magic).await.unwrap();
        let headers = headers_after(&node, 12);
        write_message(&mut client, magic, &Message::Headers(headers)).await.unwrap();

        for _ in 0..100 {
            if node.best_height() == 12 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(node.best_height(), 12);
    }

    #[tokio::test]
    async fn test_banned_host_is_refused_on_reconnect() {
        let (node, _) = service(false);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = node.clone();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let magic = node.engine().params().message_start;
        let mut first = TcpStream::connect(addr).await.unwrap();
        let _ = read_message(&mut first, magic).await.unwrap();
        let first_addr = first.local_addr().unwrap();
        assert!(lock(&node.peers).report_misbehavior(&first_addr, 100));

        let mut second = TcpStream::connect(addr).await.unwrap();
        assert!(read_message(&mut second, magic).await.is_err());
    }
}
