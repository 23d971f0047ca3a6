//! Peer book
//!
//! Tracks connected peers: negotiated version, misbehavior score, one-shot
//! requests already served, and the outbox used for fire-and-forget relay.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::Message;

/// Misbehavior score at which a peer is banned
pub const BAN_SCORE: u32 = 100;

/// Peer connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    /// Connected, version not yet received
    Handshaking,
    /// Handshake complete
    Connected,
    /// Banned due to misbehavior
    Banned,
}

/// Information about a peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Peer's network address
    pub addr: SocketAddr,
    /// Current connection state
    pub state: PeerState,
    /// Last message timestamp
    pub last_seen: Instant,
    /// Best known block height
    pub best_height: u64,
    /// Protocol version
    pub version: u32,
    /// Misbehavior score (100 = ban)
    pub misbehavior_score: u32,
    /// One-shot requests this peer has already been served
    fulfilled: HashSet<&'static str>,
    outbox: Option<UnboundedSender<Message>>,
}

impl PeerInfo {
    pub fn new(addr: SocketAddr, outbox: Option<UnboundedSender<Message>>) -> Self {
        Self {
            addr,
            state: PeerState::Handshaking,
            last_seen: Instant::now(),
            best_height: 0,
            version: 0,
            misbehavior_score: 0,
            fulfilled: HashSet::new(),
            outbox,
        }
    }

    /// Update last seen time
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Add misbehavior points
    pub fn add_misbehavior(&mut self, points: u32) {
        self.misbehavior_score = self.misbehavior_score.saturating_add(points);
        if self.misbehavior_score >= BAN_SCORE {
            self.state = PeerState::Banned;
        }
    }

    /// Check if peer should be banned
    pub fn should_ban(&self) -> bool {
        self.misbehavior_score >= BAN_SCORE
    }

    pub fn has_fulfilled(&self, request: &'static str) -> bool {
        self.fulfilled.contains(request)
    }

    /// Mark a one-shot request served; returns false if it already was
    pub fn fulfill(&mut self, request: &'static str) -> bool {
        self.fulfilled.insert(request)
    }

    /// Queue a message for this peer; dropped if the connection is gone
    pub fn send(&self, message: Message) -> bool {
        match &self.outbox {
            Some(outbox) => outbox.send(message).is_ok(),
            None => false,
        }
    }
}

/// Connected peers by address
#[derive(Debug, Default)]
pub struct PeerBook {
    peers: HashMap<SocketAddr, PeerInfo>,
    /// Hosts that reached the ban score; outlives their connections
    banned: HashSet<IpAddr>,
}

impl PeerBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection; returns false for a banned host
    pub fn connected(&mut self, addr: SocketAddr, outbox: UnboundedSender<Message>) -> bool {
        if self.banned.contains(&addr.ip()) {
            debug!(peer = %addr, "Refusing banned host");
            return false;
        }
        self.peers.insert(addr, PeerInfo::new(addr, Some(outbox)));
        true
    }

    /// Record the peer's version handshake
    pub fn handshake(&mut self, addr: &SocketAddr, version: u32, best_height: u64) {
        if let Some(peer) = self.peers.get_mut(addr) {
            peer.version = version;
            peer.best_height = best_height;
            if peer.state == PeerState::Handshaking {
                peer.state = PeerState::Connected;
            }
            peer.touch();
        }
    }

    pub fn disconnected(&mut self, addr: &SocketAddr) {
        self.peers.remove(addr);
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&PeerInfo> {
        self.peers.get(addr)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut PeerInfo> {
        self.peers.get_mut(addr)
    }

    /// Negotiated protocol version, 0 before the handshake
    pub fn version_of(&self, addr: &SocketAddr) -> u32 {
        self.peers.get(addr).map_or(0, |peer| peer.version)
    }

    /// Report misbehavior; returns true once the peer is banned
    pub fn report_misbehavior(&mut self, addr: &SocketAddr, points: u32) -> bool {
        if points == 0 {
            return false;
        }
        match self.peers.get_mut(addr) {
            Some(peer) => {
                peer.add_misbehavior(points);
                warn!(peer = %addr, points, score = peer.misbehavior_score, "Peer misbehaving");
                let banned = peer.should_ban();
                if banned {
                    self.banned.insert(addr.ip());
                }
                banned
            }
            None => false,
        }
    }

    pub fn is_banned(&self, addr: &SocketAddr) -> bool {
        self.banned.contains(&addr.ip()) || self.peers.get(addr).map_or(false, PeerInfo::should_ban)
    }

    /// Send to every connected peer at or above `min_version`, except `origin`.
    ///
    /// Returns how many outboxes accepted the message.
    pub fn relay(&self, message: &Message, min_version: u32, origin: Option<&SocketAddr>) -> usize {
        let mut delivered = 0;
        for peer in self.peers.values() {
            if Some(&peer.addr) == origin || peer.state != PeerState::Connected || peer.version < min_version {
                continue;
            }
            if peer.send(message.clone()) {
                delivered += 1;
            }
        }
        debug!(command = message.command(), delivered, "Relayed message");
        delivered
    }

    pub fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|peer| peer.state == PeerState::Connected)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_handshake_records_version() {
        let mut book = PeerBook::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let addr = make_addr(8000);

        book.connected(addr, tx);
        assert_eq!(book.connected_count(), 0);
        book.handshake(&addr, 60040, 100);

        assert_eq!(book.connected_count(), 1);
        assert_eq!(book.version_of(&addr), 60040);
        assert_eq!(book.get(&addr).unwrap().best_height, 100);
    }

    #[test]
    fn test_misbehavior_bans_at_threshold() {
        let mut book = PeerBook::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let addr = make_addr(8000);
        book.connected(addr, tx);
        book.handshake(&addr, 60040, 0);

        assert!(!book.report_misbehavior(&addr, 50));
        assert!(!book.report_misbehavior(&addr, 0));
        assert!(book.report_misbehavior(&addr, 50));
        assert!(book.is_banned(&addr));
        assert_eq!(book.get(&addr).unwrap().state, PeerState::Banned);
    }

    #[test]
    fn test_ban_survives_reconnect() {
        let mut book = PeerBook::new();
        let addr = make_addr(8002);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(book.connected(addr, tx));
        assert!(book.report_misbehavior(&addr, BAN_SCORE));
        book.disconnected(&addr);

        let (tx, _rx) = mpsc::unbounded_channel();
        let same_host = make_addr(8003);
        assert!(!book.connected(same_host, tx));
        assert!(book.get(&same_host).is_none());
        assert!(book.is_banned(&same_host));

        let (tx, _rx) = mpsc::unbounded_channel();
        let other_host: SocketAddr = "10.0.0.7:8002".parse().unwrap();
        assert!(book.connected(other_host, tx));
    }

    #[test]
    fn test_fulfilled_requests_are_one_shot() {
        let mut peer = PeerInfo::new(make_addr(8001), None);
        assert!(!peer.has_fulfilled("mnget"));
        assert!(peer.fulfill("mnget"));
        assert!(!peer.fulfill("mnget"));
        assert!(peer.has_fulfilled("mnget"));
    }

    #[test]
    fn test_relay_filters_version_and_origin() {
        let mut book = PeerBook::new();
        let (modern_tx, mut modern_rx) = mpsc::unbounded_channel();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (origin_tx, mut origin_rx) = mpsc::unbounded_channel();
        let modern = make_addr(1);
        let old = make_addr(2);
        let origin = make_addr(3);

        book.connected(modern, modern_tx);
        book.connected(old, old_tx);
        book.connected(origin, origin_tx);
        book.handshake(&modern, 60040, 0);
        book.handshake(&old, 60000, 0);
        book.handshake(&origin, 60040, 0);

        let delivered = book.relay(&Message::MasternodeGet, 60030, Some(&origin));
        assert_eq!(delivered, 1);
        assert_eq!(modern_rx.try_recv().unwrap(), Message::MasternodeGet);
        assert!(old_rx.try_recv().is_err());
        assert!(origin_rx.try_recv().is_err());
    }
}
