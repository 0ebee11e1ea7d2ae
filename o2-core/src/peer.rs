//! Peer identity and per-peer connection state (spec §3 "Peer identity", §4.6).
use std::collections::HashMap;
use std::net;

use o2_common::LocalTime;

use crate::transport::FrameAccumulator;

/// A peer is identified by `(ip, tcp_port)` (spec §3). We reuse
/// `std::net::SocketAddr` directly rather than a bespoke padded-string key
/// type, matching the teacher's own `type PeerId = net::SocketAddr`; the
/// canonical padded-string wire form (used in `/_o2/dy` and service election)
/// is produced on demand by [`wire_key`].
pub type PeerId = net::SocketAddr;

/// The canonical padded-string form of a peer identity used on the wire and
/// as the service-election tiebreak key (spec §3, §4.7): `ip:port`.
pub fn wire_key(id: &PeerId) -> String {
    format!("{}:{}", id.ip(), id.port())
}

/// Per-peer connection bookkeeping: its declared ensemble name, stream
/// reassembly state, and the services it currently contributes.
#[derive(Debug, Default)]
pub struct Peer {
    /// Reassembles inbound stream frames (spec §4.6).
    pub reader: FrameAccumulator,
    /// Bytes queued for the stream socket that haven't been written yet
    /// (spec §4.6: "partial writes buffer the remainder").
    pub pending_write: Vec<u8>,
    /// Service names this peer currently provides, so a teardown can cascade
    /// (spec §3 "Lifecycles": "removing a peer removes every provider it
    /// contributed").
    pub services: Vec<String>,
    /// Last time any traffic was seen from this peer.
    pub last_seen: LocalTime,
}

impl Peer {
    /// A freshly connected peer with no known services yet.
    pub fn new(now: LocalTime) -> Self {
        Self {
            last_seen: now,
            ..Self::default()
        }
    }
}

/// The set of currently connected peers.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<PeerId, Peer>,
}

impl PeerTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly connected peer.
    pub fn insert(&mut self, id: PeerId, peer: Peer) {
        self.peers.insert(id, peer);
    }

    /// Look up a peer by id.
    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Look up a peer by id, mutably.
    pub fn get_mut(&mut self, id: &PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id)
    }

    /// Remove a peer, returning it (and thereby the services it contributed)
    /// so the caller can withdraw them from the service table.
    pub fn remove(&mut self, id: &PeerId) -> Option<Peer> {
        self.peers.remove(id)
    }

    /// Whether `id` is currently connected.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Iterate over connected peer ids.
    pub fn ids(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.keys()
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peers are connected.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_key_is_ip_colon_port() {
        let addr: PeerId = "192.168.1.7:8001".parse().unwrap();
        assert_eq!(wire_key(&addr), "192.168.1.7:8001");
    }

    #[test]
    fn removing_a_peer_returns_its_contributed_services() {
        let mut table = PeerTable::new();
        let addr: PeerId = "127.0.0.1:9000".parse().unwrap();
        let mut peer = Peer::new(LocalTime::from_secs(0));
        peer.services.push("mix".into());
        table.insert(addr, peer);

        let removed = table.remove(&addr).unwrap();
        assert_eq!(removed.services, vec!["mix".to_string()]);
        assert!(!table.contains(&addr));
    }
}
