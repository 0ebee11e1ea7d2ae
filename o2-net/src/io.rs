//! The I/O a [`crate::StateMachine`] requests from its reactor, and the
//! reason a connection went down.
use std::net;
use std::sync::Arc;

use o2_common::LocalDuration;

/// Why a peer connection was torn down.
#[derive(Debug, Clone)]
pub enum Disconnect<D> {
    /// The state machine asked for the disconnect.
    StateMachine(D),
    /// The transport layer hit a socket error (spec §4.6: "a socket error
    /// tears down the peer").
    ConnectionError(Arc<std::io::Error>),
}

impl<D: std::fmt::Display> std::fmt::Display for Disconnect<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateMachine(reason) => write!(f, "{}", reason),
            Self::ConnectionError(err) => write!(f, "connection error: {}", err),
        }
    }
}

/// What a [`Io::Listen`] request's socket should be routed back as once it
/// receives traffic (§4.7 discovery, §4.8 OSC bridge ports both listen, but
/// on different tags).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenTag {
    /// The discovery broadcast-sweep socket.
    Discovery,
    /// An inbound OSC bridge port (spec §4.8 `bridge_port_new`), tagged with
    /// the local service traffic on it is addressed to and whether it should
    /// be bound as a TCP listener (`true`) or a UDP socket (`false`).
    OscService(String, bool),
}

/// A request a [`crate::StateMachine`] issues to its reactor. Generic over the
/// wire message type `M`, the state machine's own event type `E`, and the
/// disconnect-reason type `D` — this is the entire "event contract" spec §1
/// calls out as owned by the raw multiplexer.
#[derive(Debug, Clone)]
pub enum Io<M, E, D> {
    /// Send a message to a connected peer, over whichever transport
    /// (stream/datagram) the reactor associates with that peer.
    Write(net::SocketAddr, M),
    /// Broadcast a datagram to every given address (spec §4.7: the bounded
    /// sweep across candidate discovery ports on the local subnet).
    Broadcast(Vec<net::SocketAddr>, M),
    /// Open an outbound connection to a peer.
    Connect(net::SocketAddr),
    /// Bind and listen on `addr`, routing whatever arrives back as `tag`.
    Listen(net::SocketAddr, ListenTag),
    /// Tear down a connection.
    Disconnect(net::SocketAddr, D),
    /// Arm a one-shot wake-up timer.
    SetTimer(LocalDuration),
    /// An event the state machine wants surfaced to the host/subscriber.
    Event(E),
}
