//! The event contract a socket multiplexer ("reactor") must deliver to an
//! o2rs process, and the I/O requests a process may issue back.
//!
//! This crate is deliberately thin: spec §1 excludes "the raw socket I/O
//! multiplexer" from the core, specifying only the interface it must satisfy.
//! A concrete reactor (eg. `o2-net-poll`) drives a [`StateMachine`] by
//! delivering readiness as method calls and draining [`Io`] requests from it
//! as an iterator.
pub mod io;
pub mod link;
pub mod timeout;

pub use io::{Disconnect, Io, ListenTag};
pub use link::Link;
pub use timeout::TimeoutManager;

use std::borrow::Cow;
use std::net;

use o2_common::LocalTime;

/// Implemented by the core process; driven by a reactor such as `o2-net-poll`.
///
/// A state machine is also an [`Iterator`] of [`Io`] requests: after each
/// callback, the reactor drains the iterator until it returns `None` and acts
/// on whatever it yielded (writes, connects, disconnects, timers, events).
pub trait StateMachine: Iterator<Item = Io<Self::Message, Self::Event, Self::DisconnectReason>> {
    /// The wire message type exchanged with peers.
    type Message;
    /// The state machine's own externally-visible event type.
    type Event;
    /// The state machine's reasons for voluntarily disconnecting a peer.
    type DisconnectReason;

    /// Called once, before any other callback, with the reactor's starting time.
    fn initialize(&mut self, time: LocalTime) {
        let _ = time;
    }

    /// A framed message arrived from `addr`.
    fn message_received(&mut self, addr: &net::SocketAddr, msg: Cow<Self::Message>);

    /// An outbound connection attempt to `addr` was dispatched (not yet confirmed).
    fn attempted(&mut self, addr: &net::SocketAddr) {
        let _ = addr;
    }

    /// A connection to `addr` was established.
    fn connected(&mut self, addr: net::SocketAddr, local_addr: &net::SocketAddr, link: Link);

    /// A connection to `addr` went down.
    fn disconnected(&mut self, addr: &net::SocketAddr, reason: Disconnect<Self::DisconnectReason>);

    /// Called on every reactor wake-up (readiness or timeout) with the current time.
    fn tick(&mut self, local_time: LocalTime) {
        let _ = local_time;
    }

    /// A timer previously requested via [`Io::SetTimer`] fired.
    fn timer_expired(&mut self) {}

    /// A previously requested [`Io::Listen`] bind succeeded at `addr`. Needed
    /// because binding is a bounded sweep over candidate ports (spec §4.7):
    /// the reactor owns the retry loop, and reports back which candidate won.
    fn listening(&mut self, addr: net::SocketAddr, tag: ListenTag) {
        let _ = (addr, tag);
    }
}
