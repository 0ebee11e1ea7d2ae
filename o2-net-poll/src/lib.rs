//! A `popol`-based socket reactor driving an [`o2_net::StateMachine`].
//!
//! Spec §1 deliberately excludes the raw socket multiplexer from the core
//! crate; this is that multiplexer. It owns the TCP listener and per-peer
//! streams, the UDP sockets opened for discovery and OSC bridge ports, and a
//! single one-shot wake-up timer, translating socket readiness into
//! [`o2_net::StateMachine`] callbacks and draining its [`o2_net::Io`] requests
//! back into socket operations.
#![warn(missing_docs)]

pub mod reactor;

pub use reactor::{Error, Reactor};
