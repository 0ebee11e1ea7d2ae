//! Core of the peer-to-peer discovery, addressing, and scheduled
//! message-dispatch substrate, plus its OSC interoperation bridge.
//!
//! The crate's entry point is [`Process`], which implements
//! [`o2_net::StateMachine`] and is meant to be driven by a reactor such as
//! `o2-net-poll`.
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod discovery;
pub mod message;
pub mod osc;
pub mod outbox;
pub mod peer;
pub mod pool;
pub mod process;
pub mod scheduler;
pub mod service;
pub mod transport;
pub mod wire;

pub use clock::ClockBridge;
pub use config::Config;
pub use message::{Arg, Atomic, Message, Payload};
pub use o2_common::{DebugFlags, Error, GlobalTime, LocalDuration, LocalTime, Result};
pub use peer::{Peer, PeerId, PeerTable};
pub use process::{Command, DisconnectReason, Event, Handle, Io, Process};
pub use service::{Provider, ServiceTable, Tap};
pub use transport::Transport;
