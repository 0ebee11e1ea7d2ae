//! A draining queue of [`o2_net::Io`] requests, shared by every manager
//! inside [`crate::process::Process`]. Each manager owns one and is itself an
//! `Iterator<Item = Io<..>>` that simply delegates to it — the same shape the
//! teacher's per-subsystem managers use.
use std::collections::VecDeque;
use std::net;

use o2_common::LocalDuration;
use o2_net::{Disconnect, Io, ListenTag};

/// Buffers outbound I/O requests produced while handling one event, callback,
/// or tick, until the reactor drains them via the owning [`Iterator`] impl.
#[derive(Debug)]
pub struct Outbox<M, E, D> {
    queue: VecDeque<Io<M, E, D>>,
}

impl<M, E, D> Default for Outbox<M, E, D> {
    fn default() -> Self {
        Self { queue: VecDeque::new() }
    }
}

impl<M, E, D> Outbox<M, E, D> {
    /// An empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message to a connected peer.
    pub fn write(&mut self, addr: net::SocketAddr, msg: M) {
        self.queue.push_back(Io::Write(addr, msg));
    }

    /// Queue a broadcast datagram to every given address.
    pub fn broadcast(&mut self, addrs: Vec<net::SocketAddr>, msg: M) {
        self.queue.push_back(Io::Broadcast(addrs, msg));
    }

    /// Queue an outbound connection attempt.
    pub fn connect(&mut self, addr: net::SocketAddr) {
        self.queue.push_back(Io::Connect(addr));
    }

    /// Queue a bind/listen request.
    pub fn listen(&mut self, addr: net::SocketAddr, tag: ListenTag) {
        self.queue.push_back(Io::Listen(addr, tag));
    }

    /// Queue a peer disconnect.
    pub fn disconnect(&mut self, addr: net::SocketAddr, reason: D) {
        self.queue.push_back(Io::Disconnect(addr, Disconnect::StateMachine(reason)));
    }

    /// Queue a one-shot wake-up timer.
    pub fn set_timer(&mut self, after: LocalDuration) {
        self.queue.push_back(Io::SetTimer(after));
    }

    /// Queue an externally-visible event.
    pub fn event(&mut self, event: E) {
        self.queue.push_back(Io::Event(event));
    }

    /// Number of requests currently queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no requests are currently queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<M, E, D> Iterator for Outbox<M, E, D> {
    type Item = Io<M, E, D>;

    fn next(&mut self) -> Option<Self::Item> {
        self.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fifo_order() {
        let mut outbox: Outbox<u8, i32, ()> = Outbox::new();
        outbox.event(1);
        outbox.event(2);
        assert!(matches!(outbox.next(), Some(Io::Event(1))));
        assert!(matches!(outbox.next(), Some(Io::Event(2))));
        assert!(outbox.next().is_none());
    }
}
