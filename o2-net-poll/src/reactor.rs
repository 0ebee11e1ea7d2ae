//! The concrete reactor: a single-threaded `popol::Sources` poll loop that
//! drives an [`o2_net::StateMachine`] (spec §1's "raw socket I/O multiplexer").
use std::borrow::Cow;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::net;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crossbeam_channel as chan;
use log::{debug, error, info, warn};
use thiserror::Error as ThisError;

use o2_common::LocalTime;
use o2_core::discovery::CANDIDATE_PORTS;
use o2_core::transport::{encode_frame, Envelope, FrameAccumulator, Transport};
use o2_net::{Disconnect, Io, Link, ListenTag, StateMachine};

/// Socket read buffer size: comfortably above [`o2_core::transport::DEFAULT_MAX_MESSAGE_SIZE`]
/// so an ordinary message is read in one pass.
const READ_BUF_SIZE: usize = 65536;

/// Upper bound on how long a single `wait_timeout` call may block. Keeps the
/// loop responsive to commands submitted through a `Handle`, which (unlike a
/// peer socket or the discovery timer) has no file descriptor to register
/// with `popol` and so can't wake the reactor directly.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors the reactor itself raises while driving the loop (distinct from
/// [`o2_common::Error`], which covers the protocol layer above it).
#[derive(ThisError, Debug)]
pub enum Error {
    /// The underlying socket layer failed outright.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Every candidate port in a bind sweep was unavailable.
    #[error("no candidate port available for {0:?}")]
    BindExhausted(ListenTag),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Source {
    Peer(net::SocketAddr),
    Listener,
    Udp(net::SocketAddr),
    /// A TCP-based OSC bridge port's listening socket (spec §4.8
    /// `bridge_port_new(.., stream_flag=true)`), keyed by its bound address.
    BridgeListener(net::SocketAddr),
    /// An accepted connection on a [`Source::BridgeListener`], keyed by the
    /// remote peer's address. Kept out of the regular peer table: this
    /// connection isn't a protocol peer, it's a raw OSC stream source.
    BridgePeer(net::SocketAddr),
}

/// One peer's TCP stream, with its inbound frame accumulator and outbound
/// write queue (spec §4.6).
struct PeerSocket {
    stream: net::TcpStream,
    reader: FrameAccumulator,
    write_queue: VecDeque<Vec<u8>>,
}

impl PeerSocket {
    fn new(stream: net::TcpStream) -> Self {
        Self {
            stream,
            reader: FrameAccumulator::new(),
            write_queue: VecDeque::new(),
        }
    }

    fn queue(&mut self, frame: Vec<u8>) {
        self.write_queue.push_back(frame);
    }

    /// Attempt to flush the outbound queue, returning whether anything is
    /// still pending (a short write or `WouldBlock`), or the I/O error that
    /// means this peer is gone.
    fn drain(&mut self) -> io::Result<bool> {
        while let Some(mut buf) = self.write_queue.pop_front() {
            match self.stream.write(&buf) {
                Ok(n) if n == buf.len() => continue,
                Ok(n) => {
                    buf.drain(..n);
                    self.write_queue.push_front(buf);
                    return Ok(true);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.write_queue.push_front(buf);
                    return Ok(true);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(false)
    }

    /// Read whatever is available into `buf`, reassembling any complete
    /// length-prefixed frames (spec §4.6).
    fn read_frames(&mut self, buf: &mut [u8]) -> io::Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();
        loop {
            match self.stream.read(buf) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the connection")),
                Ok(n) => {
                    self.reader.feed(&buf[..n]);
                    while let Some(frame) = self
                        .reader
                        .pop_frame()
                        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed stream frame"))?
                    {
                        frames.push(frame);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(frames)
    }
}

/// A `popol`-based reactor. Owns every socket; a [`StateMachine`] is driven
/// purely through callbacks and its own [`Io`] output, never touching a
/// socket directly.
pub struct Reactor {
    peers: HashMap<net::SocketAddr, PeerSocket>,
    listener: Option<net::TcpListener>,
    udp: HashMap<net::SocketAddr, net::UdpSocket>,
    primary_udp: Option<net::SocketAddr>,
    /// Bound addresses of UDP sockets opened for an OSC bridge port (as
    /// opposed to the discovery socket): traffic on these is delivered to
    /// [`StateMachine::message_received`] tagged with the *bound* address,
    /// since bridge routing keys off which port received it, not who sent it.
    bridge_udp: HashSet<net::SocketAddr>,
    /// TCP listeners opened for a stream-mode OSC bridge port, keyed by
    /// bound address.
    bridge_listeners: HashMap<net::SocketAddr, net::TcpListener>,
    /// Accepted connections on a bridge TCP listener: remote addr -> (the
    /// listener's bound addr, the connection's read buffer).
    bridge_peers: HashMap<net::SocketAddr, (net::SocketAddr, PeerSocket)>,
    sources: popol::Sources<Source>,
    next_wake: Option<LocalTime>,
    read_buf: Vec<u8>,
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor {
    /// A reactor with nothing registered yet.
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            listener: None,
            udp: HashMap::new(),
            primary_udp: None,
            bridge_udp: HashSet::new(),
            bridge_listeners: HashMap::new(),
            bridge_peers: HashMap::new(),
            sources: popol::Sources::new(),
            next_wake: None,
            read_buf: vec![0u8; READ_BUF_SIZE],
        }
    }

    /// Bind `tcp_listen_addrs` (only the first is honored; see module docs)
    /// and drive `protocol` until an unrecoverable I/O error occurs, sending
    /// every [`Io::Event`] it raises to `events_tx`.
    pub fn run<P>(
        &mut self,
        mut protocol: P,
        events_tx: chan::Sender<P::Event>,
        tcp_listen_addrs: &[net::SocketAddr],
    ) -> Result<(), Error>
    where
        P: StateMachine<Message = Envelope>,
    {
        if let Some(&addr) = tcp_listen_addrs.first() {
            let listener = net::TcpListener::bind(addr)?;
            listener.set_nonblocking(true)?;
            self.sources.register(Source::Listener, &listener, popol::interest::READ);
            info!("listening for peers on {}", listener.local_addr()?);
            if tcp_listen_addrs.len() > 1 {
                warn!(
                    "o2-net-poll binds a single TCP listen address; ignoring {} extra",
                    tcp_listen_addrs.len() - 1
                );
            }
            self.listener = Some(listener);
        }

        protocol.initialize(LocalTime::from(SystemTime::now()));
        self.flush(&mut protocol, &events_tx)?;

        let mut events = popol::Events::new();

        loop {
            let now = LocalTime::from(SystemTime::now());
            let timeout = self.poll_timeout(now);

            match self.sources.wait_timeout(&mut events, timeout) {
                Ok(()) => {
                    let ready: Vec<(Source, bool, bool)> = events
                        .iter()
                        .map(|(source, ev)| (source.clone(), ev.readable, ev.writable))
                        .collect();
                    for (source, readable, writable) in ready {
                        match source {
                            Source::Peer(addr) => {
                                if writable {
                                    self.handle_peer_writable(addr, &mut protocol, &events_tx)?;
                                }
                                if readable {
                                    self.handle_peer_readable(addr, &mut protocol, &events_tx)?;
                                }
                            }
                            Source::Listener => self.handle_accept(&mut protocol, &events_tx)?,
                            Source::Udp(bound) => self.handle_udp_readable(bound, &mut protocol, &events_tx)?,
                            Source::BridgeListener(bound) => self.handle_bridge_accept(bound, &mut protocol, &events_tx)?,
                            Source::BridgePeer(addr) => {
                                if readable {
                                    self.handle_bridge_peer_readable(addr, &mut protocol, &events_tx)?;
                                }
                            }
                        }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {}
                Err(err) => return Err(err.into()),
            }

            let now = LocalTime::from(SystemTime::now());
            if let Some(due) = self.next_wake {
                if now >= due {
                    self.next_wake = None;
                    protocol.timer_expired();
                    self.flush(&mut protocol, &events_tx)?;
                }
            }
            protocol.tick(now);
            self.flush(&mut protocol, &events_tx)?;
        }
    }

    fn poll_timeout(&self, now: LocalTime) -> Duration {
        match self.next_wake {
            Some(due) if due > now => {
                let remaining: Duration = (due - now).into();
                remaining.min(MAX_POLL_INTERVAL)
            }
            Some(_) => Duration::from_millis(0),
            None => MAX_POLL_INTERVAL,
        }
    }

    fn handle_accept<P>(&mut self, protocol: &mut P, events_tx: &chan::Sender<P::Event>) -> Result<(), Error>
    where
        P: StateMachine<Message = Envelope>,
    {
        let listener = match &self.listener {
            Some(listener) => listener,
            None => return Ok(()),
        };
        loop {
            let (conn, addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!("accept failed: {}", err);
                    break;
                }
            };
            conn.set_nonblocking(true)?;
            let local_addr = conn.local_addr()?;
            self.sources.register(Source::Peer(addr), &conn, popol::interest::ALL);
            self.peers.insert(addr, PeerSocket::new(conn));
            protocol.connected(addr, &local_addr, Link::Inbound);
            self.flush(protocol, events_tx)?;
        }
        Ok(())
    }

    fn handle_peer_readable<P>(
        &mut self,
        addr: net::SocketAddr,
        protocol: &mut P,
        events_tx: &chan::Sender<P::Event>,
    ) -> Result<(), Error>
    where
        P: StateMachine<Message = Envelope>,
    {
        let mut buf = std::mem::take(&mut self.read_buf);
        let outcome = match self.peers.get_mut(&addr) {
            Some(peer) => peer.read_frames(&mut buf),
            None => {
                self.read_buf = buf;
                return Ok(());
            }
        };
        self.read_buf = buf;

        match outcome {
            Ok(frames) => {
                for frame in frames {
                    protocol.message_received(&addr, Cow::Owned(Envelope::stream(frame)));
                    self.flush(protocol, events_tx)?;
                }
                Ok(())
            }
            Err(err) => {
                self.teardown_peer(&addr);
                protocol.disconnected(&addr, Disconnect::ConnectionError(Arc::new(err)));
                self.flush(protocol, events_tx)
            }
        }
    }

    fn handle_peer_writable<P>(
        &mut self,
        addr: net::SocketAddr,
        protocol: &mut P,
        events_tx: &chan::Sender<P::Event>,
    ) -> Result<(), Error>
    where
        P: StateMachine<Message = Envelope>,
    {
        let result = match self.peers.get_mut(&addr) {
            Some(peer) => peer.drain(),
            None => return Ok(()),
        };
        match result {
            Ok(_still_pending) => Ok(()),
            Err(err) => {
                self.teardown_peer(&addr);
                protocol.disconnected(&addr, Disconnect::ConnectionError(Arc::new(err)));
                self.flush(protocol, events_tx)
            }
        }
    }

    fn handle_udp_readable<P>(
        &mut self,
        bound: net::SocketAddr,
        protocol: &mut P,
        events_tx: &chan::Sender<P::Event>,
    ) -> Result<(), Error>
    where
        P: StateMachine<Message = Envelope>,
    {
        let mut buf = std::mem::take(&mut self.read_buf);
        let deliver_as_bound = self.bridge_udp.contains(&bound);
        loop {
            let socket = match self.udp.get(&bound) {
                Some(socket) => socket,
                None => break,
            };
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let envelope = Envelope::datagram(buf[..n].to_vec());
                    let addr = if deliver_as_bound { bound } else { from };
                    protocol.message_received(&addr, Cow::Owned(envelope));
                    self.flush(protocol, events_tx)?;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!("udp recv on {} failed: {}", bound, err);
                    break;
                }
            }
        }
        self.read_buf = buf;
        Ok(())
    }

    fn teardown_peer(&mut self, addr: &net::SocketAddr) {
        if let Some(peer) = self.peers.remove(addr) {
            let _ = peer.stream.shutdown(net::Shutdown::Both);
        }
        self.sources.unregister(&Source::Peer(*addr));
    }

    /// Accept every pending connection on a stream-mode OSC bridge listener
    /// (spec §4.8 `bridge_port_new(.., stream_flag=true)`). Unlike
    /// [`Self::handle_accept`], these connections never reach
    /// `protocol.connected` — they aren't protocol peers, just a source of
    /// OSC stream frames tagged with the listener's bound address.
    fn handle_bridge_accept<P>(
        &mut self,
        bound: net::SocketAddr,
        protocol: &mut P,
        events_tx: &chan::Sender<P::Event>,
    ) -> Result<(), Error>
    where
        P: StateMachine<Message = Envelope>,
    {
        let listener = match self.bridge_listeners.get(&bound) {
            Some(listener) => listener,
            None => return Ok(()),
        };
        loop {
            let (conn, addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!("bridge accept on {} failed: {}", bound, err);
                    break;
                }
            };
            conn.set_nonblocking(true)?;
            self.sources.register(Source::BridgePeer(addr), &conn, popol::interest::READ);
            self.bridge_peers.insert(addr, (bound, PeerSocket::new(conn)));
        }
        let _ = (protocol, events_tx);
        Ok(())
    }

    fn handle_bridge_peer_readable<P>(
        &mut self,
        addr: net::SocketAddr,
        protocol: &mut P,
        events_tx: &chan::Sender<P::Event>,
    ) -> Result<(), Error>
    where
        P: StateMachine<Message = Envelope>,
    {
        let mut buf = std::mem::take(&mut self.read_buf);
        let outcome = match self.bridge_peers.get_mut(&addr) {
            Some((_, peer)) => peer.read_frames(&mut buf),
            None => {
                self.read_buf = buf;
                return Ok(());
            }
        };
        self.read_buf = buf;

        let bound = self.bridge_peers.get(&addr).map(|(bound, _)| *bound);
        match outcome {
            Ok(frames) => {
                if let Some(bound) = bound {
                    for frame in frames {
                        protocol.message_received(&bound, Cow::Owned(Envelope::stream(frame)));
                        self.flush(protocol, events_tx)?;
                    }
                }
                Ok(())
            }
            Err(_) => {
                self.bridge_peers.remove(&addr);
                self.sources.unregister(&Source::BridgePeer(addr));
                Ok(())
            }
        }
    }

    fn flush<P>(&mut self, protocol: &mut P, events_tx: &chan::Sender<P::Event>) -> Result<(), Error>
    where
        P: StateMachine<Message = Envelope>,
    {
        let outs: Vec<Io<Envelope, P::Event, P::DisconnectReason>> = protocol.by_ref().collect();
        for out in outs {
            self.handle_output(out, protocol, events_tx)?;
        }
        Ok(())
    }

    fn handle_output<P>(
        &mut self,
        out: Io<Envelope, P::Event, P::DisconnectReason>,
        protocol: &mut P,
        events_tx: &chan::Sender<P::Event>,
    ) -> Result<(), Error>
    where
        P: StateMachine<Message = Envelope>,
    {
        match out {
            Io::Write(addr, envelope) => self.send(addr, envelope, protocol),
            Io::Broadcast(addrs, envelope) => {
                for addr in addrs {
                    self.send(addr, envelope.clone(), protocol);
                }
            }
            Io::Connect(addr) => self.connect(addr, protocol),
            Io::Listen(addr, tag) => self.listen(addr, tag, protocol)?,
            Io::Disconnect(addr, reason) => {
                self.teardown_peer(&addr);
                protocol.disconnected(&addr, Disconnect::StateMachine(reason));
            }
            Io::SetTimer(duration) => {
                self.next_wake = Some(LocalTime::from(SystemTime::now()) + duration);
            }
            Io::Event(event) => {
                if events_tx.try_send(event).is_err() {
                    warn!("event subscriber channel full or disconnected, dropping event");
                }
            }
        }
        Ok(())
    }

    fn send<P>(&mut self, addr: net::SocketAddr, envelope: Envelope, protocol: &mut P)
    where
        P: StateMachine<Message = Envelope>,
    {
        match envelope.transport {
            Transport::Stream => {
                let framed = encode_frame(&envelope.bytes);
                let result = match self.peers.get_mut(&addr) {
                    Some(peer) => {
                        peer.queue(framed);
                        peer.drain()
                    }
                    None => {
                        warn!("write to unknown peer {}", addr);
                        return;
                    }
                };
                if let Err(err) = result {
                    self.teardown_peer(&addr);
                    protocol.disconnected(&addr, Disconnect::ConnectionError(Arc::new(err)));
                }
            }
            Transport::Datagram => match self.primary_udp.and_then(|bound| self.udp.get(&bound)) {
                Some(socket) => {
                    if let Err(err) = socket.send_to(&envelope.bytes, addr) {
                        warn!("udp send to {} failed: {}", addr, err);
                    }
                }
                None => warn!("no datagram socket bound yet, dropping write to {}", addr),
            },
        }
    }

    fn connect<P>(&mut self, addr: net::SocketAddr, protocol: &mut P)
    where
        P: StateMachine<Message = Envelope>,
    {
        protocol.attempted(&addr);
        match net::TcpStream::connect(addr) {
            Ok(stream) => {
                if let Err(err) = stream.set_nonblocking(true) {
                    warn!("connect to {} failed to go nonblocking: {}", addr, err);
                    return;
                }
                let local_addr = match stream.local_addr() {
                    Ok(local_addr) => local_addr,
                    Err(err) => {
                        warn!("connect to {} has no local address: {}", addr, err);
                        return;
                    }
                };
                self.sources.register(Source::Peer(addr), &stream, popol::interest::ALL);
                self.peers.insert(addr, PeerSocket::new(stream));
                protocol.connected(addr, &local_addr, Link::Outbound);
            }
            Err(err) => debug!("connect to {} failed: {}", addr, err),
        }
    }

    fn listen<P>(&mut self, addr: net::SocketAddr, tag: ListenTag, protocol: &mut P) -> Result<(), Error>
    where
        P: StateMachine<Message = Envelope>,
    {
        match &tag {
            ListenTag::Discovery => self.listen_discovery_sweep(addr, protocol),
            ListenTag::OscService(_, stream) if *stream => self.bind_bridge_tcp(addr, tag, protocol),
            ListenTag::OscService(..) => Ok(self.bind_udp(addr, tag, protocol)?),
        }
    }

    /// Bind sweep over [`CANDIDATE_PORTS`] on `first`'s address (spec §4.7):
    /// the reactor owns the retry loop and reports back which candidate won
    /// via [`StateMachine::listening`].
    fn listen_discovery_sweep<P>(&mut self, first: net::SocketAddr, protocol: &mut P) -> Result<(), Error>
    where
        P: StateMachine<Message = Envelope>,
    {
        let ip = first.ip();
        for &port in CANDIDATE_PORTS.iter() {
            let candidate = net::SocketAddr::new(ip, port);
            match self.bind_udp(candidate, ListenTag::Discovery, protocol) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::AddrInUse => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(Error::BindExhausted(ListenTag::Discovery))
    }

    fn bind_udp<P>(&mut self, addr: net::SocketAddr, tag: ListenTag, protocol: &mut P) -> io::Result<()>
    where
        P: StateMachine<Message = Envelope>,
    {
        let socket = net::UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let bound = socket.local_addr()?;
        self.sources.register(Source::Udp(bound), &socket, popol::interest::READ);
        if tag == ListenTag::Discovery {
            self.primary_udp = Some(bound);
        } else {
            self.bridge_udp.insert(bound);
        }
        self.udp.insert(bound, socket);
        protocol.listening(bound, tag);
        Ok(())
    }

    /// Bind a stream-mode OSC bridge port (spec §4.8
    /// `bridge_port_new(.., stream_flag=true)`).
    fn bind_bridge_tcp<P>(&mut self, addr: net::SocketAddr, tag: ListenTag, protocol: &mut P) -> Result<(), Error>
    where
        P: StateMachine<Message = Envelope>,
    {
        let listener = net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let bound = listener.local_addr()?;
        self.sources.register(Source::BridgeListener(bound), &listener, popol::interest::READ);
        self.bridge_listeners.insert(bound, listener);
        protocol.listening(bound, tag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use o2_common::LocalDuration;

    #[test]
    fn poll_timeout_falls_back_to_max_interval_without_a_timer() {
        let reactor = Reactor::new();
        assert_eq!(reactor.poll_timeout(LocalTime::from_secs(0)), MAX_POLL_INTERVAL);
    }

    #[test]
    fn poll_timeout_is_clamped_to_max_interval() {
        let mut reactor = Reactor::new();
        reactor.next_wake = Some(LocalTime::from_secs(100));
        let timeout = reactor.poll_timeout(LocalTime::from_secs(0));
        assert_eq!(timeout, MAX_POLL_INTERVAL);
    }

    #[test]
    fn poll_timeout_shrinks_as_the_timer_approaches() {
        let mut reactor = Reactor::new();
        let due = LocalTime::EPOCH + LocalDuration::from_secs_f64(0.2);
        reactor.next_wake = Some(due);
        let timeout = reactor.poll_timeout(LocalTime::EPOCH);
        assert_eq!(timeout, Duration::from_millis(200));
    }

    #[test]
    fn poll_timeout_is_zero_once_due() {
        let mut reactor = Reactor::new();
        reactor.next_wake = Some(LocalTime::from_secs(5));
        let timeout = reactor.poll_timeout(LocalTime::from_secs(9));
        assert_eq!(timeout, Duration::from_millis(0));
    }
}
