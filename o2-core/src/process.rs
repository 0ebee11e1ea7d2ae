//! The top-level process: implements [`o2_net::StateMachine`], tying
//! together the wire codec, clock bridge, scheduler, service table, peer
//! table, discovery, and the OSC bridge (spec §2 "Data flow").
use std::borrow::Cow;
use std::net;

use crossbeam_channel as chan;
use log::{debug, trace, warn};

use o2_common::{DebugFlags, LocalDuration, LocalTime, Result as O2Result};
use o2_net::{Link, ListenTag};

use crate::clock::ClockBridge;
use crate::config::Config;
use crate::discovery::{self, DiscoveryManager, HubFlag};
use crate::message::{Arg, Atomic, Message, Payload};
use crate::osc;
use crate::outbox::Outbox;
use crate::peer::{wire_key, Peer, PeerId, PeerTable};
use crate::pool::BufferPool;
use crate::scheduler::{self, GlobalScheduler};
use crate::service::{Handler, Provider, ServiceTable};
use crate::transport::{encode_frame, Envelope, Transport};
use crate::wire;

/// `/_o2/dy` — discovery broadcast address.
pub const DY_ADDRESS: &str = "/_o2/dy";
/// `/_o2/sv` — service vector exchange address.
pub const SV_ADDRESS: &str = "/_o2/sv";
/// `/_o2/si` — local status-info subscription address (spec §6).
pub const SI_ADDRESS: &str = "/_o2/si";
/// `/_o2/cs/cs` — clock-synchronized notification (spec §4.3, §6).
pub const CS_CS_ADDRESS: &str = "/_o2/cs/cs";
/// `/_o2/cs/rt` — round-trip ping driving clock synchronization (spec §4.3, §6).
pub const CS_RT_ADDRESS: &str = "/_o2/cs/rt";

/// Output of a [`Process`] state transition.
pub type Io = o2_net::Io<Envelope, Event, DisconnectReason>;

/// [`Process`]'s externally-visible events (spec §6's `/_o2/si` and, more
/// broadly, anything a host thread might want to observe).
#[derive(Debug, Clone)]
pub enum Event {
    /// Local discovery/service bookkeeping has completed binding.
    Ready {
        /// The discovery port this process bound.
        discovery_port: u16,
    },
    /// A peer was added to or removed from the peer set.
    PeerConnected(PeerId),
    /// A peer disconnected, cascading withdrawal of its services.
    PeerDisconnected(PeerId),
    /// A service's active provider changed (spec §4.5 `/_o2/si`).
    ServiceStatusChanged {
        /// Service name.
        name: String,
        /// Whether the service now has an active provider at all.
        active: bool,
    },
    /// A local handler for `address` ran and returned an error code.
    HandlerError {
        /// Address the handler was invoked for.
        address: String,
        /// The handler's own error code.
        code: i32,
    },
    /// The clock left the unsynchronized state (spec §4.3 `on_clocksynced`).
    ClockSynchronized,
}

/// Why a peer connection was torn down by [`Process`] itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer's ensemble name didn't match ours.
    EnsembleMismatch,
    /// Three consecutive codec errors on this peer's stream (spec §7).
    RepeatedCodecErrors,
    /// The host asked us to shut down.
    Shutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnsembleMismatch => write!(f, "ensemble name mismatch"),
            Self::RepeatedCodecErrors => write!(f, "repeated codec errors"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A request submitted to a running [`Process`] from another thread via a
/// [`Handle`] (spec §5: the process is single-threaded cooperative; this is
/// the ambient cross-thread command channel, mirrored on the teacher's own
/// `Command`/event channel).
pub enum Command {
    /// Submit a message for dispatch (scheduled or immediate).
    Send(Message),
    /// Register a local service handler.
    RegisterLocal {
        /// Service name.
        name: String,
        /// Dispatch function.
        handler: Handler,
        /// Opaque property string advertised to peers.
        properties: String,
    },
    /// Install a tap.
    Tap {
        /// Tapped service.
        tappee: String,
        /// Service receiving mirrored messages.
        tapper: String,
    },
    /// Report that the (out-of-scope) clock-sync algorithm has converged,
    /// with the local-to-global offset it computed (spec §4.3 `on_clocksynced`).
    ClockSynced(f64),
}

/// A thread-safe submission endpoint for a running [`Process`].
#[derive(Clone)]
pub struct Handle {
    tx: chan::Sender<Command>,
}

impl Handle {
    /// Submit a message for dispatch.
    pub fn send(&self, msg: Message) -> Result<(), chan::SendError<Command>> {
        self.tx.send(Command::Send(msg))
    }

    /// Register a local service handler.
    pub fn register_local(
        &self,
        name: impl Into<String>,
        handler: Handler,
        properties: impl Into<String>,
    ) -> Result<(), chan::SendError<Command>> {
        self.tx.send(Command::RegisterLocal {
            name: name.into(),
            handler,
            properties: properties.into(),
        })
    }

    /// Install a tap.
    pub fn tap(&self, tappee: impl Into<String>, tapper: impl Into<String>) -> Result<(), chan::SendError<Command>> {
        self.tx.send(Command::Tap {
            tappee: tappee.into(),
            tapper: tapper.into(),
        })
    }

    /// Report that the clock-sync algorithm (driven by the host, out of
    /// scope here) has converged on `offset` (spec §4.3 `on_clocksynced`).
    pub fn clock_synced(&self, offset: f64) -> Result<(), chan::SendError<Command>> {
        self.tx.send(Command::ClockSynced(offset))
    }
}

/// The core process (spec §2-4). Implements [`o2_net::StateMachine`] and is
/// driven by a reactor such as `o2-net-poll`.
pub struct Process {
    config: Config,
    local_addr: PeerId,
    clock: ClockBridge,
    global_sched: GlobalScheduler<Message>,
    peers: PeerTable,
    services: ServiceTable,
    discovery: DiscoveryManager,
    discovery_attempts: u32,
    local_time: LocalTime,
    bridge_ports: std::collections::HashMap<net::SocketAddr, String>,
    outbox: Outbox<Envelope, Event, DisconnectReason>,
    commands_tx: chan::Sender<Command>,
    commands_rx: chan::Receiver<Command>,
    pool: BufferPool,
}

impl Process {
    /// Construct a new process advertising `local_addr` (its own reachable
    /// `(ip, tcp_port)`) under `config`.
    pub fn new(config: Config, local_addr: PeerId) -> Self {
        let discovery = DiscoveryManager::new(
            config.ensemble_name.as_str().to_string(),
            local_addr,
            config.discovery_period,
            config.hub_address,
            config.debug_flags,
        );
        let (commands_tx, commands_rx) = chan::unbounded();
        Self {
            config,
            local_addr,
            clock: ClockBridge::new(),
            global_sched: GlobalScheduler::new(),
            peers: PeerTable::new(),
            services: ServiceTable::new(),
            discovery,
            discovery_attempts: 0,
            local_time: LocalTime::EPOCH,
            bridge_ports: std::collections::HashMap::new(),
            outbox: Outbox::new(),
            commands_tx,
            commands_rx,
            pool: BufferPool::new(),
        }
    }

    /// A cross-thread submission handle for this process.
    pub fn handle(&self) -> Handle {
        Handle {
            tx: self.commands_tx.clone(),
        }
    }

    /// Register a local service handler directly (single-threaded callers).
    /// `name` must satisfy the service-name invariant (spec §3: non-empty,
    /// no `/`); an invalid name is rejected rather than silently accepted.
    pub fn register_local(
        &mut self,
        name: impl Into<String>,
        handler: Handler,
        properties: impl Into<String>,
    ) -> O2Result<()> {
        let name = name.into();
        self.services.provider_new(&name, "", Provider::Local {
            handler,
            properties: properties.into(),
        })?;
        self.outbox.event(Event::ServiceStatusChanged { name, active: true });
        Ok(())
    }

    /// Install an outbound OSC bridge delegate for `service` (spec §4.8
    /// `bridge_delegate`).
    pub fn install_bridge(&mut self, service: impl Into<String>, addr: net::SocketAddr, stream: bool) -> O2Result<()> {
        let name = service.into();
        self.services.provider_new(&name, "", Provider::Bridge { addr, stream })?;
        self.outbox.event(Event::ServiceStatusChanged { name, active: true });
        Ok(())
    }

    /// Open an inbound OSC bridge listening port for `service` (spec §4.8
    /// `bridge_port_new(service, port, stream_flag)`). `stream` selects a
    /// TCP listener over the default UDP socket.
    pub fn open_bridge_port(&mut self, service: impl Into<String>, addr: net::SocketAddr, stream: bool) -> O2Result<()> {
        let service = service.into();
        o2_common::ServiceName::new(&service)?;
        self.bridge_ports.insert(addr, service.clone());
        self.outbox.listen(addr, ListenTag::OscService(service, stream));
        Ok(())
    }

    /// Install a tap (spec §3). Rejects an invalid tappee/tapper name, and
    /// rejects installing the same tapper on the same tappee twice.
    pub fn tap(&mut self, tappee: impl Into<String>, tapper: impl Into<String>) -> O2Result<()> {
        self.services.tap(&tappee.into(), tapper)
    }

    /// Mark the clock as synchronized at `offset` (spec §4.3 `on_clocksynced`).
    /// A host calls this directly, or via [`Handle::clock_synced`] from
    /// another thread, once its own clock-sync algorithm converges.
    pub fn clock_synced(&mut self, offset: f64) {
        self.clock.on_clocksynced(offset);
        self.outbox.event(Event::ClockSynchronized);
    }

    /// Submit a message, honoring the scheduler's immediate-vs-future rule
    /// (spec §4.4).
    pub fn send(&mut self, msg: Message) {
        self.submit(msg, true);
    }

    fn submit(&mut self, msg: Message, locally_originated: bool) {
        let now_global = self.clock.local_to_global(self.local_time);
        if scheduler::should_dispatch_immediately(msg.timestamp, now_global, locally_originated) {
            self.dispatch(&msg);
        } else {
            self.global_sched.insert(msg.timestamp, msg);
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands_rx.try_recv() {
            match cmd {
                Command::Send(msg) => self.submit(msg, true),
                Command::RegisterLocal { name, handler, properties } => {
                    let logged_name = name.clone();
                    if let Err(err) = self.register_local(name, handler, properties) {
                        warn!(target: "o2", "rejected RegisterLocal({}): {}", logged_name, err);
                    }
                }
                Command::Tap { tappee, tapper } => {
                    let logged = (tappee.clone(), tapper.clone());
                    if let Err(err) = self.tap(tappee, tapper) {
                        warn!(target: "o2", "rejected Tap({} -> {}): {}", logged.0, logged.1, err);
                    }
                }
                Command::ClockSynced(offset) => self.clock_synced(offset),
            }
        }
    }

    /// Dispatch a message to its resolved service's active provider, then to
    /// every tap (spec §4.5). A bundle simply dispatches each embedded
    /// message under its own address.
    fn dispatch(&mut self, msg: &Message) {
        match &msg.payload {
            Payload::Bundle(messages) => {
                for embedded in messages {
                    self.dispatch(embedded);
                }
            }
            Payload::Atomic(atomic) => self.dispatch_atomic(atomic, msg.transport),
        }
    }

    fn dispatch_atomic(&mut self, atomic: &Atomic, transport: Transport) {
        let (service, rest) = match o2_common::split_address(&atomic.address) {
            Ok(parts) => parts,
            Err(_) => {
                debug!(target: "o2", "dropping message with malformed address {}", atomic.address);
                return;
            }
        };
        if !self.services.contains(service) {
            debug!(target: "o2", "dropping message to unknown service {}", service);
            return;
        }

        self.invoke_provider(service, rest, atomic, transport);

        for tap in self.services.taps(service) {
            let tapped = Atomic::new(format!("/{}{}", tap.tapper, rest), atomic.args.clone());
            self.invoke_provider(&tap.tapper, rest, &tapped, transport);
        }
    }

    fn invoke_provider(&mut self, service: &str, rest: &str, atomic: &Atomic, transport: Transport) {
        let Some(provider) = self.services.active_mut(service) else {
            return;
        };
        match provider {
            Provider::Local { handler, .. } => {
                if let Err(code) = handler(rest, &atomic.args) {
                    self.outbox.event(Event::HandlerError {
                        address: atomic.address.clone(),
                        code,
                    });
                }
            }
            Provider::Remote { peer } => {
                let peer = *peer;
                let msg = Message {
                    timestamp: o2_common::GlobalTime::ZERO,
                    payload: Payload::Atomic(atomic.clone()),
                    transport,
                };
                self.send_to_peer(peer, &msg);
            }
            Provider::Bridge { addr, stream } => {
                let addr = *addr;
                let stream = *stream;
                let msg = Message {
                    timestamp: o2_common::GlobalTime::ZERO,
                    payload: Payload::Atomic(atomic.clone()),
                    transport: if stream { Transport::Stream } else { Transport::Datagram },
                };
                match osc::translate_outbound(service, &msg, &self.clock) {
                    Ok(bytes) => self.send_foreign(addr, stream, bytes),
                    Err(err) => warn!(target: "o2", "bridge translation failed for {}: {}", service, err),
                }
            }
        }
    }

    fn send_to_peer(&mut self, peer: PeerId, msg: &Message) {
        let scratch = self.pool.acquire(64);
        let bytes = match wire::encode_buf(msg, scratch) {
            Ok(b) => b,
            Err(err) => {
                warn!(target: "o2", "encode failed: {}", err);
                return;
            }
        };
        let oversized = bytes.len() > self.config.max_message_size;
        let envelope = if msg.transport == Transport::Stream || oversized {
            let framed = encode_frame(&bytes);
            self.pool.release(bytes);
            Envelope::stream(framed)
        } else {
            Envelope::datagram(bytes)
        };
        self.outbox.write(peer, envelope);
    }

    fn send_foreign(&mut self, addr: net::SocketAddr, stream: bool, bytes: Vec<u8>) {
        let envelope = if stream {
            Envelope::stream(encode_frame(&bytes))
        } else {
            Envelope::datagram(bytes)
        };
        self.outbox.write(addr, envelope);
    }

    fn handle_discovery(&mut self, from: PeerId, msg: &Message) {
        let Payload::Atomic(atomic) = &msg.payload else {
            return;
        };
        let (ensemble, ip, port, discovery_index, hub_flag) = match atomic.args.as_slice() {
            [Arg::String(e) | Arg::Symbol(e), Arg::String(ip), Arg::Int32(port), Arg::Int32(idx), Arg::Int32(hub)] => {
                (e.clone(), ip.clone(), *port, *idx, *hub)
            }
            _ => return,
        };
        if !self.discovery.accepts(&ensemble) {
            return;
        }
        let remote_addr: PeerId = match format!("{}:{}", ip, port).parse() {
            Ok(a) => a,
            Err(_) => {
                let _ = from;
                return;
            }
        };
        let _ = discovery_index;
        if let Some(hub) = HubFlag::from_wire(hub_flag) {
            if self.discovery.debug_enabled() {
                trace!(target: "o2", "discovered {} (hub={:?})", remote_addr, hub);
            }
        }
        if !self.peers.contains(&remote_addr) && discovery::should_initiate(&self.local_addr, &remote_addr) {
            self.outbox.connect(remote_addr);
        }
    }

    fn handle_service_vector(&mut self, from: PeerId, msg: &Message) {
        let Payload::Atomic(atomic) = &msg.payload else {
            return;
        };
        let mut names = Vec::new();
        for arg in &atomic.args {
            if let Arg::String(name) | Arg::Symbol(name) = arg {
                names.push(name.clone());
            }
        }
        names.retain(|name| match self.services.provider_new(name, wire_key(&from), Provider::Remote { peer: from }) {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "o2", "dropping service {} advertised by {}: {}", name, from, err);
                false
            }
        });
        if let Some(peer) = self.peers.get_mut(&from) {
            peer.services.extend(names.iter().cloned());
        }
        for name in names {
            self.outbox.event(Event::ServiceStatusChanged { name, active: true });
        }
    }

    fn handle_clock_sync_notification(&mut self, msg: &Message) {
        let Payload::Atomic(atomic) = &msg.payload else {
            return;
        };
        if let [Arg::Float64(offset)] = atomic.args.as_slice() {
            self.clock_synced(*offset);
        }
    }

    fn handle_round_trip(&mut self, msg: &Message) {
        let Payload::Atomic(atomic) = &msg.payload else {
            return;
        };
        if let [Arg::Float64(round_trip)] = atomic.args.as_slice() {
            let local = LocalTime::EPOCH + LocalDuration::from_secs_f64(*round_trip);
            self.clock.on_ping(local);
        }
    }

    fn broadcast_discovery(&mut self) {
        let Some(advert) = self.discovery.advertisement(HubFlag::NoHub) else {
            return;
        };
        let msg = Message::now(
            DY_ADDRESS,
            vec![
                Arg::String(advert.ensemble_name),
                Arg::String(advert.addr.ip().to_string()),
                Arg::Int32(advert.addr.port() as i32),
                Arg::Int32(advert.discovery_port_index as i32),
                Arg::Int32(HubFlag::NoHub.to_wire()),
            ],
        );
        let Ok(bytes) = wire::encode(&msg) else { return };
        let targets = self
            .discovery
            .broadcast_targets(net::IpAddr::V4(net::Ipv4Addr::BROADCAST));
        if let Some(hub) = self.discovery.hub_address() {
            self.outbox.write(hub, Envelope::datagram(bytes.clone()));
        }
        self.outbox.broadcast(targets, Envelope::datagram(bytes));
    }

    fn send_service_vector(&mut self, peer: PeerId) {
        let names: Vec<Arg> = self
            .local_service_names()
            .into_iter()
            .map(Arg::Symbol)
            .collect();
        let msg = Message::now(SV_ADDRESS, names).via_stream();
        self.send_to_peer(peer, &msg);
    }

    fn local_service_names(&self) -> Vec<String> {
        self.services.local_names()
    }

    /// Decode a datagram or (already de-framed) stream frame received on an
    /// inbound OSC bridge port (spec §4.8 `bridge_port_new`).
    fn decode_bridge_packet(&mut self, addr: net::SocketAddr, bytes: &[u8]) {
        let Some(service) = self.bridge_ports.get(&addr).cloned() else {
            return;
        };
        match osc::translate_inbound(&service, bytes, &self.clock) {
            Ok(msg) => self.submit(msg, false),
            Err(err) => warn!(target: "o2", "malformed OSC bridge packet on {}: {}", addr, err),
        }
    }
}

impl Iterator for Process {
    type Item = Io;

    fn next(&mut self) -> Option<Io> {
        self.outbox.next()
    }
}

impl o2_net::StateMachine for Process {
    type Message = Envelope;
    type Event = Event;
    type DisconnectReason = DisconnectReason;

    fn initialize(&mut self, time: LocalTime) {
        self.local_time = time;
        self.outbox.listen(
            net::SocketAddr::new(net::IpAddr::V4(net::Ipv4Addr::UNSPECIFIED), discovery::CANDIDATE_PORTS[0]),
            ListenTag::Discovery,
        );
    }

    fn message_received(&mut self, addr: &net::SocketAddr, envelope: Cow<Envelope>) {
        self.drain_commands();

        if self.bridge_ports.contains_key(addr) {
            self.decode_bridge_packet(*addr, &envelope.bytes);
            return;
        }

        let msg = match wire::decode(&envelope.bytes) {
            Ok(m) => m,
            Err(err) => {
                debug!(target: "o2", "dropping malformed message from {}: {}", addr, err);
                return;
            }
        };

        match msg.address() {
            Some(DY_ADDRESS) => self.handle_discovery(*addr, &msg),
            Some(SV_ADDRESS) => self.handle_service_vector(*addr, &msg),
            Some(CS_CS_ADDRESS) => self.handle_clock_sync_notification(&msg),
            Some(CS_RT_ADDRESS) => self.handle_round_trip(&msg),
            _ => {
                if !self.peers.contains(addr) {
                    debug!(target: "o2", "dropping message from unconnected peer {}", addr);
                    return;
                }
                self.submit(msg, false);
            }
        }
    }

    fn attempted(&mut self, addr: &net::SocketAddr) {
        trace!(target: "o2", "connection attempt to {}", addr);
    }

    fn connected(&mut self, addr: net::SocketAddr, _local_addr: &net::SocketAddr, link: Link) {
        self.peers.insert(addr, Peer::new(self.local_time));
        self.outbox.event(Event::PeerConnected(addr));
        if self.config.debug_flags.has(DebugFlags::CONNECTIONS) {
            debug!(target: "o2", "peer {} connected ({:?})", addr, link);
        }
        self.send_service_vector(addr);
    }

    fn disconnected(&mut self, addr: &net::SocketAddr, reason: o2_net::Disconnect<DisconnectReason>) {
        if self.peers.remove(addr).is_some() {
            self.services.withdraw_peer(addr);
            self.outbox.event(Event::PeerDisconnected(*addr));
            if self.config.debug_flags.has(DebugFlags::CONNECTIONS) {
                debug!(target: "o2", "peer {} disconnected: {}", addr, reason);
            }
        }
    }

    fn tick(&mut self, local_time: LocalTime) {
        self.local_time = local_time;
        self.drain_commands();

        let now_global = self.clock.local_to_global(local_time);
        let due = self.global_sched.drain_due(now_global);
        for msg in due {
            self.dispatch(&msg);
        }
    }

    fn timer_expired(&mut self) {
        self.broadcast_discovery();
        let next = self.discovery.next_period(self.discovery_attempts);
        self.discovery_attempts = self.discovery_attempts.saturating_add(1);
        self.outbox.set_timer(next);
    }

    fn listening(&mut self, addr: net::SocketAddr, tag: ListenTag) {
        match tag {
            ListenTag::Discovery => {
                let index = discovery::CANDIDATE_PORTS
                    .iter()
                    .position(|&p| p == addr.port())
                    .unwrap_or(0);
                self.discovery.bound(index);
                self.outbox.event(Event::Ready { discovery_port: addr.port() });
                self.outbox.set_timer(LocalDuration::from_secs(0));
            }
            ListenTag::OscService(service, _stream) => {
                self.bridge_ports.insert(addr, service);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use o2_common::{EnsembleName, GlobalTime};
    use std::sync::{Arc, Mutex};

    fn local_addr() -> PeerId {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn test_process() -> Process {
        let cfg = Config::new(EnsembleName::new("test").unwrap());
        let mut p = Process::new(cfg, local_addr());
        p.local_time = LocalTime::from_secs(1000);
        p
    }

    #[test]
    fn immediate_local_dispatch_invokes_handler_once() {
        let mut p = test_process();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls2 = calls.clone();
        p.register_local(
            "synth",
            Box::new(move |rest, args| {
                calls2.lock().unwrap().push((rest.to_string(), args.to_vec()));
                Ok(())
            }),
            "",
        )
        .unwrap();

        p.send(Message::now("/synth/note", vec![Arg::Int32(60), Arg::Float32(0.5)]));

        let recorded = calls.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "/note");
    }

    #[test]
    fn scheduled_message_waits_for_tick() {
        let mut p = test_process();
        p.clock.on_clocksynced(0.0);
        let calls = Arc::new(Mutex::new(0));
        let calls2 = calls.clone();
        p.register_local(
            "synth",
            Box::new(move |_rest, _args| {
                *calls2.lock().unwrap() += 1;
                Ok(())
            }),
            "",
        )
        .unwrap();

        let now = p.local_time;
        let future = p.clock.local_to_global(now) + 0.1;
        p.send(Message::scheduled(future, "/synth/note", vec![Arg::Int32(1)]));
        assert_eq!(*calls.lock().unwrap(), 0);

        let later = LocalTime::from_secs(now.as_secs_f64() as u64) + LocalDuration::from_secs_f64(0.2);
        o2_net::StateMachine::tick(&mut p, later);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn tap_receives_rewritten_address() {
        let mut p = test_process();
        let primary_calls = Arc::new(Mutex::new(0));
        let tap_calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let pc = primary_calls.clone();
        p.register_local("a", Box::new(move |_rest, _args| { *pc.lock().unwrap() += 1; Ok(()) }), "").unwrap();
        let tc = tap_calls.clone();
        p.register_local(
            "log",
            Box::new(move |rest, _args| {
                tc.lock().unwrap().push(rest.to_string());
                Ok(())
            }),
            "",
        )
        .unwrap();
        p.tap("a", "log").unwrap();

        p.send(Message::now("/a/x", vec![]));

        assert_eq!(*primary_calls.lock().unwrap(), 1);
        assert_eq!(tap_calls.lock().unwrap().as_slice(), ["/x".to_string()]);
    }

    #[test]
    fn peer_teardown_withdraws_its_services() {
        let mut p = test_process();
        let peer: PeerId = "10.0.0.5:9000".parse().unwrap();
        o2_net::StateMachine::connected(&mut p, peer, &local_addr(), Link::Inbound);
        p.services.provider_new("mix", wire_key(&peer), Provider::Remote { peer }).unwrap();
        assert!(p.services.contains("mix"));

        o2_net::StateMachine::disconnected(&mut p, &peer, o2_net::Disconnect::StateMachine(DisconnectReason::Shutdown));
        assert!(!p.services.contains("mix"));
    }

    #[test]
    fn dispatch_to_unknown_service_is_silently_dropped() {
        let mut p = test_process();
        p.send(Message::now("/nope/x", vec![Arg::Int32(1)]));
        // No panic, no provider invoked: success is simply "nothing happened".
        assert!(!p.services.contains("nope"));
    }

    #[test]
    fn zero_timestamp_global_time_is_treated_as_immediate() {
        assert_eq!(GlobalTime::ZERO.as_secs_f64(), 0.0);
    }

    #[test]
    fn clock_synced_command_is_drained_and_leaves_sync_state() {
        let mut p = test_process();
        assert!(!p.clock.is_synchronized());
        p.handle().clock_synced(42.0).unwrap();
        p.drain_commands();
        assert!(p.clock.is_synchronized());
    }

    #[test]
    fn cs_cs_message_synchronizes_the_clock() {
        let mut p = test_process();
        let from = local_addr();
        let msg = Message::now(CS_CS_ADDRESS, vec![Arg::Float64(7.5)]);
        let bytes = wire::encode(&msg).unwrap();
        o2_net::StateMachine::message_received(&mut p, &from, Cow::Owned(Envelope::datagram(bytes)));
        assert!(p.clock.is_synchronized());
    }

    #[test]
    fn register_local_rejects_an_invalid_service_name() {
        let mut p = test_process();
        assert_eq!(
            p.register_local("a/b", Box::new(|_rest, _args| Ok(())), ""),
            Err(o2_common::Error::BadServiceName)
        );
        assert!(!p.services.contains("a/b"));
    }

    #[test]
    fn tap_rejects_a_duplicate_registration() {
        let mut p = test_process();
        p.register_local("a", Box::new(|_rest, _args| Ok(())), "").unwrap();
        p.tap("a", "log").unwrap();
        assert_eq!(p.tap("a", "log"), Err(o2_common::Error::AlreadyExists));
    }

    #[test]
    fn register_local_command_with_bad_name_is_dropped_not_panicked() {
        let mut p = test_process();
        p.handle()
            .register_local("a/b", Box::new(|_rest, _args| Ok(())), "")
            .unwrap();
        p.drain_commands();
        assert!(!p.services.contains("a/b"));
    }

    #[test]
    fn cs_rt_message_reaches_the_clock_bridge_hook() {
        let mut p = test_process();
        let from = local_addr();
        let msg = Message::now(CS_RT_ADDRESS, vec![Arg::Float64(0.02)]);
        let bytes = wire::encode(&msg).unwrap();
        // on_ping is a no-op hook (the sync algorithm itself is out of scope);
        // this only confirms the message is routed instead of silently dropped.
        o2_net::StateMachine::message_received(&mut p, &from, Cow::Owned(Envelope::datagram(bytes)));
        assert!(!p.clock.is_synchronized());
    }
}
