//! Broadcast-sweep discovery, peer handshake tie-break, and hub bootstrap
//! (spec §4.7).
use std::net;

use o2_common::{DebugFlags, LocalDuration, LocalTime};

use crate::peer::{wire_key, PeerId};

/// Number of candidate discovery ports a process tries to bind, in fixed
/// order, before giving up (spec §4.7, taken verbatim from `o2_discovery.h`'s
/// `PORT_MAX`).
pub const PORT_MAX: usize = 16;

/// Fixed, process-independent candidate discovery ports, tried in order
/// until one binds. The concrete values aren't load-bearing — every process
/// on the ensemble must agree on the *set*, not derive it — so this picks a
/// contiguous private-use range rather than replicating an arbitrary table.
pub const CANDIDATE_PORTS: [u16; PORT_MAX] = [
    64541, 60238, 57143, 55764, 56975, 62711, 61653, 57571, 58082, 59411, 60611, 58302, 60870,
    59691, 57467, 64366,
];

/// A process's hub-bootstrap state (spec §4.7 hub-flag table, taken verbatim
/// from `O2_BE_MY_HUB` / `O2_HUB_CALL_ME_BACK` / `O2_I_AM_HUB` / `O2_NO_HUB` /
/// `O2_HUB_REMOTE` in the original `o2_internal.h`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HubFlag {
    /// Ordinary broadcast; no hub role requested.
    NoHub = 0,
    /// "Be my hub" — the receiver must accept the sender as its hub.
    BeMyHub = 1,
    /// The hub must close and reconnect to the sender.
    HubCallMeBack = 2,
    /// The sender is the hub.
    IAmHub = 3,
    /// The remote end is marked as our hub.
    HubRemote = 4,
}

impl HubFlag {
    /// Decode the wire value of the hub flag carried in `/_o2/dy`.
    pub fn from_wire(v: i32) -> Option<Self> {
        match v {
            0 => Some(HubFlag::NoHub),
            1 => Some(HubFlag::BeMyHub),
            2 => Some(HubFlag::HubCallMeBack),
            3 => Some(HubFlag::IAmHub),
            4 => Some(HubFlag::HubRemote),
            _ => None,
        }
    }

    /// The wire value of this flag.
    pub fn to_wire(self) -> i32 {
        self as i32
    }
}

/// Default discovery broadcast period (spec §6).
pub const DEFAULT_DISCOVERY_PERIOD: LocalDuration = LocalDuration::from_secs(4);
/// Upper bound on exponential discovery backoff (spec §4.7: "with exponential
/// backoff capped").
pub const MAX_DISCOVERY_PERIOD: LocalDuration = LocalDuration::from_secs(60);

/// A discovered-but-not-yet-connected peer's advertised address, as carried
/// in `/_o2/dy` (spec §4.7).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advertisement {
    /// The advertising process's ensemble name.
    pub ensemble_name: String,
    /// The advertising process's reachable address.
    pub addr: PeerId,
    /// Index into [`CANDIDATE_PORTS`] the advertiser bound for discovery.
    pub discovery_port_index: u8,
    /// Hub bootstrap role requested.
    pub hub_flag: HubFlag,
}

/// Whether, given both ends' canonical wire keys, *this* process should
/// initiate the stream connection (spec §4.7: "the one with lexicographically
/// greater name initiates" — guarantees exactly one connection per peer pair).
pub fn should_initiate(local: &PeerId, remote: &PeerId) -> bool {
    wire_key(local) > wire_key(remote)
}

/// Drives the bounded port sweep and periodic broadcast.
#[derive(Debug)]
pub struct DiscoveryManager {
    ensemble_name: String,
    local_addr: PeerId,
    discovery_port_index: Option<usize>,
    period: LocalDuration,
    hub_address: Option<net::SocketAddr>,
    debug: DebugFlags,
}

impl DiscoveryManager {
    /// Construct a new discovery manager for a process advertising
    /// `local_addr` within `ensemble_name`.
    pub fn new(
        ensemble_name: String,
        local_addr: PeerId,
        period: LocalDuration,
        hub_address: Option<net::SocketAddr>,
        debug: DebugFlags,
    ) -> Self {
        Self {
            ensemble_name,
            local_addr,
            discovery_port_index: None,
            period,
            hub_address,
            debug,
        }
    }

    /// Candidate ports still to try, in fixed order, given `already_tried`
    /// failed binds (spec §4.7: "binds a small set of candidate UDP ports, in
    /// a fixed order; the first successful bind determines the discovery
    /// port index").
    pub fn remaining_candidates(&self, already_tried: usize) -> &'static [u16] {
        &CANDIDATE_PORTS[already_tried.min(PORT_MAX)..]
    }

    /// Record which candidate index successfully bound.
    pub fn bound(&mut self, index: usize) {
        self.discovery_port_index = Some(index);
    }

    /// This process's discovery port index, once bound.
    pub fn discovery_port_index(&self) -> Option<usize> {
        self.discovery_port_index
    }

    /// Build the `/_o2/dy` advertisement this process should broadcast.
    pub fn advertisement(&self, hub_flag: HubFlag) -> Option<Advertisement> {
        let index = self.discovery_port_index?;
        Some(Advertisement {
            ensemble_name: self.ensemble_name.clone(),
            addr: self.local_addr,
            discovery_port_index: index as u8,
            hub_flag,
        })
    }

    /// Whether `peer_ensemble` matches ours — peers outside the ensemble are
    /// ignored entirely (spec §3: "peers only communicate within the same ensemble").
    pub fn accepts(&self, peer_ensemble: &str) -> bool {
        peer_ensemble == self.ensemble_name
    }

    /// Broadcast destinations: every candidate discovery port on the local
    /// subnet's broadcast address (spec §4.7).
    pub fn broadcast_targets(&self, subnet_broadcast: net::IpAddr) -> Vec<net::SocketAddr> {
        CANDIDATE_PORTS
            .iter()
            .map(|&port| net::SocketAddr::new(subnet_broadcast, port))
            .collect()
    }

    /// The configured hub to fall back on when broadcast is unavailable.
    pub fn hub_address(&self) -> Option<net::SocketAddr> {
        self.hub_address
    }

    /// Next broadcast period, applying exponential backoff capped at
    /// [`MAX_DISCOVERY_PERIOD`] (spec §4.7).
    pub fn next_period(&self, attempts: u32) -> LocalDuration {
        let scaled = self.period.as_secs_f64() * 2f64.powi(attempts.min(8) as i32);
        LocalDuration::from_secs_f64(scaled.min(MAX_DISCOVERY_PERIOD.as_secs_f64()))
    }

    /// Whether discovery-category debug logging is enabled.
    pub fn debug_enabled(&self) -> bool {
        self.debug.has(DebugFlags::DISCOVERY)
    }

    /// This process's own advertised address.
    pub fn local_addr(&self) -> PeerId {
        self.local_addr
    }
}

/// Tracks when the next scheduled broadcast is due, independent of the
/// discovery manager's own state (kept separate so [`crate::process::Process`]
/// can drive it off the local maintenance scheduler).
pub fn next_broadcast_time(now: LocalTime, period: LocalDuration) -> LocalTime {
    now + period
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greater_wire_key_initiates() {
        let a: PeerId = "10.0.0.2:9000".parse().unwrap();
        let b: PeerId = "10.0.0.9:9000".parse().unwrap();
        assert!(should_initiate(&b, &a));
        assert!(!should_initiate(&a, &b));
    }

    #[test]
    fn hub_flag_round_trips_wire_value() {
        for v in 0..=4 {
            assert_eq!(HubFlag::from_wire(v).unwrap().to_wire(), v);
        }
        assert_eq!(HubFlag::from_wire(5), None);
    }

    #[test]
    fn backoff_is_capped() {
        let mgr = DiscoveryManager::new(
            "test".into(),
            "127.0.0.1:9000".parse().unwrap(),
            LocalDuration::from_secs(4),
            None,
            DebugFlags::NONE,
        );
        assert_eq!(mgr.next_period(0).as_secs_f64(), 4.0);
        assert!(mgr.next_period(20).as_secs_f64() <= MAX_DISCOVERY_PERIOD.as_secs_f64());
    }

    #[test]
    fn ensemble_mismatch_is_rejected() {
        let mgr = DiscoveryManager::new(
            "ensemble-a".into(),
            "127.0.0.1:9000".parse().unwrap(),
            LocalDuration::from_secs(4),
            None,
            DebugFlags::NONE,
        );
        assert!(mgr.accepts("ensemble-a"));
        assert!(!mgr.accepts("ensemble-b"));
    }
}
