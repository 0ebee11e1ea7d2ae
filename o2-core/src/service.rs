//! Service table & dispatcher (spec §4.5): hierarchical name resolution,
//! deterministic provider election, and tap fan-out.
use std::collections::HashMap;
use std::net;

use o2_common::{split_address, Error, Result, ServiceName};

use crate::message::Arg;
use crate::peer::PeerId;

/// Result a local handler returns: `Ok(())` on success, `Err(code)` on
/// failure (spec §4.5: "handler signals errors by return code; errors do not
/// abort dispatch of taps").
pub type HandlerResult = std::result::Result<(), i32>;

/// A local service's dispatch function: called with the address remainder
/// (after the service name) and the decoded arguments.
pub type Handler = Box<dyn FnMut(&str, &[Arg]) -> HandlerResult + Send>;

/// The concrete implementer of a service in one process (spec §3).
pub enum Provider {
    /// A local handler plus an opaque property string advertised to peers.
    Local { handler: Handler, properties: String },
    /// A reference to a connected peer that offers this service.
    Remote {
        /// The peer that provides this service.
        peer: PeerId,
    },
    /// An external-protocol bridge endpoint (spec §4.8).
    Bridge {
        /// Destination address.
        addr: net::SocketAddr,
        /// Whether the bridge was installed for stream delivery.
        stream: bool,
    },
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Local { properties, .. } => {
                f.debug_struct("Local").field("properties", properties).finish()
            }
            Provider::Remote { peer } => f.debug_struct("Remote").field("peer", peer).finish(),
            Provider::Bridge { addr, stream } => {
                f.debug_struct("Bridge").field("addr", addr).field("stream", stream).finish()
            }
        }
    }
}

/// A candidate provider for a service, keyed for deterministic election.
struct Candidate {
    /// Election key: the contributing peer's canonical wire key (spec §4.7's
    /// padded-string peer key), or `""` for a local candidate. Resolved per
    /// the Open Question in DESIGN.md: lexicographically *greatest* key wins,
    /// consistent with the discovery handshake's own tie-break direction.
    key: String,
    provider: Provider,
}

/// A subscription mirroring every message delivered to one service onto
/// another (spec §3 "Tap").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tap {
    /// The service messages are copied to.
    pub tapper: String,
}

/// A service's candidate providers and taps.
struct ServiceEntry {
    candidates: Vec<Candidate>,
    /// Explicit local override of the elected candidate's index, set via
    /// [`ServiceTable::force_active`] (spec §3: "local provider permitted to
    /// override via explicit API").
    forced: Option<usize>,
    taps: Vec<Tap>,
}

impl ServiceEntry {
    fn new() -> Self {
        Self {
            candidates: Vec::new(),
            forced: None,
            taps: Vec::new(),
        }
    }

    /// Index of the currently active candidate.
    fn active_index(&self) -> Option<usize> {
        if let Some(i) = self.forced {
            if i < self.candidates.len() {
                return Some(i);
            }
        }
        self.candidates
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.key.cmp(&b.key))
            .map(|(i, _)| i)
    }

    fn active(&self) -> Option<&Provider> {
        self.active_index().map(|i| &self.candidates[i].provider)
    }

    fn active_mut(&mut self) -> Option<&mut Provider> {
        let idx = self.active_index()?;
        Some(&mut self.candidates[idx].provider)
    }

    fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.taps.is_empty()
    }
}

/// Per-process mapping of service name to provider, plus the tap registry
/// (spec §3 "Service table").
#[derive(Default)]
pub struct ServiceTable {
    services: HashMap<String, ServiceEntry>,
}

impl ServiceTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new candidate provider for `name`, re-electing the active
    /// provider deterministically (spec §4.5). `key` is `""` for a local
    /// provider, or the contributing peer's [`crate::peer::wire_key`].
    ///
    /// `name` must satisfy [`ServiceName`]'s invariant (non-empty, no `/`);
    /// an invalid name is rejected rather than silently accepted.
    pub fn provider_new(&mut self, name: &str, key: impl Into<String>, provider: Provider) -> Result<()> {
        ServiceName::new(name)?;
        let entry = self.services.entry(name.to_string()).or_insert_with(ServiceEntry::new);
        entry.candidates.push(Candidate {
            key: key.into(),
            provider,
        });
        Ok(())
    }

    /// Explicitly override which candidate is active for `name` (spec §3:
    /// local override API). `index` is into insertion order of candidates
    /// added so far; an out-of-range index falls back to the deterministic
    /// election.
    pub fn force_active(&mut self, name: &str, index: usize) {
        if let Some(entry) = self.services.get_mut(name) {
            entry.forced = Some(index);
        }
    }

    /// Remove every candidate contributed by `peer` from every service,
    /// dropping services left with neither candidates nor taps (spec §3
    /// Lifecycles, §8 "Peer churn").
    pub fn withdraw_peer(&mut self, peer: &PeerId) {
        let key = crate::peer::wire_key(peer);
        self.services.retain(|_, entry| {
            entry.candidates.retain(|c| {
                !matches!(&c.provider, Provider::Remote { peer: p } if crate::peer::wire_key(p) == key)
            });
            !entry.is_empty()
        });
    }

    /// Remove a specific local provider, eg. on explicit withdrawal.
    pub fn remove_local(&mut self, name: &str) {
        if let Some(entry) = self.services.get_mut(name) {
            entry.candidates.retain(|c| !matches!(c.provider, Provider::Local { .. }));
            if entry.is_empty() {
                self.services.remove(name);
            }
        }
    }

    /// Install a tap: messages delivered to `tappee` are also copied to
    /// `tapper`. Both names must satisfy [`ServiceName`]'s invariant, and
    /// installing the same tapper on the same tappee twice is rejected with
    /// [`Error::AlreadyExists`] rather than silently duplicated.
    pub fn tap(&mut self, tappee: &str, tapper: impl Into<String>) -> Result<()> {
        ServiceName::new(tappee)?;
        let tapper = tapper.into();
        ServiceName::new(&tapper)?;
        let entry = self
            .services
            .entry(tappee.to_string())
            .or_insert_with(ServiceEntry::new);
        if entry.taps.iter().any(|t| t.tapper == tapper) {
            return Err(Error::AlreadyExists);
        }
        entry.taps.push(Tap { tapper });
        Ok(())
    }

    /// Remove a tap.
    pub fn untap(&mut self, tappee: &str, tapper: &str) {
        if let Some(entry) = self.services.get_mut(tappee) {
            entry.taps.retain(|t| t.tapper != tapper);
        }
    }

    /// The active provider for `name`, if the service exists.
    pub fn active(&self, name: &str) -> Option<&Provider> {
        self.services.get(name).and_then(ServiceEntry::active)
    }

    /// The active provider for `name`, mutably.
    pub fn active_mut(&mut self, name: &str) -> Option<&mut Provider> {
        self.services.get_mut(name).and_then(ServiceEntry::active_mut)
    }

    /// The taps registered on `name`, lazily dropping any whose tapper
    /// service no longer exists (spec §4.5: "taps that reference a withdrawn
    /// tapper are removed lazily on first failed lookup").
    pub fn taps(&mut self, name: &str) -> Vec<Tap> {
        let live_tappers: Vec<String> = match self.services.get(name) {
            Some(entry) => entry
                .taps
                .iter()
                .map(|t| t.tapper.clone())
                .filter(|tapper| self.services.contains_key(tapper))
                .collect(),
            None => return Vec::new(),
        };
        if let Some(entry) = self.services.get_mut(name) {
            entry.taps.retain(|t| live_tappers.contains(&t.tapper));
        }
        live_tappers.into_iter().map(|tapper| Tap { tapper }).collect()
    }

    /// Whether `name` has any registered service entry at all.
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Names of services this process provides a [`Provider::Local`]
    /// candidate for, in no particular order (spec §4.7: the `/_o2/sv`
    /// vector exchanged with a newly connected peer).
    pub fn local_names(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|(_, entry)| entry.candidates.iter().any(|c| matches!(c.provider, Provider::Local { .. })))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Split `address` into its service name and remainder, looking the service
/// up; returns [`Error::NotFound`] if no entry exists (spec §4.5 step 1).
pub fn resolve<'a>(table: &ServiceTable, address: &'a str) -> Result<(&'a str, &'a str)> {
    let (service, rest) = split_address(address)?;
    if table.contains(service) {
        Ok((service, rest))
    } else {
        Err(Error::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(tag: &str) -> Provider {
        let tag = tag.to_string();
        Provider::Local {
            handler: Box::new(move |_rest, _args| {
                let _ = &tag;
                Ok(())
            }),
            properties: String::new(),
        }
    }

    #[test]
    fn election_is_deterministic_regardless_of_insertion_order() {
        let mut a = ServiceTable::new();
        a.provider_new("mix", "10.0.0.9:9000", Provider::Remote { peer: "10.0.0.9:9000".parse().unwrap() }).unwrap();
        a.provider_new("mix", "10.0.0.2:9000", Provider::Remote { peer: "10.0.0.2:9000".parse().unwrap() }).unwrap();

        let mut b = ServiceTable::new();
        b.provider_new("mix", "10.0.0.2:9000", Provider::Remote { peer: "10.0.0.2:9000".parse().unwrap() }).unwrap();
        b.provider_new("mix", "10.0.0.9:9000", Provider::Remote { peer: "10.0.0.9:9000".parse().unwrap() }).unwrap();

        let key_of = |p: &Provider| match p {
            Provider::Remote { peer } => peer.to_string(),
            _ => unreachable!(),
        };
        assert_eq!(key_of(a.active("mix").unwrap()), key_of(b.active("mix").unwrap()));
        assert_eq!(key_of(a.active("mix").unwrap()), "10.0.0.9:9000");
    }

    #[test]
    fn withdrawing_a_peer_removes_its_services() {
        let mut table = ServiceTable::new();
        let peer: PeerId = "127.0.0.1:9000".parse().unwrap();
        table.provider_new("mix", crate::peer::wire_key(&peer), Provider::Remote { peer }).unwrap();
        assert!(table.contains("mix"));
        table.withdraw_peer(&peer);
        assert!(!table.contains("mix"));
    }

    #[test]
    fn tap_fanout_resolves_live_tappers_only() {
        let mut table = ServiceTable::new();
        table.provider_new("a", "", local("a")).unwrap();
        table.provider_new("log", "", local("log")).unwrap();
        table.tap("a", "log").unwrap();
        table.tap("a", "ghost").unwrap();

        let taps = table.taps("a");
        assert_eq!(taps, vec![Tap { tapper: "log".into() }]);
    }

    #[test]
    fn tapping_the_same_tapper_twice_is_rejected() {
        let mut table = ServiceTable::new();
        table.provider_new("a", "", local("a")).unwrap();
        table.tap("a", "log").unwrap();
        assert_eq!(table.tap("a", "log"), Err(Error::AlreadyExists));
    }

    #[test]
    fn provider_new_rejects_an_invalid_service_name() {
        let mut table = ServiceTable::new();
        assert_eq!(
            table.provider_new("a/b", "", local("a")),
            Err(Error::BadServiceName)
        );
        assert_eq!(table.provider_new("", "", local("a")), Err(Error::BadServiceName));
    }

    #[test]
    fn local_names_excludes_remote_only_services() {
        let mut table = ServiceTable::new();
        table.provider_new("synth", "", local("synth")).unwrap();
        let peer: PeerId = "127.0.0.1:9000".parse().unwrap();
        table.provider_new("mix", crate::peer::wire_key(&peer), Provider::Remote { peer }).unwrap();

        assert_eq!(table.local_names(), vec!["synth".to_string()]);
    }

    #[test]
    fn resolve_splits_and_checks_existence() {
        let mut table = ServiceTable::new();
        table.provider_new("synth", "", local("synth")).unwrap();
        assert_eq!(resolve(&table, "/synth/note"), Ok(("synth", "/note")));
        assert_eq!(resolve(&table, "/nope/x"), Err(Error::NotFound));
    }
}
