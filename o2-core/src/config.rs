//! Process configuration (spec §6), mirroring the teacher's `fsm::Config` /
//! `nakamoto_node`'s CLI-built config: a plain struct with a `Default` impl,
//! updated field-by-field.
use std::net;

use o2_common::{DebugFlags, EnsembleName, LocalDuration};

use crate::transport::DEFAULT_MAX_MESSAGE_SIZE;

/// Process-wide configuration (spec §6 "Configuration").
#[derive(Clone, Debug)]
pub struct Config {
    /// Application scope; peers only communicate within the same ensemble.
    pub ensemble_name: EnsembleName,
    /// How often to broadcast `/_o2/dy` absent backoff (spec §4.7).
    pub discovery_period: LocalDuration,
    /// Enabled diagnostic-logging categories.
    pub debug_flags: DebugFlags,
    /// Largest datagram payload before a send is forced onto the stream.
    pub max_message_size: usize,
    /// Peer to contact when broadcast is unavailable (spec §4.7 "Hubs").
    pub hub_address: Option<net::SocketAddr>,
}

impl Config {
    /// Construct a configuration for `ensemble_name`, with every other
    /// option at its spec §6 default.
    pub fn new(ensemble_name: EnsembleName) -> Self {
        Self {
            ensemble_name,
            ..Self::defaults()
        }
    }

    fn defaults() -> Self {
        Self {
            ensemble_name: EnsembleName::new("o2").expect("\"o2\" is a valid ensemble name"),
            discovery_period: LocalDuration::from_secs_f64(4.0),
            debug_flags: DebugFlags::NONE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            hub_address: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.discovery_period.as_secs_f64(), 4.0);
        assert_eq!(cfg.max_message_size, 32768);
        assert!(cfg.hub_address.is_none());
    }
}
