//! Local-to-global time mapping (spec §4.3). The clock-synchronization
//! algorithm proper (the `/_o2/cs/rt` round trip) is out of scope (spec §1);
//! this models only the interface it consumes and produces.
use o2_common::{GlobalTime, LocalTime};

use crate::wire::{time_from_fixed64, time_to_fixed64};

/// Maps this process's local monotonic clock onto the ensemble-wide
/// synchronized global time base, and bridges to the foreign protocol's
/// 64-bit fixed-point timestamp.
#[derive(Debug)]
pub struct ClockBridge {
    synchronized: bool,
    /// `global = local.as_secs_f64() + offset` once synchronized.
    offset: f64,
    /// Offset applied (on top of the local/global mapping) when converting to
    /// or from a foreign OSC timestamp (spec §4.3: `osc_time_offset`).
    osc_time_offset: f64,
}

impl Default for ClockBridge {
    fn default() -> Self {
        Self {
            synchronized: false,
            offset: 0.0,
            osc_time_offset: 0.0,
        }
    }
}

impl ClockBridge {
    /// A fresh, unsynchronized bridge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a local timestamp onto global time. Monotone and continuous once
    /// synchronized; returns [`GlobalTime::UNSYNCHRONIZED`] before convergence
    /// (spec §4.3; the scheduler treats this sentinel as immediate).
    pub fn local_to_global(&self, t_local: LocalTime) -> GlobalTime {
        if !self.synchronized {
            return GlobalTime::UNSYNCHRONIZED;
        }
        GlobalTime::new(t_local.as_secs_f64() + self.offset)
    }

    /// Called once clock synchronization converges, with the offset the
    /// sync algorithm (out of scope) computed between local and global time.
    pub fn on_clocksynced(&mut self, offset: f64) {
        self.synchronized = true;
        self.offset = offset;
    }

    /// Whether [`Self::local_to_global`] currently returns real mappings.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Participate in the round-trip ping exchange that drives synchronization.
    /// The algorithm itself is out of scope (spec §1); a host wires a real
    /// implementation in by calling [`Self::on_clocksynced`] once it converges.
    pub fn on_ping(&mut self, _round_trip: LocalTime) {}

    /// Set the OSC bridge's timestamp offset, returning the previous value
    /// (spec §4.3: `osc_time_offset(new) → old`).
    pub fn osc_time_offset(&mut self, new: f64) -> f64 {
        let old = self.osc_time_offset;
        self.osc_time_offset = new;
        old
    }

    /// Convert global time to the foreign protocol's 64-bit fixed-point
    /// timestamp, applying the configured OSC offset.
    pub fn time_to_osc(&self, t: GlobalTime) -> [u8; 8] {
        time_to_fixed64(GlobalTime::new(t.as_secs_f64() + self.osc_time_offset))
    }

    /// Convert a foreign 64-bit fixed-point timestamp back to global time,
    /// removing the configured OSC offset.
    pub fn time_from_osc(&self, fixed: [u8; 8]) -> GlobalTime {
        let raw = time_from_fixed64(fixed);
        GlobalTime::new(raw.as_secs_f64() - self.osc_time_offset)
    }

    /// Remove the configured OSC offset from an already-decoded timestamp
    /// (used when a bundle's outer timestamp was decoded generically and
    /// still needs the bridge-specific offset applied).
    pub fn strip_osc_offset(&self, t: GlobalTime) -> GlobalTime {
        GlobalTime::new(t.as_secs_f64() - self.osc_time_offset)
    }

    /// Apply the configured OSC offset to an internal timestamp before it is
    /// encoded onto the foreign wire.
    pub fn apply_osc_offset(&self, t: GlobalTime) -> GlobalTime {
        GlobalTime::new(t.as_secs_f64() + self.osc_time_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsynchronized_bridge_returns_sentinel() {
        let bridge = ClockBridge::new();
        assert!(!bridge.local_to_global(LocalTime::from_secs(5)).is_synchronized());
    }

    #[test]
    fn synced_bridge_applies_offset_monotonically() {
        let mut bridge = ClockBridge::new();
        bridge.on_clocksynced(100.0);
        let a = bridge.local_to_global(LocalTime::from_secs(1));
        let b = bridge.local_to_global(LocalTime::from_secs(2));
        assert!(a < b);
        assert_eq!(a.as_secs_f64(), 101.0);
    }

    #[test]
    fn osc_time_offset_returns_previous_value() {
        let mut bridge = ClockBridge::new();
        assert_eq!(bridge.osc_time_offset(2.5), 0.0);
        assert_eq!(bridge.osc_time_offset(4.0), 2.5);
    }

    #[test]
    fn osc_round_trip_respects_offset() {
        let mut bridge = ClockBridge::new();
        bridge.osc_time_offset(10.0);
        let t = GlobalTime::new(1_700_000_000.0);
        let fixed = bridge.time_to_osc(t);
        let back = bridge.time_from_osc(fixed);
        assert!((back.as_secs_f64() - t.as_secs_f64()).abs() < 1e-6);
    }
}
