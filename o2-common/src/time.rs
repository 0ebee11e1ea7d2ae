//! Local (monotonic, per-process) and global (ensemble-synchronized) time.
use std::cmp::Ordering;
use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A point in time on the local process's monotonic clock.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalTime(Duration);

impl LocalTime {
    /// The Unix epoch.
    pub const EPOCH: LocalTime = LocalTime(Duration::from_secs(0));

    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }
}

impl From<SystemTime> for LocalTime {
    fn from(st: SystemTime) -> Self {
        Self(st.duration_since(UNIX_EPOCH).unwrap_or_default())
    }
}

impl Add<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn add(self, rhs: LocalDuration) -> LocalTime {
        LocalTime(self.0 + rhs.0)
    }
}

impl Sub<LocalTime> for LocalTime {
    type Output = LocalDuration;

    fn sub(self, rhs: LocalTime) -> LocalDuration {
        LocalDuration(self.0.saturating_sub(rhs.0))
    }
}

/// A duration between two [`LocalTime`]s.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDuration(Duration);

impl LocalDuration {
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self(Duration::from_secs_f64(secs.max(0.0)))
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }
}

impl From<LocalDuration> for Duration {
    fn from(d: LocalDuration) -> Duration {
        d.0
    }
}

impl From<Duration> for LocalDuration {
    fn from(d: Duration) -> LocalDuration {
        LocalDuration(d)
    }
}

/// A timestamp in the ensemble-wide synchronized "global" time base (spec §3, §4.3).
///
/// `0.0` means "deliver immediately" (§3). Negative values are the
/// unsynchronized-clock sentinel the scheduler treats as immediate (§4.3, §4.4).
#[derive(Copy, Clone, Debug)]
pub struct GlobalTime(f64);

impl GlobalTime {
    /// Returned by the clock bridge before synchronization converges.
    pub const UNSYNCHRONIZED: GlobalTime = GlobalTime(-1.0);
    /// "Deliver immediately."
    pub const ZERO: GlobalTime = GlobalTime(0.0);

    pub fn new(secs: f64) -> Self {
        Self(secs)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0
    }

    pub fn is_synchronized(&self) -> bool {
        self.0 >= 0.0
    }

    /// Whether the scheduler should treat this timestamp as "now" (§4.4): this
    /// is true both for the immediate sentinel and any non-positive timestamp.
    pub fn is_immediate(&self) -> bool {
        self.0 <= 0.0
    }
}

impl Default for GlobalTime {
    fn default() -> Self {
        GlobalTime::ZERO
    }
}

impl PartialEq for GlobalTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GlobalTime {}

impl PartialOrd for GlobalTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GlobalTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Add<f64> for GlobalTime {
    type Output = GlobalTime;

    fn add(self, rhs: f64) -> GlobalTime {
        GlobalTime(self.0 + rhs)
    }
}

impl Sub<f64> for GlobalTime {
    type Output = GlobalTime;

    fn sub(self, rhs: f64) -> GlobalTime {
        GlobalTime(self.0 - rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_time_orders_and_detects_unsync() {
        assert!(GlobalTime::UNSYNCHRONIZED < GlobalTime::ZERO);
        assert!(!GlobalTime::UNSYNCHRONIZED.is_synchronized());
        assert!(GlobalTime::new(1.5).is_synchronized());
        assert!(GlobalTime::new(0.0).is_immediate());
        assert!(GlobalTime::new(-0.3).is_immediate());
        assert!(!GlobalTime::new(0.001).is_immediate());
    }

    #[test]
    fn local_time_add_sub_roundtrip() {
        let t0 = LocalTime::from_secs(10);
        let d = LocalDuration::from_secs(4);
        assert_eq!((t0 + d) - t0, d);
    }
}
