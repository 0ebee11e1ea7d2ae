//! Timestamp-ordered dispatch queues (spec §4.4). Two logical instances are
//! used by [`crate::process::Process`]: one keyed to global time for
//! network-scheduled delivery ([`GlobalScheduler`]), one keyed to local time
//! for internal maintenance like periodic discovery ([`LocalScheduler`]).
use o2_common::{GlobalTime, LocalTime};

/// A timestamp-ordered queue, generic over whatever time base it's keyed to.
/// Entries pop out non-decreasing by timestamp; equal timestamps break ties
/// by insertion order (spec §4.4, §8 "Scheduler monotonicity").
#[derive(Debug)]
pub struct Scheduler<Time, T> {
    // Kept sorted by (time, seq) on insert so `tick` never re-sorts.
    queue: Vec<(Time, u64, T)>,
    next_seq: u64,
}

impl<Time: PartialOrd + Copy, T> Default for Scheduler<Time, T> {
    fn default() -> Self {
        Self {
            queue: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<Time: PartialOrd + Copy, T> Scheduler<Time, T> {
    /// An empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `item` to be released at `time`, preserving insertion order
    /// among equal timestamps.
    pub fn insert(&mut self, time: Time, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let idx = self
            .queue
            .partition_point(|(t, s, _)| *t < time || (*t == time && *s < seq));
        self.queue.insert(idx, (time, seq, item));
    }

    /// Remove and return every item whose timestamp is `<= now`, in
    /// non-decreasing timestamp order with insertion-order tiebreak.
    pub fn drain_due(&mut self, now: Time) -> Vec<T> {
        let split = self.queue.partition_point(|(t, _, _)| *t <= now);
        self.queue.drain(..split).map(|(_, _, item)| item).collect()
    }

    /// The timestamp of the earliest pending item, if any.
    pub fn next_time(&self) -> Option<Time> {
        self.queue.first().map(|(t, _, _)| *t)
    }

    /// Remove every pending item for which `predicate` returns `true` (spec
    /// §4.5: "deleting a service removes pending messages targeted at it").
    pub fn remove_if(&mut self, mut predicate: impl FnMut(&T) -> bool) {
        self.queue.retain(|(_, _, item)| !predicate(item));
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no items are pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Scheduler keyed to the ensemble's global time base, for network-scheduled
/// message delivery.
pub type GlobalScheduler<T> = Scheduler<GlobalTime, T>;

/// Scheduler keyed to this process's local monotonic clock, for periodic
/// internal maintenance (discovery sweeps, retry backoff).
pub type LocalScheduler<T> = Scheduler<LocalTime, T>;

/// Spec §4.4: "if `msg.timestamp <= now_global`, or the clock is
/// unsynchronized and the message originated locally, dispatch immediately;
/// otherwise insert by timestamp."
pub fn should_dispatch_immediately(timestamp: GlobalTime, now_global: GlobalTime, locally_originated: bool) -> bool {
    timestamp.is_immediate()
        || timestamp <= now_global
        || (!now_global.is_synchronized() && locally_originated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_timestamp_order_with_insertion_tiebreak() {
        let mut sched: GlobalScheduler<&'static str> = GlobalScheduler::new();
        sched.insert(GlobalTime::new(3.0), "c");
        sched.insert(GlobalTime::new(1.0), "a");
        sched.insert(GlobalTime::new(1.0), "a2");
        sched.insert(GlobalTime::new(2.0), "b");

        let due = sched.drain_due(GlobalTime::new(2.5));
        assert_eq!(due, vec!["a", "a2", "b"]);
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn drain_due_at_infinity_empties_queue_in_order() {
        let mut sched: GlobalScheduler<i32> = GlobalScheduler::new();
        for t in [5.0, 1.0, 3.0, 1.0, 2.0] {
            sched.insert(GlobalTime::new(t), t as i32);
        }
        let due = sched.drain_due(GlobalTime::new(f64::MAX));
        assert_eq!(due, vec![1, 1, 2, 3, 5]);
    }

    #[test]
    fn remove_if_drops_matching_pending_items() {
        let mut sched: GlobalScheduler<&'static str> = GlobalScheduler::new();
        sched.insert(GlobalTime::new(10.0), "/mix/a");
        sched.insert(GlobalTime::new(11.0), "/synth/b");
        sched.remove_if(|addr| addr.starts_with("/mix"));
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn immediate_dispatch_rule() {
        let synced_now = GlobalTime::new(10.0);
        assert!(should_dispatch_immediately(GlobalTime::ZERO, synced_now, false));
        assert!(should_dispatch_immediately(GlobalTime::new(9.0), synced_now, false));
        assert!(!should_dispatch_immediately(GlobalTime::new(11.0), synced_now, false));
        assert!(should_dispatch_immediately(
            GlobalTime::new(11.0),
            GlobalTime::UNSYNCHRONIZED,
            true
        ));
        assert!(!should_dispatch_immediately(
            GlobalTime::new(11.0),
            GlobalTime::UNSYNCHRONIZED,
            false
        ));
    }
}
