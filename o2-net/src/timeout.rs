//! A sorted queue of one-shot wake-up timers, keyed by an arbitrary identifier
//! (a peer address, a scheduler name, ...). Used by a [`crate::StateMachine`]
//! to ask the reactor to call [`crate::StateMachine::timer_expired`] later.
use o2_common::{LocalDuration, LocalTime};

pub struct TimeoutManager<K> {
    timeouts: Vec<(LocalTime, K)>,
}

impl<K> Default for TimeoutManager<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TimeoutManager<K> {
    pub fn new() -> Self {
        Self {
            timeouts: Vec::new(),
        }
    }

    /// Arm a timeout for `key` at `time`. Re-registering the same key adds a
    /// second entry rather than replacing the first; callers that want
    /// at-most-once semantics should dedup on `key` before calling.
    pub fn register(&mut self, key: K, time: LocalTime) {
        let idx = self.timeouts.partition_point(|(t, _)| *t <= time);
        self.timeouts.insert(idx, (time, key));
    }

    /// Time remaining until the next timeout fires, or `None` if the queue is empty.
    pub fn next(&self, now: LocalTime) -> Option<LocalDuration> {
        self.timeouts.first().map(|(t, _)| {
            if *t > now {
                *t - now
            } else {
                LocalDuration::from_secs(0)
            }
        })
    }

    /// Move every timeout that has fired by `now` into `fired`, oldest first.
    pub fn wake(&mut self, now: LocalTime, fired: &mut Vec<K>) {
        while let Some((t, _)) = self.timeouts.first() {
            if *t > now {
                break;
            }
            let (_, key) = self.timeouts.remove(0);
            fired.push(key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.timeouts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.timeouts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wakes_in_time_order_regardless_of_registration_order() {
        let mut mgr = TimeoutManager::new();
        mgr.register("c", LocalTime::from_secs(30));
        mgr.register("a", LocalTime::from_secs(10));
        mgr.register("b", LocalTime::from_secs(20));

        let mut fired = Vec::new();
        mgr.wake(LocalTime::from_secs(25), &mut fired);
        assert_eq!(fired, vec!["a", "b"]);
        assert_eq!(mgr.len(), 1);
    }
}
