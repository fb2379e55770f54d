use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
    time::{Duration, Instant},
};

/// Deadline-ordered timer wheel, polled by the engine's timer task.
/// Entries are keyed `(deadline, id)` so duplicates at the same instant
/// stay distinct, with a side map from id to deadline for cancellation.
pub struct TimerWheel<T> {
    entries: RwLock<BTreeMap<(Instant, u64), T>>,
    deadlines: RwLock<HashMap<u64, Instant>>,
    next_id: AtomicU64,
}

impl<T> Default for TimerWheel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerWheel<T> {
    pub fn new() -> Self {
        TimerWheel {
            entries: RwLock::new(BTreeMap::new()),
            deadlines: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn schedule(&self, after: Duration, value: T) -> u64 {
        self.schedule_at(Instant::now() + after, value)
    }

    pub fn schedule_at(&self, deadline: Instant, value: T) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut entries) = self.entries.write() {
            entries.insert((deadline, id), value);
        }
        if let Ok(mut deadlines) = self.deadlines.write() {
            deadlines.insert(id, deadline);
        }
        id
    }

    pub fn cancel(&self, id: u64) -> Option<T> {
        let deadline = self.deadlines.write().ok()?.remove(&id)?;
        self.entries.write().ok()?.remove(&(deadline, id))
    }

    /// Pops every entry due at `now` or earlier, in deadline order.
    pub fn due(&self, now: Instant) -> Vec<T> {
        let mut fired = Vec::new();
        let keys: Vec<(Instant, u64)> = match self.entries.read() {
            Ok(entries) => entries
                .range(..=(now, u64::MAX))
                .map(|(k, _)| *k)
                .collect(),
            Err(_) => return fired,
        };
        if keys.is_empty() {
            return fired;
        }
        if let Ok(mut entries) = self.entries.write() {
            for key in &keys {
                if let Some(value) = entries.remove(key) {
                    fired.push(value);
                }
            }
        }
        if let Ok(mut deadlines) = self.deadlines.write() {
            for (_, id) in keys {
                deadlines.remove(&id);
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_cancel_due() {
        let wheel = TimerWheel::new();
        let now = Instant::now();
        let id = wheel.schedule_at(now, "a");
        assert_eq!(wheel.cancel(id), Some("a"));
        assert_eq!(wheel.cancel(id), None);

        wheel.schedule_at(now, "b");
        wheel.schedule_at(now + Duration::from_secs(5), "c");
        let fired = wheel.due(now + Duration::from_secs(1));
        assert_eq!(fired, vec!["b"]);
        assert_eq!(wheel.len(), 1);
    }

    #[test]
    fn test_same_deadline_entries_all_fire() {
        let wheel = TimerWheel::new();
        let now = Instant::now();
        wheel.schedule_at(now, 1);
        wheel.schedule_at(now, 2);
        let fired = wheel.due(now);
        assert_eq!(fired.len(), 2);
        assert!(wheel.is_empty());
    }
}
