use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use plend_types::{ApplicationKey, Timestamp};

/// Deadline-ordered min-heap of pending default triggers.
///
/// Cancellation and rescheduling are lazy: the heap may hold stale entries,
/// and an entry is live only while `live[key]` still names its generation.
#[derive(Debug, Default)]
pub struct DeadlineSchedule {
    heap: BinaryHeap<Reverse<(Timestamp, u64, ApplicationKey)>>,
    live: HashMap<ApplicationKey, (Timestamp, u64)>,
    generation: u64,
}

impl DeadlineSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `key` to fire at `at`, replacing any earlier entry.
    /// Returns `false` if it was already scheduled for exactly `at`.
    pub fn schedule(&mut self, key: ApplicationKey, at: Timestamp) -> bool {
        if matches!(self.live.get(&key), Some((current, _)) if *current == at) {
            return false;
        }
        self.generation += 1;
        self.live.insert(key.clone(), (at, self.generation));
        self.heap.push(Reverse((at, self.generation, key)));
        true
    }

    /// Returns `true` if `key` was scheduled.
    pub fn cancel(&mut self, key: &ApplicationKey) -> bool {
        self.live.remove(key).is_some()
    }

    pub fn contains(&self, key: &ApplicationKey) -> bool {
        self.live.contains_key(key)
    }

    pub fn fire_time(&self, key: &ApplicationKey) -> Option<Timestamp> {
        self.live.get(key).map(|(at, _)| *at)
    }

    /// Earliest live fire time.
    pub fn next_due(&mut self) -> Option<Timestamp> {
        self.discard_stale();
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    /// Remove and return every live entry due at or before `now`, earliest
    /// first.
    pub fn pop_due(&mut self, now: Timestamp) -> Vec<(ApplicationKey, Timestamp)> {
        let mut due = Vec::new();
        loop {
            self.discard_stale();
            match self.heap.peek() {
                Some(Reverse((at, _, _))) if *at <= now => {}
                _ => break,
            }
            if let Some(Reverse((at, _, key))) = self.heap.pop() {
                self.live.remove(&key);
                due.push((key, at));
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse((at, generation, key))) = self.heap.peek() {
            if self.live.get(key) == Some(&(*at, *generation)) {
                break;
            }
            self.heap.pop();
        }
    }
}
