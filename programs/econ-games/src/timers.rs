//! Virtual timer queue
//!
//! Timers are registered against wall-clock deadlines and fired by whoever
//! drives the clock (`Lab::advance_to`). Cancelling is idempotent and a
//! cancelled timer never fires.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
pub struct Timers<K> {
    next_id: u64,
    queue: BTreeMap<(DateTime<Utc>, TimerId), K>,
    deadlines: HashMap<TimerId, DateTime<Utc>>,
}

impl<K> Default for Timers<K> {
    fn default() -> Self {
        Self {
            next_id: 0,
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }
}

impl<K> Timers<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: DateTime<Utc>, key: K) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.queue.insert((at, id), key);
        self.deadlines.insert(id, at);
        id
    }

    pub fn schedule_in(&mut self, now: DateTime<Utc>, after: Duration, key: K) -> TimerId {
        self.schedule(now + after, key)
    }

    /// Returns true only for the call that actually removed the timer
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(at) => self.queue.remove(&(at, id)).is_some(),
            None => false,
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub fn deadline(&self, id: TimerId) -> Option<DateTime<Utc>> {
        self.deadlines.get(&id).copied()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return the earliest timer due at `now`
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<(TimerId, K)> {
        let (at, id) = *self.queue.keys().next()?;
        if at > now {
            return None;
        }
        self.deadlines.remove(&id);
        self.queue.remove(&(at, id)).map(|key| (id, key))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
