//! Delayed self-messages
//!
//! A machine never sleeps. It records deadlines here, the actor wakes it at
//! [`TimerQueue::next_deadline`], and cancelling a timer is just removing the
//! entry before it fires.

use std::fmt;

use tokio::time::Instant;
use tracing::trace;

/// Timers common to every profile, plus the profile's own kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TimerKind<T> {
    /// Bounds the Connecting state
    ConnectTimeout,
    /// Bounds the Disconnecting state
    DisconnectTimeout,
    Session(T),
}

#[derive(Debug, Clone)]
struct Scheduled<K> {
    deadline: Instant,
    kind: K,
}

/// Pending timers of one machine, at most one per kind
#[derive(Debug, Clone)]
pub struct TimerQueue<K> {
    entries: Vec<Scheduled<K>>,
}

impl<K: PartialEq + fmt::Debug> TimerQueue<K> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Arm `kind` at `deadline`, replacing an earlier arming of the same kind
    pub fn schedule(&mut self, kind: K, deadline: Instant) {
        self.cancel(&kind);
        trace!("Timer {:?} armed", kind);
        self.entries.push(Scheduled { deadline, kind });
    }

    /// Remove the pending timer of this kind, returning whether one existed
    pub fn cancel(&mut self, kind: &K) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.kind != *kind);
        before != self.entries.len()
    }

    pub fn is_scheduled(&self, kind: &K) -> bool {
        self.entries.iter().any(|entry| entry.kind == *kind)
    }

    pub fn deadline_of(&self, kind: &K) -> Option<Instant> {
        self.entries
            .iter()
            .find(|entry| entry.kind == *kind)
            .map(|entry| entry.deadline)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|entry| entry.deadline).min()
    }

    /// Take the earliest timer due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<K> {
        let position = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.deadline <= now)
            .min_by_key(|(_, entry)| entry.deadline)
            .map(|(position, _)| position)?;
        Some(self.entries.remove(position).kind)
    }

    /// Remove every timer matching `predicate`
    pub fn cancel_where<F>(&mut self, mut predicate: F)
    where
        F: FnMut(&K) -> bool,
    {
        self.entries.retain(|entry| !predicate(&entry.kind));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: PartialEq + fmt::Debug> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
