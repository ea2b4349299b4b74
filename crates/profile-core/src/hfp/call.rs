//! Call records and the per-peer call roster

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Key of a call in the roster
///
/// `LocalOrigin` sorts before every peer-assigned index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CallIndex {
    /// Dialed locally, index not yet assigned by the peer
    LocalOrigin,
    /// Index reported by the peer in its current call list
    Peer(u32),
}

impl fmt::Display for CallIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallIndex::LocalOrigin => write!(f, "local"),
            CallIndex::Peer(index) => write!(f, "{}", index),
        }
    }
}

/// Call state as reported by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    Active,
    Held,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
    /// Incoming call put on hold through response-and-hold
    ResponseHeld,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// One call known to the handsfree unit
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub index: CallIndex,
    /// Stable identity that survives index reassignment
    pub handle: Uuid,
    pub state: CallState,
    pub number: String,
    pub multiparty: bool,
    pub direction: CallDirection,
    pub created_at: Instant,
}

impl Call {
    /// Placeholder for a call dialed locally
    pub fn outgoing(number: impl Into<String>, now: Instant) -> Self {
        Self {
            index: CallIndex::LocalOrigin,
            handle: Uuid::new_v4(),
            state: CallState::Dialing,
            number: number.into(),
            multiparty: false,
            direction: CallDirection::Outgoing,
            created_at: now,
        }
    }

    /// Call taken from a peer call list entry
    pub fn reported(
        index: u32,
        direction: CallDirection,
        state: CallState,
        multiparty: bool,
        number: impl Into<String>,
        now: Instant,
    ) -> Self {
        Self {
            index: CallIndex::Peer(index),
            handle: Uuid::new_v4(),
            state,
            number: number.into(),
            multiparty,
            direction,
            created_at: now,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Copy the mutable fields of a fresher report, returning whether
    /// anything changed
    pub fn absorb(&mut self, report: &Call) -> bool {
        let mut changed = false;
        if self.number != report.number {
            self.number = report.number.clone();
            changed = true;
        }
        if self.state != report.state {
            self.state = report.state;
            changed = true;
        }
        if self.multiparty != report.multiparty {
            self.multiparty = report.multiparty;
            changed = true;
        }
        changed
    }
}

/// Calls of one peer keyed by index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallRoster {
    calls: BTreeMap<CallIndex, Call>,
}

impl CallRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, call: Call) -> Option<Call> {
        self.calls.insert(call.index, call)
    }

    pub fn remove(&mut self, index: CallIndex) -> Option<Call> {
        self.calls.remove(&index)
    }

    pub fn get(&self, index: CallIndex) -> Option<&Call> {
        self.calls.get(&index)
    }

    pub fn get_mut(&mut self, index: CallIndex) -> Option<&mut Call> {
        self.calls.get_mut(&index)
    }

    pub fn contains(&self, index: CallIndex) -> bool {
        self.calls.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Calls in index order
    pub fn iter(&self) -> impl Iterator<Item = &Call> {
        self.calls.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Call> {
        self.calls.values_mut()
    }

    /// Peer-assigned indices, excluding a local placeholder
    pub fn peer_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.calls.keys().filter_map(|index| match index {
            CallIndex::Peer(index) => Some(*index),
            CallIndex::LocalOrigin => None,
        })
    }

    /// First call, in index order, whose state is one of `states`
    pub fn find_in(&self, states: &[CallState]) -> Option<&Call> {
        self.calls.values().find(|call| states.contains(&call.state))
    }

    pub fn has_state(&self, state: CallState) -> bool {
        self.calls.values().any(|call| call.state == state)
    }

    pub fn count_in(&self, state: CallState) -> usize {
        self.calls.values().filter(|call| call.state == state).count()
    }

    pub fn take_all(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls).into_values().collect()
    }
}

impl FromIterator<Call> for CallRoster {
    fn from_iter<I: IntoIterator<Item = Call>>(iter: I) -> Self {
        Self {
            calls: iter.into_iter().map(|call| (call.index, call)).collect(),
        }
    }
}
