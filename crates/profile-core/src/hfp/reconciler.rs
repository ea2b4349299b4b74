//! Call list reconciliation
//!
//! The peer never pushes full call state. The handsfree unit polls the
//! current call list, collects the entries of one burst, and then diffs that
//! snapshot against its roster. After a pass the roster equals the snapshot,
//! with a locally dialed placeholder folded in once the peer lists the call.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::call::{Call, CallDirection, CallIndex, CallRoster, CallState};
use crate::errors::{ProfileError, ProfileResult};

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Snapshots to publish as call-changed, in emission order
    pub changed: Vec<Call>,
    /// Set when a locally dialed call expired unconfirmed; the caller must
    /// issue a terminate
    pub stuck_dial: Option<Duration>,
    /// Roster still holds calls and polling should continue
    pub poll_again: bool,
}

/// Roster owner for one handsfree session
#[derive(Debug)]
pub struct CallReconciler {
    roster: CallRoster,
    reported: BTreeMap<u32, Call>,
    outgoing_timeout: Duration,
}

impl CallReconciler {
    pub fn new(outgoing_timeout: Duration) -> Self {
        Self {
            roster: CallRoster::new(),
            reported: BTreeMap::new(),
            outgoing_timeout,
        }
    }

    pub fn roster(&self) -> &CallRoster {
        &self.roster
    }

    /// Drop entries left over from an interrupted burst
    pub fn begin_pass(&mut self) {
        if !self.reported.is_empty() {
            debug!("Discarding {} stale call list entries", self.reported.len());
            self.reported.clear();
        }
    }

    /// Collect one entry of the call list burst
    pub fn record_entry(
        &mut self,
        index: u32,
        direction: CallDirection,
        state: CallState,
        multiparty: bool,
        number: impl Into<String>,
        now: Instant,
    ) {
        let call = Call::reported(index, direction, state, multiparty, number, now);
        debug!("Call list entry {} {:?} {:?}", index, state, direction);
        self.reported.insert(index, call);
    }

    /// Add the placeholder for a call dialed locally
    pub fn begin_dial(&mut self, number: impl Into<String>, now: Instant) -> ProfileResult<Call> {
        if self.roster.contains(CallIndex::LocalOrigin) {
            return Err(ProfileError::invalid_state("an outgoing call is already being dialed"));
        }
        let call = Call::outgoing(number, now);
        self.roster.insert(call.clone());
        Ok(call)
    }

    /// Terminate the placeholder of a dial the transport refused
    pub fn abandon_dial(&mut self) -> Option<Call> {
        let mut call = self.roster.remove(CallIndex::LocalOrigin)?;
        call.state = CallState::Terminated;
        Some(call)
    }

    /// Mark every call terminated and empty the roster
    pub fn terminate_all(&mut self) -> Vec<Call> {
        self.reported.clear();
        self.roster
            .take_all()
            .into_iter()
            .map(|mut call| {
                call.state = CallState::Terminated;
                call
            })
            .collect()
    }

    /// Diff the collected burst against the roster
    pub fn complete_pass(&mut self, now: Instant) -> ReconcileOutcome {
        let reported = std::mem::take(&mut self.reported);
        let before = self.roster.clone();

        let current: BTreeSet<u32> = self.roster.peer_indices().collect();
        let listed: BTreeSet<u32> = reported.keys().copied().collect();
        let mut added: BTreeSet<u32> = listed.difference(&current).copied().collect();
        let removed: BTreeSet<u32> = current.difference(&listed).copied().collect();
        let mut retained: BTreeSet<u32> = current.intersection(&listed).copied().collect();

        let mut outcome = ReconcileOutcome::default();

        let placeholder_age = self.roster.get(CallIndex::LocalOrigin).map(|call| call.age(now));
        if let Some(age) = placeholder_age {
            if let Some(index) = added.pop_first() {
                if let Some(mut call) = self.roster.remove(CallIndex::LocalOrigin) {
                    info!("Outgoing call confirmed as index {}", index);
                    call.index = CallIndex::Peer(index);
                    self.roster.insert(call);
                    retained.insert(index);
                }
            } else if age > self.outgoing_timeout {
                warn!("Outgoing call unconfirmed after {:?}, terminating", age);
                outcome.stuck_dial = Some(age);
                outcome.changed = self.terminate_all();
                return outcome;
            }
        }

        for index in removed {
            if let Some(mut call) = self.roster.remove(CallIndex::Peer(index)) {
                call.state = CallState::Terminated;
                outcome.changed.push(call);
            }
        }

        for index in added {
            if let Some(call) = reported.get(&index) {
                self.roster.insert(call.clone());
            }
        }

        for index in retained {
            if let (Some(call), Some(report)) =
                (self.roster.get_mut(CallIndex::Peer(index)), reported.get(&index))
            {
                call.absorb(report);
            }
        }

        let active = self.roster.count_in(CallState::Active);
        for call in self.roster.iter_mut() {
            call.multiparty = call.state == CallState::Active && active > 1;
        }

        outcome.changed.extend(
            self.roster
                .iter()
                .filter(|call| before.get(call.index) != Some(*call))
                .cloned(),
        );
        outcome.poll_again = !self.roster.is_empty();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OUTGOING_TIMEOUT: Duration = Duration::from_secs(10);

    fn states(reconciler: &CallReconciler) -> Vec<(CallIndex, CallState)> {
        reconciler.roster().iter().map(|call| (call.index, call.state)).collect()
    }

    fn seed(reconciler: &mut CallReconciler, entries: &[(u32, CallState)], now: Instant) {
        for (index, state) in entries {
            reconciler.record_entry(*index, CallDirection::Incoming, *state, false, "", now);
        }
        reconciler.complete_pass(now);
    }

    #[test]
    fn test_reconcile_removed_added_retained() {
        let now = Instant::now();
        let mut reconciler = CallReconciler::new(OUTGOING_TIMEOUT);
        seed(&mut reconciler, &[(1, CallState::Active), (2, CallState::Held)], now);

        reconciler.record_entry(2, CallDirection::Incoming, CallState::Active, false, "", now);
        reconciler.record_entry(3, CallDirection::Incoming, CallState::Incoming, false, "", now);
        let outcome = reconciler.complete_pass(now);

        let changed: Vec<(CallIndex, CallState)> =
            outcome.changed.iter().map(|call| (call.index, call.state)).collect();
        assert_eq!(
            changed,
            vec![
                (CallIndex::Peer(1), CallState::Terminated),
                (CallIndex::Peer(2), CallState::Active),
                (CallIndex::Peer(3), CallState::Incoming),
            ]
        );
        assert_eq!(
            states(&reconciler),
            vec![
                (CallIndex::Peer(2), CallState::Active),
                (CallIndex::Peer(3), CallState::Incoming),
            ]
        );
        assert!(outcome.poll_again);
        assert!(outcome.stuck_dial.is_none());
    }

    #[test]
    fn test_unchanged_call_is_not_reported() {
        let now = Instant::now();
        let mut reconciler = CallReconciler::new(OUTGOING_TIMEOUT);
        seed(&mut reconciler, &[(1, CallState::Active)], now);

        reconciler.record_entry(1, CallDirection::Incoming, CallState::Active, false, "", now);
        let outcome = reconciler.complete_pass(now);
        assert!(outcome.changed.is_empty());
    }

    #[test]
    fn test_local_origin_renamed_to_lowest_added() {
        let now = Instant::now();
        let mut reconciler = CallReconciler::new(OUTGOING_TIMEOUT);
        let placeholder = reconciler.begin_dial("555", now).unwrap();
        assert_eq!(states(&reconciler), vec![(CallIndex::LocalOrigin, CallState::Dialing)]);

        reconciler.record_entry(5, CallDirection::Outgoing, CallState::Dialing, false, "555", now);
        let outcome = reconciler.complete_pass(now + Duration::from_secs(1));

        assert_eq!(outcome.changed.len(), 1);
        let renamed = &outcome.changed[0];
        assert_eq!(renamed.index, CallIndex::Peer(5));
        assert_eq!(renamed.state, CallState::Dialing);
        assert_eq!(renamed.handle, placeholder.handle);
        assert_eq!(states(&reconciler), vec![(CallIndex::Peer(5), CallState::Dialing)]);
    }

    #[test]
    fn test_local_origin_picks_lowest_of_several() {
        let now = Instant::now();
        let mut reconciler = CallReconciler::new(OUTGOING_TIMEOUT);
        reconciler.begin_dial("555", now).unwrap();

        reconciler.record_entry(7, CallDirection::Incoming, CallState::Waiting, false, "777", now);
        reconciler.record_entry(4, CallDirection::Outgoing, CallState::Alerting, false, "555", now);
        let outcome = reconciler.complete_pass(now);

        assert_eq!(
            states(&reconciler),
            vec![
                (CallIndex::Peer(4), CallState::Alerting),
                (CallIndex::Peer(7), CallState::Waiting),
            ]
        );
        assert_eq!(outcome.changed.len(), 2);
        assert_eq!(reconciler.roster().get(CallIndex::Peer(4)).unwrap().direction, CallDirection::Outgoing);
    }

    #[test]
    fn test_local_origin_waits_before_timeout() {
        let now = Instant::now();
        let mut reconciler = CallReconciler::new(OUTGOING_TIMEOUT);
        reconciler.begin_dial("555", now).unwrap();

        let outcome = reconciler.complete_pass(now + Duration::from_secs(3));
        assert!(outcome.stuck_dial.is_none());
        assert!(outcome.changed.is_empty());
        assert!(outcome.poll_again);
        assert_eq!(states(&reconciler), vec![(CallIndex::LocalOrigin, CallState::Dialing)]);
    }

    #[test]
    fn test_stuck_dial_clears_roster() {
        let now = Instant::now();
        let mut reconciler = CallReconciler::new(OUTGOING_TIMEOUT);
        seed(&mut reconciler, &[(1, CallState::Held)], now);
        reconciler.begin_dial("555", now).unwrap();

        reconciler.record_entry(1, CallDirection::Incoming, CallState::Held, false, "", now);
        let outcome = reconciler.complete_pass(now + Duration::from_secs(11));

        assert_eq!(outcome.stuck_dial, Some(Duration::from_secs(11)));
        assert_eq!(outcome.changed.len(), 2);
        assert!(outcome.changed.iter().all(|call| call.state == CallState::Terminated));
        assert!(!outcome.poll_again);
        assert!(reconciler.roster().is_empty());
    }

    #[test]
    fn test_multiparty_follows_active_count() {
        let now = Instant::now();
        let mut reconciler = CallReconciler::new(OUTGOING_TIMEOUT);
        seed(&mut reconciler, &[(1, CallState::Active), (2, CallState::Held)], now);

        reconciler.record_entry(1, CallDirection::Incoming, CallState::Active, false, "", now);
        reconciler.record_entry(2, CallDirection::Incoming, CallState::Active, false, "", now);
        let outcome = reconciler.complete_pass(now);
        assert_eq!(outcome.changed.len(), 2);
        assert!(reconciler.roster().iter().all(|call| call.multiparty));

        // Peer claims a lone active call is multiparty; recomputation wins
        reconciler.record_entry(1, CallDirection::Incoming, CallState::Active, true, "", now);
        let outcome = reconciler.complete_pass(now);
        assert_eq!(outcome.changed.len(), 2);
        assert_eq!(outcome.changed[0].index, CallIndex::Peer(2));
        assert_eq!(outcome.changed[0].state, CallState::Terminated);
        assert_eq!(outcome.changed[1].index, CallIndex::Peer(1));
        assert!(!outcome.changed[1].multiparty);
    }

    #[test]
    fn test_empty_snapshot_stops_polling() {
        let now = Instant::now();
        let mut reconciler = CallReconciler::new(OUTGOING_TIMEOUT);
        seed(&mut reconciler, &[(1, CallState::Active)], now);

        let outcome = reconciler.complete_pass(now);
        assert!(!outcome.poll_again);
        assert_eq!(outcome.changed.len(), 1);
        assert_eq!(outcome.changed[0].state, CallState::Terminated);
    }

    #[test]
    fn test_abandon_dial() {
        let now = Instant::now();
        let mut reconciler = CallReconciler::new(OUTGOING_TIMEOUT);
        reconciler.begin_dial("555", now).unwrap();
        assert!(reconciler.begin_dial("666", now).is_err());

        let call = reconciler.abandon_dial().unwrap();
        assert_eq!(call.state, CallState::Terminated);
        assert!(reconciler.roster().is_empty());
        assert!(reconciler.abandon_dial().is_none());
    }
}
