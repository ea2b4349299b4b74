//! Command Correlation Module
//!
//! Pairs commands issued to the transport with the asynchronous results the
//! transport reports later. Results carry no identifier, so matching is purely
//! positional: the peer answers commands in the order it received them, and the
//! oldest outstanding command owns the next result.

use std::collections::VecDeque;
use std::fmt;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{ProfileError, ProfileResult};
use crate::types::CommandStatus;

/// A command the transport accepted and whose result is still outstanding
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction<A> {
    pub action: A,
    pub issued_at: Instant,
}

/// FIFO correlator for one peer
///
/// Generic over the action tag so each profile keeps its own vocabulary.
#[derive(Debug)]
pub struct CommandCorrelator<A> {
    queue: VecDeque<PendingAction<A>>,
    issued: u64,
    rejected: u64,
    resolved: u64,
    unmatched: u64,
}

impl<A: fmt::Debug> CommandCorrelator<A> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            issued: 0,
            rejected: 0,
            resolved: 0,
            unmatched: 0,
        }
    }

    /// Send `action` through `send` and track it if the transport accepts
    ///
    /// A synchronous rejection leaves no queue entry behind.
    pub fn issue<F>(&mut self, action: A, now: Instant, send: F) -> ProfileResult<()>
    where
        F: FnOnce(&A) -> CommandStatus,
    {
        match send(&action) {
            CommandStatus::Accepted => {
                debug!("Issued {:?}, {} outstanding", action, self.queue.len() + 1);
                self.issued += 1;
                self.queue.push_back(PendingAction {
                    action,
                    issued_at: now,
                });
                Ok(())
            }
            CommandStatus::Rejected => {
                warn!("Transport rejected {:?}", action);
                self.rejected += 1;
                Err(ProfileError::rejected(format!("{:?}", action)))
            }
        }
    }

    /// Pop the action owning the result that just arrived
    ///
    /// Returns `None` and only logs when nothing is outstanding.
    pub fn on_command_result(&mut self) -> Option<PendingAction<A>> {
        match self.queue.pop_front() {
            Some(pending) => {
                debug!("Result matched {:?}", pending.action);
                self.resolved += 1;
                Some(pending)
            }
            None => {
                warn!("Command result with no pending action, discarding");
                self.unmatched += 1;
                None
            }
        }
    }

    /// Oldest outstanding action
    pub fn front(&self) -> Option<&A> {
        self.queue.front().map(|pending| &pending.action)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingAction<A>> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Forget every outstanding action, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        if dropped > 0 {
            debug!("Dropping {} outstanding actions", dropped);
        }
        self.queue.clear();
        dropped
    }

    pub fn stats(&self) -> CorrelatorStats {
        CorrelatorStats {
            outstanding: self.queue.len(),
            issued: self.issued,
            rejected: self.rejected,
            resolved: self.resolved,
            unmatched: self.unmatched,
        }
    }
}

impl<A: fmt::Debug> Default for CommandCorrelator<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for one correlator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub outstanding: usize,
    pub issued: u64,
    pub rejected: u64,
    pub resolved: u64,
    pub unmatched: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Tag {
        Dial,
        Volume,
    }

    #[test]
    fn test_results_resolve_in_issue_order() {
        let mut correlator = CommandCorrelator::new();
        let now = Instant::now();

        correlator.issue(Tag::Dial, now, |_| CommandStatus::Accepted).unwrap();
        correlator.issue(Tag::Volume, now, |_| CommandStatus::Accepted).unwrap();
        assert_eq!(correlator.front(), Some(&Tag::Dial));

        assert_eq!(correlator.on_command_result().unwrap().action, Tag::Dial);
        assert_eq!(correlator.on_command_result().unwrap().action, Tag::Volume);
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_rejected_issue_is_not_queued() {
        let mut correlator = CommandCorrelator::new();
        let result = correlator.issue(Tag::Dial, Instant::now(), |_| CommandStatus::Rejected);

        assert!(matches!(result, Err(ProfileError::SynchronousRejection { .. })));
        assert!(correlator.is_empty());
        assert_eq!(correlator.stats().rejected, 1);
    }

    #[test]
    fn test_unmatched_result_is_discarded() {
        let mut correlator: CommandCorrelator<Tag> = CommandCorrelator::new();
        assert!(correlator.on_command_result().is_none());

        let stats = correlator.stats();
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn test_clear_reports_dropped() {
        let mut correlator = CommandCorrelator::new();
        let now = Instant::now();
        correlator.issue(Tag::Dial, now, |_| CommandStatus::Accepted).unwrap();
        correlator.issue(Tag::Dial, now, |_| CommandStatus::Accepted).unwrap();

        assert_eq!(correlator.clear(), 2);
        assert_eq!(correlator.len(), 0);
        assert_eq!(correlator.stats().issued, 2);
    }
}
