//! Admission control for peer-initiated connections

use std::fmt;

use tracing::{debug, info};

use crate::preferences::PreferenceStore;
use crate::types::{ConnectionPriority, PeerId};

/// Why an incoming connection was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    QuietMode,
    PriorityOff,
    /// No stored priority and no bond to fall back on
    UnknownPeer,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QuietMode => write!(f, "quiet mode"),
            RejectReason::PriorityOff => write!(f, "priority off"),
            RejectReason::UnknownPeer => write!(f, "undefined priority without bond"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Reject(RejectReason),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accept)
    }
}

/// Decide whether a peer may connect on its own initiative
///
/// Quiet mode refuses everyone. An undefined priority is accepted only for a
/// bonded peer; an explicit off is always refused.
pub fn admit_incoming(peer: PeerId, preferences: &dyn PreferenceStore) -> Admission {
    if preferences.is_quiet_mode() {
        info!("Refusing {} in quiet mode", peer);
        return Admission::Reject(RejectReason::QuietMode);
    }

    let admission = match preferences.priority(peer) {
        ConnectionPriority::Undefined if preferences.is_bond_known(peer) => Admission::Accept,
        ConnectionPriority::Undefined => Admission::Reject(RejectReason::UnknownPeer),
        ConnectionPriority::Off => Admission::Reject(RejectReason::PriorityOff),
        ConnectionPriority::On | ConnectionPriority::AutoConnect => Admission::Accept,
    };
    debug!("Admission for {}: {:?}", peer, admission);
    admission
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::InMemoryPreferences;

    const PEER: PeerId = PeerId::new([0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22]);

    #[test]
    fn test_priority_decides_admission() {
        let preferences = InMemoryPreferences::new();
        assert_eq!(
            admit_incoming(PEER, &preferences),
            Admission::Reject(RejectReason::UnknownPeer)
        );

        preferences.set_bonded(PEER, true);
        assert_eq!(admit_incoming(PEER, &preferences), Admission::Accept);

        preferences.set_priority(PEER, ConnectionPriority::Off);
        assert_eq!(
            admit_incoming(PEER, &preferences),
            Admission::Reject(RejectReason::PriorityOff)
        );

        preferences.set_priority(PEER, ConnectionPriority::AutoConnect);
        assert!(admit_incoming(PEER, &preferences).is_accepted());
    }

    #[test]
    fn test_quiet_mode_refuses_everyone() {
        let preferences = InMemoryPreferences::new();
        preferences.set_priority(PEER, ConnectionPriority::On);
        preferences.set_quiet_mode(true);
        assert_eq!(
            admit_incoming(PEER, &preferences),
            Admission::Reject(RejectReason::QuietMode)
        );
    }
}
