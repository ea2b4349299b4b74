//! Call control actions and the tables that choose them
//!
//! Each user-level operation (accept, reject, hold, terminate, ...) maps to
//! exactly one peer action depending on what the roster currently holds.
//! The functions here are pure; issuing and correlating the chosen action is
//! the session's job.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::call::{CallIndex, CallRoster, CallState};
use crate::events::VolumeChannel;
use crate::transport::ProfileCommand;

/// Action codes understood by the audio gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallAction {
    /// ATA
    Answer,
    /// AT+CHUP
    HangUp,
    /// CHLD=0, release held or waiting calls
    ReleaseHeld,
    /// CHLD=1, release active calls and accept the other
    ReleaseActiveAcceptOther,
    /// CHLD=2, hold active calls and accept the other
    HoldActiveAcceptOther,
    /// CHLD=3, add the held call to the conversation
    AddHeldToConference,
    /// CHLD=4, connect the two calls and leave
    ExplicitTransfer,
    /// CHLD=1x
    ReleaseSpecific(u32),
    /// CHLD=2x, private consultation with one multiparty member
    PrivateConsultation(u32),
    /// BTRH=0
    ResponseAndHold,
    /// BTRH=1
    ResponseAndHoldAccept,
    /// BTRH=2
    ResponseAndHoldReject,
}

impl fmt::Display for CallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallAction::Answer => write!(f, "ATA"),
            CallAction::HangUp => write!(f, "CHUP"),
            CallAction::ReleaseHeld => write!(f, "CHLD=0"),
            CallAction::ReleaseActiveAcceptOther => write!(f, "CHLD=1"),
            CallAction::HoldActiveAcceptOther => write!(f, "CHLD=2"),
            CallAction::AddHeldToConference => write!(f, "CHLD=3"),
            CallAction::ExplicitTransfer => write!(f, "CHLD=4"),
            CallAction::ReleaseSpecific(index) => write!(f, "CHLD=1{}", index),
            CallAction::PrivateConsultation(index) => write!(f, "CHLD=2{}", index),
            CallAction::ResponseAndHold => write!(f, "BTRH=0"),
            CallAction::ResponseAndHoldAccept => write!(f, "BTRH=1"),
            CallAction::ResponseAndHoldReject => write!(f, "BTRH=2"),
        }
    }
}

/// What to do with the current call when accepting another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AcceptMode {
    #[default]
    None,
    Hold,
    Terminate,
}

/// Action accepting the incoming, waiting or held call
pub fn accept_action(roster: &CallRoster, mode: AcceptMode) -> Option<CallAction> {
    let call = roster
        .find_in(&[CallState::Incoming, CallState::Waiting])
        .or_else(|| roster.find_in(&[CallState::ResponseHeld, CallState::Held]))?;
    let has_active = roster.has_state(CallState::Active);

    match call.state {
        CallState::Incoming => (mode == AcceptMode::None).then_some(CallAction::Answer),
        CallState::Waiting if !has_active => {
            (mode == AcceptMode::None).then_some(CallAction::HoldActiveAcceptOther)
        }
        CallState::Waiting => match mode {
            AcceptMode::None | AcceptMode::Hold => Some(CallAction::HoldActiveAcceptOther),
            AcceptMode::Terminate => Some(CallAction::ReleaseActiveAcceptOther),
        },
        CallState::Held => match mode {
            AcceptMode::Hold => Some(CallAction::HoldActiveAcceptOther),
            AcceptMode::Terminate => Some(CallAction::ReleaseActiveAcceptOther),
            AcceptMode::None if has_active => Some(CallAction::AddHeldToConference),
            AcceptMode::None => Some(CallAction::HoldActiveAcceptOther),
        },
        CallState::ResponseHeld => Some(CallAction::ResponseAndHoldAccept),
        _ => None,
    }
}

/// Action rejecting the incoming, waiting or held call
pub fn reject_action(roster: &CallRoster) -> Option<CallAction> {
    let call = roster.find_in(&[
        CallState::Incoming,
        CallState::Waiting,
        CallState::ResponseHeld,
        CallState::Held,
    ])?;
    match call.state {
        CallState::Incoming => Some(CallAction::HangUp),
        CallState::Waiting | CallState::Held => Some(CallAction::ReleaseHeld),
        CallState::ResponseHeld => Some(CallAction::ResponseAndHoldReject),
        _ => None,
    }
}

/// Action putting the incoming or active call on hold
pub fn hold_action(roster: &CallRoster) -> Option<CallAction> {
    if roster.has_state(CallState::Incoming) {
        return Some(CallAction::ResponseAndHold);
    }
    roster
        .has_state(CallState::Active)
        .then_some(CallAction::HoldActiveAcceptOther)
}

/// Action ending the ongoing call, or only the active call at `index`
pub fn terminate_action(roster: &CallRoster, index: Option<u32>) -> Option<CallAction> {
    match index {
        Some(index) => roster
            .get(CallIndex::Peer(index))
            .filter(|call| call.state == CallState::Active)
            .map(|_| CallAction::ReleaseSpecific(index)),
        None => roster
            .find_in(&[CallState::Dialing, CallState::Alerting, CallState::Active])
            .map(|_| CallAction::HangUp),
    }
}

/// Action splitting `index` out of the conference for a private talk
pub fn private_mode_action(roster: &CallRoster, index: u32) -> Option<CallAction> {
    roster
        .get(CallIndex::Peer(index))
        .filter(|call| call.state == CallState::Active && call.multiparty)
        .map(|_| CallAction::PrivateConsultation(index))
}

/// Action joining the two calls and dropping out
pub fn explicit_transfer_action(roster: &CallRoster) -> Option<CallAction> {
    (roster.len() >= 2).then_some(CallAction::ExplicitTransfer)
}

/// Alternate accept actions tried once when the preferred one is rejected
///
/// Only consulted when no call is active. `None` disables that retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptRetryPolicy {
    /// Used when `Answer` fails on a lone incoming call
    pub incoming: Option<CallAction>,
    /// Used when `HoldActiveAcceptOther` fails on a waiting call
    pub waiting: Option<CallAction>,
}

impl Default for AcceptRetryPolicy {
    fn default() -> Self {
        Self {
            incoming: Some(CallAction::ReleaseActiveAcceptOther),
            waiting: Some(CallAction::Answer),
        }
    }
}

impl AcceptRetryPolicy {
    /// Never retry
    pub fn disabled() -> Self {
        Self {
            incoming: None,
            waiting: None,
        }
    }

    /// Alternate for a rejected accept action, if any
    pub fn fallback_for(&self, rejected: CallAction, roster: &CallRoster) -> Option<CallAction> {
        let fallback = match rejected {
            CallAction::Answer if roster.has_state(CallState::Incoming) && roster.len() == 1 => {
                self.incoming
            }
            CallAction::HoldActiveAcceptOther if roster.has_state(CallState::Waiting) => self.waiting,
            _ => None,
        };
        fallback.filter(|fallback| *fallback != rejected)
    }
}

/// Tag of a command outstanding in the handsfree correlator
#[derive(Debug, Clone, PartialEq)]
pub enum HfpAction {
    Accept {
        action: CallAction,
        mode: AcceptMode,
        retried: bool,
    },
    Reject(CallAction),
    Hold(CallAction),
    Terminate(CallAction),
    EnterPrivateMode(u32),
    ExplicitTransfer,
    Dial {
        number: String,
    },
    SendDtmf(char),
    QueryCurrentCalls,
    QueryOperatorName,
    SubscriberInfo,
    SetVolume {
        channel: VolumeChannel,
        level: u8,
    },
    StartVoiceRecognition,
    StopVoiceRecognition,
    DisableNrec,
}

impl HfpAction {
    /// Transport command carrying this action
    pub fn command(&self) -> ProfileCommand {
        match self {
            HfpAction::Accept { action, .. }
            | HfpAction::Reject(action)
            | HfpAction::Hold(action)
            | HfpAction::Terminate(action) => ProfileCommand::Call(*action),
            HfpAction::EnterPrivateMode(index) => {
                ProfileCommand::Call(CallAction::PrivateConsultation(*index))
            }
            HfpAction::ExplicitTransfer => ProfileCommand::Call(CallAction::ExplicitTransfer),
            HfpAction::Dial { number } => ProfileCommand::Dial {
                number: number.clone(),
            },
            HfpAction::SendDtmf(code) => ProfileCommand::SendDtmf { code: *code },
            HfpAction::QueryCurrentCalls => ProfileCommand::QueryCurrentCalls,
            HfpAction::QueryOperatorName => ProfileCommand::QueryOperatorName,
            HfpAction::SubscriberInfo => ProfileCommand::RetrieveSubscriberInfo,
            HfpAction::SetVolume { channel, level } => ProfileCommand::SetVolume {
                channel: *channel,
                level: *level,
            },
            HfpAction::StartVoiceRecognition => ProfileCommand::StartVoiceRecognition,
            HfpAction::StopVoiceRecognition => ProfileCommand::StopVoiceRecognition,
            HfpAction::DisableNrec => ProfileCommand::DisableNrec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hfp::call::{Call, CallDirection};
    use tokio::time::Instant;

    fn roster(calls: &[(u32, CallState, bool)]) -> CallRoster {
        let now = Instant::now();
        calls
            .iter()
            .map(|(index, state, multiparty)| {
                Call::reported(*index, CallDirection::Incoming, *state, *multiparty, "", now)
            })
            .collect()
    }

    #[test]
    fn test_accept_incoming() {
        let calls = roster(&[(1, CallState::Incoming, false)]);
        assert_eq!(accept_action(&calls, AcceptMode::None), Some(CallAction::Answer));
        assert_eq!(accept_action(&calls, AcceptMode::Hold), None);
    }

    #[test]
    fn test_accept_waiting() {
        let alone = roster(&[(2, CallState::Waiting, false)]);
        assert_eq!(
            accept_action(&alone, AcceptMode::None),
            Some(CallAction::HoldActiveAcceptOther)
        );
        assert_eq!(accept_action(&alone, AcceptMode::Terminate), None);

        let behind_active = roster(&[(1, CallState::Active, false), (2, CallState::Waiting, false)]);
        assert_eq!(
            accept_action(&behind_active, AcceptMode::Hold),
            Some(CallAction::HoldActiveAcceptOther)
        );
        assert_eq!(
            accept_action(&behind_active, AcceptMode::Terminate),
            Some(CallAction::ReleaseActiveAcceptOther)
        );
    }

    #[test]
    fn test_accept_held_and_response_held() {
        let held_with_active = roster(&[(1, CallState::Active, false), (2, CallState::Held, false)]);
        assert_eq!(
            accept_action(&held_with_active, AcceptMode::None),
            Some(CallAction::AddHeldToConference)
        );

        let held_alone = roster(&[(2, CallState::Held, false)]);
        assert_eq!(
            accept_action(&held_alone, AcceptMode::None),
            Some(CallAction::HoldActiveAcceptOther)
        );

        let response_held = roster(&[(3, CallState::ResponseHeld, false)]);
        assert_eq!(
            accept_action(&response_held, AcceptMode::None),
            Some(CallAction::ResponseAndHoldAccept)
        );

        assert_eq!(accept_action(&roster(&[(1, CallState::Active, false)]), AcceptMode::None), None);
    }

    #[test]
    fn test_reject_hold_terminate() {
        assert_eq!(
            reject_action(&roster(&[(1, CallState::Incoming, false)])),
            Some(CallAction::HangUp)
        );
        assert_eq!(
            reject_action(&roster(&[(1, CallState::Active, false), (2, CallState::Waiting, false)])),
            Some(CallAction::ReleaseHeld)
        );
        assert_eq!(
            reject_action(&roster(&[(1, CallState::ResponseHeld, false)])),
            Some(CallAction::ResponseAndHoldReject)
        );

        assert_eq!(
            hold_action(&roster(&[(1, CallState::Incoming, false)])),
            Some(CallAction::ResponseAndHold)
        );
        assert_eq!(
            hold_action(&roster(&[(1, CallState::Active, false)])),
            Some(CallAction::HoldActiveAcceptOther)
        );
        assert_eq!(hold_action(&roster(&[(1, CallState::Held, false)])), None);

        assert_eq!(
            terminate_action(&roster(&[(1, CallState::Alerting, false)]), None),
            Some(CallAction::HangUp)
        );
        assert_eq!(terminate_action(&roster(&[(1, CallState::Held, false)]), None), None);
        assert_eq!(
            terminate_action(&roster(&[(1, CallState::Active, true), (2, CallState::Active, true)]), Some(2)),
            Some(CallAction::ReleaseSpecific(2))
        );
    }

    #[test]
    fn test_private_mode_and_transfer() {
        let conference = roster(&[(1, CallState::Active, true), (2, CallState::Active, true)]);
        assert_eq!(
            private_mode_action(&conference, 2),
            Some(CallAction::PrivateConsultation(2))
        );
        assert_eq!(private_mode_action(&roster(&[(1, CallState::Active, false)]), 1), None);

        assert_eq!(explicit_transfer_action(&conference), Some(CallAction::ExplicitTransfer));
        assert_eq!(explicit_transfer_action(&roster(&[(1, CallState::Active, false)])), None);
    }

    #[test]
    fn test_retry_policy() {
        let policy = AcceptRetryPolicy::default();
        let incoming = roster(&[(1, CallState::Incoming, false)]);
        assert_eq!(
            policy.fallback_for(CallAction::Answer, &incoming),
            Some(CallAction::ReleaseActiveAcceptOther)
        );

        let waiting = roster(&[(2, CallState::Waiting, false)]);
        assert_eq!(
            policy.fallback_for(CallAction::HoldActiveAcceptOther, &waiting),
            Some(CallAction::Answer)
        );

        let crowded = roster(&[(1, CallState::Incoming, false), (2, CallState::Held, false)]);
        assert_eq!(policy.fallback_for(CallAction::Answer, &crowded), None);
        assert_eq!(AcceptRetryPolicy::disabled().fallback_for(CallAction::Answer, &incoming), None);
    }
}
