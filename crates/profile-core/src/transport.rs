//! Transport boundary
//!
//! The transport binds the profile machines to the actual link. Every call is
//! non-blocking: the return value only says whether the command was taken.
//! Outcomes come back later as [`StackEvent`](crate::events::StackEvent)s and
//! are matched through the command correlator.

use crate::codec::CodecConfig;
use crate::events::VolumeChannel;
use crate::hfp::actions::CallAction;
use crate::types::{CommandStatus, PeerId};

/// Command vocabulary accepted by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileCommand {
    ConnectAudio,
    DisconnectAudio,
    Dial { number: String },
    Call(CallAction),
    QueryCurrentCalls,
    QueryOperatorName,
    RetrieveSubscriberInfo,
    SetVolume { channel: VolumeChannel, level: u8 },
    SendDtmf { code: char },
    StartVoiceRecognition,
    StopVoiceRecognition,
    /// Ask the gateway to turn off its echo cancelling and noise reduction
    DisableNrec,
    /// Ordered codec preference list
    SetCodecPreference { configs: Vec<CodecConfig> },
}

/// Link to the remote peers
///
/// Implementations must not block; they hand the command to their own
/// machinery and report acceptance synchronously.
pub trait ProfileTransport: Send + Sync {
    fn connect(&self, peer: PeerId) -> CommandStatus;

    fn disconnect(&self, peer: PeerId) -> CommandStatus;

    fn issue_command(&self, peer: PeerId, command: &ProfileCommand) -> CommandStatus;
}
