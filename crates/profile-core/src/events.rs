//! Event model
//!
//! Two directions:
//!
//! - **StackEvent** - produced by the transport adaptation layer, delivered to
//!   a peer machine as a message
//! - **ProfileEvent** - produced by a peer machine, published through an
//!   [`EventSink`](crate::sink::EventSink) to UI and telephony collaborators
//!
//! Raw protocol states are closed enums; translating HAL or wire values into
//! them happens outside this crate.

use serde::{Deserialize, Serialize};

use crate::codec::{CodecConfig, CodecStatus};
use crate::errors::ProfileError;
use crate::hfp::call::{Call, CallDirection, CallState};
use crate::types::{AudioState, ConnectionState, PeerId, ProfileKind};

/// Link state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Audio link state as reported by the transport
///
/// For A2DP, `Connected` means the stream started and `Suspended` that the
/// peer suspended it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawAudioState {
    Disconnected,
    Connecting,
    Connected,
    /// SCO link up with the wideband speech codec
    ConnectedWideband,
    Suspended,
}

/// Feature flags the peer announced when the link came up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PeerCapabilities {
    pub features: u32,
    /// Supported three-way calling (CHLD) operations
    pub call_hold: u32,
}

impl PeerCapabilities {
    pub const THREE_WAY_CALLING: u32 = 0x0001;
    pub const ECHO_NOISE_REDUCTION: u32 = 0x0002;
    pub const VOICE_RECOGNITION: u32 = 0x0004;
    pub const IN_BAND_RING: u32 = 0x0008;
    pub const VOICE_TAG: u32 = 0x0010;
    pub const REJECT_CALL: u32 = 0x0020;
    pub const ENHANCED_CALL_STATUS: u32 = 0x0040;
    pub const ENHANCED_CALL_CONTROL: u32 = 0x0080;
    pub const EXTENDED_ERRORS: u32 = 0x0100;
    pub const CODEC_NEGOTIATION: u32 = 0x0200;

    pub const CHLD_RELEASE: u32 = 0x01;
    pub const CHLD_RELEASE_AND_ACCEPT: u32 = 0x02;
    pub const CHLD_RELEASE_SPECIFIC: u32 = 0x04;
    pub const CHLD_HOLD_AND_ACCEPT: u32 = 0x08;
    pub const CHLD_PRIVATE: u32 = 0x10;
    pub const CHLD_MERGE: u32 = 0x20;
    pub const CHLD_MERGE_AND_DETACH: u32 = 0x40;

    pub fn new(features: u32, call_hold: u32) -> Self {
        Self { features, call_hold }
    }

    pub fn has_feature(&self, flag: u32) -> bool {
        self.features & flag == flag
    }

    pub fn supports_call_hold(&self, flag: u32) -> bool {
        self.call_hold & flag == flag
    }
}

/// Indicators that change the call list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallIndicatorKind {
    Call,
    CallSetup,
    CallHeld,
    ResponseAndHold,
    /// Calling line identification
    CallerId,
    CallWaiting,
}

/// Indicators describing the gateway's network and device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkIndicatorKind {
    ServiceAvailable,
    Roaming,
    SignalStrength,
    BatteryLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeChannel {
    Speaker,
    Microphone,
}

/// Final result code of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandOutcome {
    Ok,
    Error,
    NoCarrier,
    Busy,
    NoAnswer,
    Delayed,
    Blacklisted,
    /// Extended error, vendor code carried alongside
    CmeError,
}

impl CommandOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandOutcome::Ok)
    }
}

/// Event reported by the transport for one peer
#[derive(Debug, Clone, PartialEq)]
pub enum StackEvent {
    ConnectionChanged {
        state: RawConnectionState,
        capabilities: PeerCapabilities,
    },
    AudioChanged {
        state: RawAudioState,
    },
    CallIndicator {
        kind: CallIndicatorKind,
        value: u32,
    },
    CallListEntry {
        index: u32,
        direction: CallDirection,
        state: CallState,
        multiparty: bool,
        number: String,
    },
    CommandResult {
        outcome: CommandOutcome,
        code: Option<u32>,
    },
    CodecConfigChanged {
        config: CodecConfig,
        selectable: Vec<CodecConfig>,
        local_capabilities: Vec<CodecConfig>,
    },
    VolumeChanged {
        channel: VolumeChannel,
        level: u8,
    },
    OperatorName(String),
    SubscriberInfo(String),
    NetworkIndicator {
        kind: NetworkIndicatorKind,
        value: u32,
    },
    VoiceRecognitionChanged {
        active: bool,
    },
    InBandRingChanged {
        enabled: bool,
    },
}

impl StackEvent {
    /// Shorthand for a link state change without capabilities
    pub fn connection(state: RawConnectionState) -> Self {
        StackEvent::ConnectionChanged {
            state,
            capabilities: PeerCapabilities::default(),
        }
    }

    pub fn audio(state: RawAudioState) -> Self {
        StackEvent::AudioChanged { state }
    }

    pub fn command_result(outcome: CommandOutcome) -> Self {
        StackEvent::CommandResult {
            outcome,
            code: None,
        }
    }

    /// Event name for logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            StackEvent::ConnectionChanged { .. } => "ConnectionChanged",
            StackEvent::AudioChanged { .. } => "AudioChanged",
            StackEvent::CallIndicator { .. } => "CallIndicator",
            StackEvent::CallListEntry { .. } => "CallListEntry",
            StackEvent::CommandResult { .. } => "CommandResult",
            StackEvent::CodecConfigChanged { .. } => "CodecConfigChanged",
            StackEvent::VolumeChanged { .. } => "VolumeChanged",
            StackEvent::OperatorName(_) => "OperatorName",
            StackEvent::SubscriberInfo(_) => "SubscriberInfo",
            StackEvent::NetworkIndicator { .. } => "NetworkIndicator",
            StackEvent::VoiceRecognitionChanged { .. } => "VoiceRecognitionChanged",
            StackEvent::InBandRingChanged { .. } => "InBandRingChanged",
        }
    }
}

/// Audio routing side effect requested from the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioRouteUpdate {
    /// Route call audio over the SCO link
    HfpEnabled { sample_rate_hz: u32 },
    HfpDisabled,
    /// Restart the media path with new feeding parameters
    A2dpReconfigure { config: CodecConfig },
}

/// Gateway state published to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerInfo {
    OperatorName(Option<String>),
    SubscriberNumber(String),
    NetworkService(bool),
    Roaming(bool),
    SignalStrength(u32),
    BatteryLevel(u32),
    VoiceRecognition(bool),
    InBandRing(bool),
}

/// Notification produced by a peer machine
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileEvent {
    ConnectionStateChanged {
        peer: PeerId,
        profile: ProfileKind,
        previous: ConnectionState,
        current: ConnectionState,
    },
    AudioStateChanged {
        peer: PeerId,
        profile: ProfileKind,
        previous: AudioState,
        current: AudioState,
        /// Present when audio is on
        wideband: Option<bool>,
    },
    CallChanged {
        peer: PeerId,
        call: Call,
    },
    CodecConfigChanged {
        peer: PeerId,
        status: CodecStatus,
    },
    CommandResult {
        peer: PeerId,
        profile: ProfileKind,
        outcome: CommandOutcome,
        code: Option<u32>,
    },
    AudioRoute {
        peer: PeerId,
        update: AudioRouteUpdate,
    },
    RequestFailed {
        peer: PeerId,
        profile: ProfileKind,
        error: ProfileError,
    },
    PeerInfo {
        peer: PeerId,
        info: PeerInfo,
    },
    VolumeChanged {
        peer: PeerId,
        channel: VolumeChannel,
        level: u8,
    },
    PlayingStateChanged {
        peer: PeerId,
        playing: bool,
    },
}

impl ProfileEvent {
    pub fn peer(&self) -> PeerId {
        match self {
            ProfileEvent::ConnectionStateChanged { peer, .. }
            | ProfileEvent::AudioStateChanged { peer, .. }
            | ProfileEvent::CallChanged { peer, .. }
            | ProfileEvent::CodecConfigChanged { peer, .. }
            | ProfileEvent::CommandResult { peer, .. }
            | ProfileEvent::AudioRoute { peer, .. }
            | ProfileEvent::RequestFailed { peer, .. }
            | ProfileEvent::PeerInfo { peer, .. }
            | ProfileEvent::VolumeChanged { peer, .. }
            | ProfileEvent::PlayingStateChanged { peer, .. } => *peer,
        }
    }
}
