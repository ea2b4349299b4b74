//! Core value types shared by every profile
//!
//! This module holds the identifiers and state enums that flow through the
//! connection state machines, the collaborator traits and the outbound
//! notifications:
//!
//! - **PeerId** - immutable 48-bit hardware address keying all per-peer state
//! - **ProfileKind** - which profile a machine or notification belongs to
//! - **ConnectionState / AudioState** - the observable lifecycle of a peer
//! - **ConnectionPriority** - the stored admission priority of a peer
//! - **CommandStatus** - the synchronous verdict of the transport

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ProfileError;

/// 48-bit hardware address of a remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; 6]);

impl PeerId {
    /// Create a peer id from its six address bytes, most significant first
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes, most significant first
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for PeerId {
    type Err = ProfileError;

    /// Parse the colon separated form, e.g. `00:1A:7D:DA:71:13`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| ProfileError::invalid_request(format!("Peer address too short: {}", s)))?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ProfileError::invalid_request(format!("Malformed peer address: {}", s)));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| ProfileError::invalid_request(format!("Malformed peer address: {}", s)))?;
        }
        if parts.next().is_some() {
            return Err(ProfileError::invalid_request(format!("Peer address too long: {}", s)));
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 6]> for PeerId {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl From<PeerId> for [u8; 6] {
    fn from(peer: PeerId) -> Self {
        peer.0
    }
}

/// Profile a state machine runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileKind {
    /// Advanced audio distribution, local device is the streaming source
    A2dp,
    /// Handsfree profile, local device is the handsfree unit
    HandsfreeClient,
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileKind::A2dp => write!(f, "A2DP"),
            ProfileKind::HandsfreeClient => write!(f, "HFP-client"),
        }
    }
}

/// Connection lifecycle of one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Stable states flush the deferred replay buffer on entry
    pub fn is_stable(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Audio sub-state, meaningful only while connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioState {
    AudioOff,
    AudioConnecting,
    AudioOn,
}

impl fmt::Display for AudioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioState::AudioOff => write!(f, "AudioOff"),
            AudioState::AudioConnecting => write!(f, "AudioConnecting"),
            AudioState::AudioOn => write!(f, "AudioOn"),
        }
    }
}

/// Stored connection priority of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectionPriority {
    Undefined,
    Off,
    On,
    AutoConnect,
}

/// Synchronous answer of the transport to a non-blocking command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Accepted,
    Rejected,
}

impl CommandStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandStatus::Accepted)
    }
}

impl From<bool> for CommandStatus {
    fn from(accepted: bool) -> Self {
        if accepted {
            CommandStatus::Accepted
        } else {
            CommandStatus::Rejected
        }
    }
}

/// Point-in-time view of a peer machine, published by its actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub connection: ConnectionState,
    pub audio: AudioState,
}

impl Default for PeerSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            audio: AudioState::AudioOff,
        }
    }
}
