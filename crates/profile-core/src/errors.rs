//! Error types for the profile core

use std::time::Duration;

use thiserror::Error;

use crate::types::{ConnectionState, PeerId};

/// Result type for profile operations
pub type ProfileResult<T> = Result<T, ProfileError>;

/// Errors raised by the profile state machines and their helpers
///
/// None of these is fatal to a peer machine. Handlers return them to the
/// machine loop, which logs unexpected events and turns everything else into
/// a `RequestFailed` notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    /// Transport refused a command synchronously
    #[error("Transport rejected {command}")]
    SynchronousRejection { command: String },

    /// No terminal event arrived within the bound
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Event with no matching pending action, or not valid in the current state
    #[error("Unexpected {event} while {state}")]
    UnexpectedEvent { state: ConnectionState, event: String },

    /// Locally dialed call never confirmed by the peer
    #[error("Outgoing call unresolved after {age:?}")]
    StuckOutgoingCall { age: Duration },

    /// Alternate encoding of an action failed too
    #[error("{action} failed after retry")]
    RetryExhausted { action: String },

    /// Request not valid in the current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Request malformed or unsupported by the peer
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// No call in the roster qualifies for the operation
    #[error("No call available for {operation}")]
    NoMatchingCall { operation: String },

    /// Codec preference refused before reaching the transport
    #[error("Codec preference rejected: {reason}")]
    CodecRejected { reason: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Peer actor no longer accepts messages
    #[error("Peer actor for {peer} is closed")]
    ActorClosed { peer: PeerId },
}

impl ProfileError {
    /// Create a synchronous rejection error
    pub fn rejected(command: impl Into<String>) -> Self {
        Self::SynchronousRejection {
            command: command.into(),
        }
    }

    /// Create an unexpected event error
    pub fn unexpected(state: ConnectionState, event: impl Into<String>) -> Self {
        Self::UnexpectedEvent {
            state,
            event: event.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a no matching call error
    pub fn no_matching_call(operation: impl Into<String>) -> Self {
        Self::NoMatchingCall {
            operation: operation.into(),
        }
    }

    /// Create a codec rejection error
    pub fn codec_rejected(reason: impl Into<String>) -> Self {
        Self::CodecRejected {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the machine should drop this silently instead of notifying
    pub fn is_unexpected_event(&self) -> bool {
        matches!(self, Self::UnexpectedEvent { .. })
    }
}
