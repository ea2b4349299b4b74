//! Profile configuration
//!
//! Timing bounds and behavior switches for the peer machines. Every field has
//! a default matching common peer behavior, so `ProfileConfig::default()` is a
//! complete configuration.
//!
//! # Example
//!
//! ```rust
//! use btaudio_profile_core::config::ProfileConfig;
//! use std::time::Duration;
//!
//! let config = ProfileConfig::new()
//!     .with_hfp_connect_timeout(Duration::from_secs(5))
//!     .with_inbox_capacity(64);
//!
//! assert_eq!(config.hfp_client.connect_timeout(), Duration::from_secs(5));
//! assert_eq!(config.a2dp.connect_timeout(), Duration::from_secs(30));
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ProfileError, ProfileResult};
use crate::hfp::actions::AcceptRetryPolicy;
use crate::logging::LoggingConfig;

/// A2DP machine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct A2dpConfig {
    /// Bound on Connecting and Disconnecting, in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for A2dpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
        }
    }
}

impl A2dpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Handsfree client machine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HfpClientConfig {
    /// Bound on Connecting and Disconnecting, in milliseconds
    pub connect_timeout_ms: u64,

    /// Delay between current call list polls while calls exist, and the
    /// minimum spacing between two queries
    pub call_poll_interval_ms: u64,

    /// Age after which an unconfirmed outgoing call is torn down
    pub outgoing_call_timeout_ms: u64,

    /// Refuse gateways without enhanced call status; the call list cannot
    /// be polled without it
    pub require_enhanced_call_status: bool,

    /// Ask gateways supporting it to turn off echo cancelling and noise
    /// reduction
    pub disable_nrec: bool,

    /// Initial value of the audio route switch
    pub audio_route_allowed: bool,

    /// Alternate accept encodings tried once on rejection
    pub accept_retry: AcceptRetryPolicy,
}

impl Default for HfpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            call_poll_interval_ms: 2_000,
            outgoing_call_timeout_ms: 10_000,
            require_enhanced_call_status: true,
            disable_nrec: true,
            audio_route_allowed: true,
            accept_retry: AcceptRetryPolicy::default(),
        }
    }
}

impl HfpClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_poll_interval(&self) -> Duration {
        Duration::from_millis(self.call_poll_interval_ms)
    }

    pub fn outgoing_call_timeout(&self) -> Duration {
        Duration::from_millis(self.outgoing_call_timeout_ms)
    }
}

/// Settings for every profile plus the actor plumbing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub a2dp: A2dpConfig,
    pub hfp_client: HfpClientConfig,
    /// Bounded inbox size of each peer actor
    pub inbox_capacity: usize,
    pub logging: LoggingConfig,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            a2dp: A2dpConfig::default(),
            hfp_client: HfpClientConfig::default(),
            inbox_capacity: 256,
            logging: LoggingConfig::default(),
        }
    }
}

impl ProfileConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> ProfileResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ProfileError::config(format!("Invalid profile configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_a2dp_connect_timeout(mut self, timeout: Duration) -> Self {
        self.a2dp.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_hfp_connect_timeout(mut self, timeout: Duration) -> Self {
        self.hfp_client.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_call_poll_interval(mut self, interval: Duration) -> Self {
        self.hfp_client.call_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_accept_retry(mut self, policy: AcceptRetryPolicy) -> Self {
        self.hfp_client.accept_retry = policy;
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Reject settings that would stall a machine
    pub fn validate(&self) -> ProfileResult<()> {
        if self.a2dp.connect_timeout_ms == 0 || self.hfp_client.connect_timeout_ms == 0 {
            return Err(ProfileError::config("connect timeouts must be non-zero"));
        }
        if self.hfp_client.call_poll_interval_ms == 0 {
            return Err(ProfileError::config("call poll interval must be non-zero"));
        }
        if self.hfp_client.outgoing_call_timeout_ms == 0 {
            return Err(ProfileError::config("outgoing call timeout must be non-zero"));
        }
        if self.inbox_capacity == 0 {
            return Err(ProfileError::config("inbox capacity must be non-zero"));
        }
        self.logging.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hfp::actions::CallAction;

    #[test]
    fn test_defaults() {
        let config = ProfileConfig::default();
        assert_eq!(config.a2dp.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.hfp_client.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.hfp_client.call_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.hfp_client.outgoing_call_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_missing_fields() {
        let config = ProfileConfig::from_json(
            r#"{
                "hfp_client": {
                    "call_poll_interval_ms": 500,
                    "accept_retry": { "incoming": null, "waiting": "Answer" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.hfp_client.call_poll_interval(), Duration::from_millis(500));
        assert_eq!(config.hfp_client.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.hfp_client.accept_retry.incoming, None);
        assert_eq!(config.hfp_client.accept_retry.waiting, Some(CallAction::Answer));
        assert_eq!(config.a2dp, A2dpConfig::default());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            ProfileConfig::from_json("{ not json"),
            Err(ProfileError::Configuration { .. })
        ));
        assert!(ProfileConfig::from_json(r#"{ "inbox_capacity": 0 }"#).is_err());
        assert!(ProfileConfig::new()
            .with_call_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ProfileConfig::from_json(r#"{ "logging": { "filter": "btaudio_profile_core=loud" } }"#).is_err());
    }

    #[test]
    fn test_logging_section() {
        let config = ProfileConfig::from_json(r#"{ "logging": { "json": true } }"#).unwrap();
        assert!(config.logging.json);
        assert_eq!(config.logging.filter, LoggingConfig::default().filter);
    }
}
