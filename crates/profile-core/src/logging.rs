//! Subscriber setup and per-peer spans
//!
//! The machines only emit `tracing` events. Each peer actor runs inside a
//! [`peer_span`] so every line it logs carries the peer address and the
//! profile. Installing a subscriber is the embedder's call; [`setup_logging`]
//! installs the `fmt` subscriber driven by a [`LoggingConfig`], with
//! `RUST_LOG` taking precedence over the configured filter.

use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{ProfileError, ProfileResult};
use crate::types::{PeerId, ProfileKind};

/// Subscriber settings, carried in [`ProfileConfig`](crate::config::ProfileConfig)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: String,
    /// One JSON object per line
    pub json: bool,
    /// Log when a peer actor span opens and closes
    pub peer_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "btaudio_profile_core=info".to_string(),
            json: false,
            peer_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_peer_spans(mut self) -> Self {
        self.peer_spans = true;
        self
    }

    pub fn validate(&self) -> ProfileResult<()> {
        self.env_filter().map(|_| ())
    }

    fn env_filter(&self) -> ProfileResult<EnvFilter> {
        EnvFilter::try_new(&self.filter)
            .map_err(|e| ProfileError::config(format!("Invalid log filter '{}': {}", self.filter, e)))
    }

    fn span_events(&self) -> FmtSpan {
        if self.peer_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber
///
/// Fails if the filter does not parse or a global subscriber is already set.
pub fn setup_logging(config: &LoggingConfig) -> ProfileResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config.env_filter()?,
    };
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(config.span_events());

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ProfileError::config(format!("Failed to install subscriber: {}", e)))
}

/// Subscriber writing through the test harness capture
///
/// Safe to call from every test; only the first call installs anything.
pub fn setup_test_logging(config: &LoggingConfig) {
    let Ok(filter) = config.env_filter() else {
        return;
    };
    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(config.span_events())
        .with_test_writer()
        .try_init();
}

/// Span wrapping everything one peer actor does
pub fn peer_span(peer: PeerId, profile: ProfileKind) -> Span {
    tracing::info_span!("peer", %peer, %profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_is_validated() {
        assert!(LoggingConfig::default().validate().is_ok());
        assert!(LoggingConfig::default()
            .with_filter("btaudio_profile_core=debug,tokio=warn")
            .validate()
            .is_ok());
        assert!(matches!(
            LoggingConfig::default().with_filter("btaudio_profile_core=loud").validate(),
            Err(ProfileError::Configuration { .. })
        ));
    }

    #[test]
    fn test_peer_spans_toggle_span_events() {
        assert_eq!(LoggingConfig::default().span_events(), FmtSpan::NONE);
        let config = LoggingConfig::default().with_peer_spans().with_json();
        assert_eq!(config.span_events(), FmtSpan::NEW | FmtSpan::CLOSE);
        assert!(config.json);
    }

    #[test]
    fn test_second_install_fails() {
        let config = LoggingConfig::default();
        setup_test_logging(&config);
        assert!(matches!(
            setup_logging(&config),
            Err(ProfileError::Configuration { .. })
        ));
    }
}
