//! # Profile-Core: Bluetooth Audio Profile State Machines
//!
//! This library holds the per-peer connection and session logic of two
//! Bluetooth audio profiles: A2DP streaming (local device as source) and the
//! Handsfree profile client (local device as handsfree unit). The transport
//! binding, the preference store and notification delivery are collaborators
//! passed in through traits.
//!
//! ## Features
//!
//! - **Connection state machine**: Disconnected, Connecting, Connected and
//!   Disconnecting with an audio sub-state, bounded by timers, with deferred
//!   connect requests replayed on the next stable state
//! - **Command correlation**: FIFO matching of issued commands to the
//!   results the peer reports later
//! - **Call reconciliation**: polled current call lists diffed against the
//!   local roster, including locally dialed calls awaiting an index
//! - **Codec negotiation**: priority tables, preferred codec selection and
//!   audio reconfiguration detection
//! - **Actors**: one tokio task per peer, routed through a `DashMap` registry
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use btaudio_profile_core::prelude::*;
//!
//! # async fn run(transport: Arc<dyn ProfileTransport>) -> ProfileResult<()> {
//! let config = ProfileConfig::from_json(r#"{ "logging": { "filter": "btaudio_profile_core=debug" } }"#)?;
//! btaudio_profile_core::logging::setup_logging(&config.logging)?;
//!
//! let sink = Arc::new(BroadcastSink::default());
//! let mut events = sink.subscribe();
//!
//! let registry = PeerRegistry::hfp_client(
//!     &config,
//!     transport,
//!     Arc::new(InMemoryPreferences::new()),
//!     sink,
//! );
//!
//! let gateway: PeerId = "00:1A:7D:DA:71:13".parse()?;
//! registry.connect(gateway).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ProfileEvent::CallChanged { call, .. } = event {
//!         println!("call {} is {:?}", call.index, call.state);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod a2dp;
pub mod actor;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod errors;
pub mod events;
pub mod hfp;
pub mod logging;
pub mod policy;
pub mod preferences;
pub mod registry;
pub mod sink;
pub mod state_machine;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use a2dp::{A2dpRequest, A2dpSession};
pub use actor::{PeerActor, PeerHandle};
pub use codec::{CodecConfig, CodecNegotiator, CodecStatus, CodecType};
pub use config::{A2dpConfig, HfpClientConfig, ProfileConfig};
pub use correlator::CommandCorrelator;
pub use errors::{ProfileError, ProfileResult};
pub use events::{ProfileEvent, StackEvent};
pub use hfp::{HfpClientSession, HfpRequest};
pub use registry::PeerRegistry;
pub use state_machine::{ConnectionStateMachine, Message, ProfileSession};
pub use types::{AudioState, ConnectionState, PeerId, ProfileKind};

/// Version information for the profile core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything an embedder usually needs
pub mod prelude {
    pub use crate::a2dp::{A2dpRequest, A2dpSession};
    pub use crate::actor::{PeerActor, PeerHandle};
    pub use crate::codec::{CodecConfig, CodecStatus, CodecType};
    pub use crate::config::{A2dpConfig, HfpClientConfig, ProfileConfig};
    pub use crate::errors::{ProfileError, ProfileResult};
    pub use crate::events::{
        AudioRouteUpdate, CommandOutcome, PeerCapabilities, PeerInfo, ProfileEvent, RawAudioState,
        RawConnectionState, StackEvent,
    };
    pub use crate::hfp::{AcceptMode, Call, CallState, HfpClientSession, HfpRequest};
    pub use crate::preferences::{InMemoryPreferences, PreferenceStore};
    pub use crate::registry::PeerRegistry;
    pub use crate::sink::{BroadcastSink, EventSink};
    pub use crate::state_machine::{ConnectionStateMachine, Message, ProfileSession};
    pub use crate::transport::{ProfileCommand, ProfileTransport};
    pub use crate::types::{AudioState, CommandStatus, ConnectionPriority, ConnectionState, PeerId, ProfileKind};
}
