//! A2DP codec configuration and negotiation
//!
//! - **config** - codec types, capability bitmasks, `CodecConfig` and `CodecStatus`
//! - **negotiator** - priority tables, preferred codec selection and the
//!   decision whether a preference is worth sending to the peer

pub mod config;
pub mod negotiator;

pub use config::{
    BitsPerSample, ChannelMode, CodecConfig, CodecStatus, CodecType, SampleRate,
    CODEC_PRIORITY_DEFAULT, CODEC_PRIORITY_DISABLED, CODEC_PRIORITY_HIGHEST,
};
pub use negotiator::{CodecNegotiator, CodecPriorityTable, PreferenceDecision};
