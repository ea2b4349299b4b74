//! A2DP codec configuration values
//!
//! Audio parameters are capability bitmasks: a negotiated configuration has
//! exactly one bit set per field, a peer capability may carry several, and
//! `NONE` means "unspecified".

use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority marking a codec as disabled
pub const CODEC_PRIORITY_DISABLED: i32 = -1;
/// Priority used when the preference table has no usable value
pub const CODEC_PRIORITY_DEFAULT: i32 = 0;
/// Exclusive upper bound of configurable priorities; forced onto the
/// mandatory codec when optional codecs are disabled
pub const CODEC_PRIORITY_HIGHEST: i32 = 1000 * 1000;

/// Source codec types known to the negotiator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum CodecType {
    Sbc = 0,
    Aac = 1,
    Aptx = 2,
    AptxHd = 3,
    Ldac = 4,
}

impl CodecType {
    /// Every codec type, in table order
    pub const ALL: [CodecType; 5] = [
        CodecType::Sbc,
        CodecType::Aac,
        CodecType::Aptx,
        CodecType::AptxHd,
        CodecType::Ldac,
    ];

    /// Baseline codec every peer must support
    pub const MANDATORY: CodecType = CodecType::Sbc;

    pub fn is_mandatory(&self) -> bool {
        *self == Self::MANDATORY
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodecType::Sbc => "SBC",
            CodecType::Aac => "AAC",
            CodecType::Aptx => "aptX",
            CodecType::AptxHd => "aptX HD",
            CodecType::Ldac => "LDAC",
        };
        write!(f, "{}", name)
    }
}

/// Sample rate bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SampleRate(pub u32);

impl SampleRate {
    pub const NONE: Self = Self(0);
    pub const HZ_44100: Self = Self(0x01);
    pub const HZ_48000: Self = Self(0x02);
    pub const HZ_88200: Self = Self(0x04);
    pub const HZ_96000: Self = Self(0x08);
    pub const HZ_176400: Self = Self(0x10);
    pub const HZ_192000: Self = Self(0x20);
}

/// Bits per sample bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BitsPerSample(pub u32);

impl BitsPerSample {
    pub const NONE: Self = Self(0);
    pub const BITS_16: Self = Self(0x01);
    pub const BITS_24: Self = Self(0x02);
    pub const BITS_32: Self = Self(0x04);
}

/// Channel mode bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChannelMode(pub u32);

impl ChannelMode {
    pub const NONE: Self = Self(0);
    pub const MONO: Self = Self(0x01);
    pub const STEREO: Self = Self(0x02);
}

macro_rules! bitmask_ops {
    ($($ty:ty),*) => {$(
        impl $ty {
            pub fn is_none(&self) -> bool {
                self.0 == 0
            }

            /// True when the masks share at least one bit
            pub fn intersects(&self, other: Self) -> bool {
                self.0 & other.0 != 0
            }
        }

        impl std::ops::BitOr for $ty {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    )*};
}

bitmask_ops!(SampleRate, BitsPerSample, ChannelMode);

/// One codec configuration, either a capability or the active choice
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodecConfig {
    pub codec_type: CodecType,
    /// Ordinal priority, higher wins
    pub priority: i32,
    pub sample_rate: SampleRate,
    pub bits_per_sample: BitsPerSample,
    pub channel_mode: ChannelMode,
    /// Opaque codec-specific parameters
    pub codec_specific: [i64; 4],
}

impl CodecConfig {
    /// Configuration with zeroed audio parameters
    pub fn new(codec_type: CodecType, priority: i32) -> Self {
        Self {
            codec_type,
            priority,
            sample_rate: SampleRate::NONE,
            bits_per_sample: BitsPerSample::NONE,
            channel_mode: ChannelMode::NONE,
            codec_specific: [0; 4],
        }
    }

    pub fn with_audio(
        mut self,
        sample_rate: SampleRate,
        bits_per_sample: BitsPerSample,
        channel_mode: ChannelMode,
    ) -> Self {
        self.sample_rate = sample_rate;
        self.bits_per_sample = bits_per_sample;
        self.channel_mode = channel_mode;
        self
    }

    pub fn with_codec_specific(mut self, codec_specific: [i64; 4]) -> Self {
        self.codec_specific = codec_specific;
        self
    }

    pub fn is_mandatory(&self) -> bool {
        self.codec_type.is_mandatory()
    }

    /// Same sample rate, bit depth and channel mode
    pub fn same_audio_feeding_parameters(&self, other: &CodecConfig) -> bool {
        self.sample_rate == other.sample_rate
            && self.bits_per_sample == other.bits_per_sample
            && self.channel_mode == other.channel_mode
    }

    /// Same codec type and audio feeding parameters, where an unspecified
    /// field on either side counts as matching
    pub fn similar_feeding_parameters(&self, other: &CodecConfig) -> bool {
        if self.codec_type != other.codec_type {
            return false;
        }
        let sample_rate = if self.sample_rate.is_none() || other.sample_rate.is_none() {
            self.sample_rate
        } else {
            other.sample_rate
        };
        let bits_per_sample = if self.bits_per_sample.is_none() || other.bits_per_sample.is_none() {
            self.bits_per_sample
        } else {
            other.bits_per_sample
        };
        let channel_mode = if self.channel_mode.is_none() || other.channel_mode.is_none() {
            self.channel_mode
        } else {
            other.channel_mode
        };
        self.sample_rate == sample_rate
            && self.bits_per_sample == bits_per_sample
            && self.channel_mode == channel_mode
    }

    /// Same codec type and opaque codec-specific parameters
    pub fn same_codec_specific_parameters(&self, other: &CodecConfig) -> bool {
        self.codec_type == other.codec_type && self.codec_specific == other.codec_specific
    }
}

impl fmt::Display for CodecConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (priority {}, rate {:#x}, bits {:#x}, channels {:#x})",
            self.codec_type,
            self.priority,
            self.sample_rate.0,
            self.bits_per_sample.0,
            self.channel_mode.0
        )
    }
}

/// Active configuration plus what the peer and the local side can do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecStatus {
    pub config: CodecConfig,
    /// Capabilities both sides agree on
    pub selectable: Vec<CodecConfig>,
    pub local_capabilities: Vec<CodecConfig>,
}

impl CodecStatus {
    pub fn new(
        config: CodecConfig,
        selectable: Vec<CodecConfig>,
        local_capabilities: Vec<CodecConfig>,
    ) -> Self {
        Self {
            config,
            selectable,
            local_capabilities,
        }
    }

    /// Negotiation is complete once the mandatory codec is selectable
    pub fn is_mandatory_selectable(&self) -> bool {
        self.selectable.iter().any(CodecConfig::is_mandatory)
    }

    /// Whether some selectable capability covers `config`
    pub fn is_selectable(&self, config: &CodecConfig) -> bool {
        self.selectable.iter().any(|capability| {
            capability.codec_type == config.codec_type
                && (config.sample_rate.is_none() || config.sample_rate.intersects(capability.sample_rate))
                && (config.bits_per_sample.is_none()
                    || config.bits_per_sample.intersects(capability.bits_per_sample))
                && (config.channel_mode.is_none() || config.channel_mode.intersects(capability.channel_mode))
        })
    }
}
