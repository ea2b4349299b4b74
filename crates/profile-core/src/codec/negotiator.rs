//! Codec selection and preference application for A2DP sessions

use std::collections::HashMap;

use tracing::{debug, warn};

use super::config::{
    CodecConfig, CodecStatus, CodecType, CODEC_PRIORITY_DEFAULT, CODEC_PRIORITY_DISABLED,
    CODEC_PRIORITY_HIGHEST,
};

/// Configured per-codec priorities, as held by the preference store
pub type CodecPriorityTable = HashMap<CodecType, i32>;

/// Outcome of applying a codec preference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreferenceDecision {
    /// Send this preference list to the transport
    Apply(Vec<CodecConfig>),
    /// Active codec already satisfies the preference
    Unchanged,
    /// Mandatory codec not yet selectable
    NegotiationIncomplete,
    /// Peer cannot use the requested configuration
    NotSelectable,
}

/// Builds codec priority lists and decides when a preference changes anything
#[derive(Debug, Clone, Default)]
pub struct CodecNegotiator {
    assigned: Vec<CodecConfig>,
}

impl CodecNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Priorities assigned by the last table build
    pub fn assigned(&self) -> &[CodecConfig] {
        &self.assigned
    }

    /// One configuration per known codec type, priorities taken from `table`
    ///
    /// Values outside `[DISABLED, HIGHEST)` fall back to the default
    /// priority. Audio parameters stay zeroed until the peer negotiates them.
    pub fn build_priorities(table: &CodecPriorityTable) -> Vec<CodecConfig> {
        CodecType::ALL
            .iter()
            .map(|codec_type| {
                let priority = match table.get(codec_type) {
                    Some(&value) if (CODEC_PRIORITY_DISABLED..CODEC_PRIORITY_HIGHEST).contains(&value) => value,
                    _ => CODEC_PRIORITY_DEFAULT,
                };
                CodecConfig::new(*codec_type, priority)
            })
            .collect()
    }

    /// Highest priority codec type among `candidate` and `selectable`
    ///
    /// On a priority tie the `active` codec wins; otherwise the earlier
    /// entry (the candidate first) is kept.
    pub fn select_preferred(
        candidate: &CodecConfig,
        selectable: &[CodecConfig],
        active: Option<CodecType>,
    ) -> CodecType {
        let mut best = candidate;
        for config in selectable {
            let ties_to_active = config.priority == best.priority
                && active == Some(config.codec_type)
                && active != Some(best.codec_type);
            if config.priority > best.priority || ties_to_active {
                best = config;
            }
        }
        best.codec_type
    }

    /// Decide whether `new_config` should be sent to the peer
    pub fn apply_preference(
        &self,
        new_config: &CodecConfig,
        status: Option<&CodecStatus>,
    ) -> PreferenceDecision {
        let Some(status) = status else {
            debug!("No codec status yet, cannot apply {}", new_config);
            return PreferenceDecision::NegotiationIncomplete;
        };
        if !status.is_mandatory_selectable() {
            debug!("Mandatory codec not selectable, negotiation incomplete");
            return PreferenceDecision::NegotiationIncomplete;
        }
        if !status.is_selectable(new_config) {
            warn!("Codec preference {} is not selectable", new_config);
            return PreferenceDecision::NotSelectable;
        }

        let current = &status.config;
        let preferred =
            Self::select_preferred(new_config, &status.selectable, Some(current.codec_type));
        let unchanged = preferred == current.codec_type
            && (preferred != new_config.codec_type
                || (current.similar_feeding_parameters(new_config)
                    && current.same_codec_specific_parameters(new_config)));
        if unchanged {
            debug!("Codec preference {} leaves active {} unchanged", new_config, current);
            return PreferenceDecision::Unchanged;
        }

        PreferenceDecision::Apply(vec![new_config.clone()])
    }

    /// Preference list re-enabling optional codecs, or `None` when an
    /// optional codec is already active
    pub fn enable_optional(
        &mut self,
        table: &CodecPriorityTable,
        current: Option<&CodecConfig>,
    ) -> Option<Vec<CodecConfig>> {
        if current.is_some_and(|config| !config.is_mandatory()) {
            debug!("Optional codec already active");
            return None;
        }
        self.assigned = Self::build_priorities(table);
        Some(
            self.assigned
                .iter()
                .filter(|config| !config.is_mandatory())
                .cloned()
                .collect(),
        )
    }

    /// Preference list pinning the mandatory codec, or `None` when it is
    /// already active
    pub fn disable_optional(
        &mut self,
        table: &CodecPriorityTable,
        current: Option<&CodecConfig>,
    ) -> Option<Vec<CodecConfig>> {
        if current.is_some_and(CodecConfig::is_mandatory) {
            debug!("Mandatory codec already active");
            return None;
        }
        self.assigned = Self::build_priorities(table);
        for config in self.assigned.iter_mut().filter(|config| config.is_mandatory()) {
            config.priority = CODEC_PRIORITY_HIGHEST;
        }
        Some(
            self.assigned
                .iter()
                .filter(|config| config.is_mandatory())
                .cloned()
                .collect(),
        )
    }

    /// A new active configuration needs audio rerouting when its feeding
    /// parameters differ from the previous one
    pub fn requires_audio_reconfiguration(previous: Option<&CodecConfig>, new_config: &CodecConfig) -> bool {
        previous.is_none_or(|previous| !previous.same_audio_feeding_parameters(new_config))
    }
}
