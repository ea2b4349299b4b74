//! A2DP source session
//!
//! Tracks the stream state and the codec the peer negotiated, and turns codec
//! preference requests into preference lists for the transport.

use std::convert::Infallible;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::{CodecConfig, CodecNegotiator, CodecStatus, PreferenceDecision};
use crate::config::A2dpConfig;
use crate::correlator::{CommandCorrelator, CorrelatorStats};
use crate::errors::{ProfileError, ProfileResult};
use crate::events::{AudioRouteUpdate, CommandOutcome, ProfileEvent, StackEvent};
use crate::state_machine::{ProfileSession, SessionContext};
use crate::transport::ProfileCommand;
use crate::types::{AudioState, ProfileKind};

/// Local requests accepted while connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum A2dpRequest {
    SetCodecPreference(CodecConfig),
    EnableOptionalCodecs,
    DisableOptionalCodecs,
}

/// Tag of a preference list outstanding in the correlator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum A2dpAction {
    SetCodecPreference(Vec<CodecConfig>),
    EnableOptionalCodecs(Vec<CodecConfig>),
    DisableOptionalCodecs(Vec<CodecConfig>),
}

impl A2dpAction {
    pub fn command(&self) -> ProfileCommand {
        let configs = match self {
            A2dpAction::SetCodecPreference(configs)
            | A2dpAction::EnableOptionalCodecs(configs)
            | A2dpAction::DisableOptionalCodecs(configs) => configs.clone(),
        };
        ProfileCommand::SetCodecPreference { configs }
    }
}

/// Streaming source side of one sink peer
#[derive(Debug)]
pub struct A2dpSession {
    config: A2dpConfig,
    negotiator: CodecNegotiator,
    correlator: CommandCorrelator<A2dpAction>,
    codec_status: Option<CodecStatus>,
    playing: bool,
}

impl A2dpSession {
    pub fn new(config: A2dpConfig) -> Self {
        Self {
            config,
            negotiator: CodecNegotiator::new(),
            correlator: CommandCorrelator::new(),
            codec_status: None,
            playing: false,
        }
    }

    /// Last codec status reported by the peer
    pub fn codec_status(&self) -> Option<&CodecStatus> {
        self.codec_status.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn negotiator(&self) -> &CodecNegotiator {
        &self.negotiator
    }

    pub fn correlator_stats(&self) -> CorrelatorStats {
        self.correlator.stats()
    }

    fn issue(&mut self, action: A2dpAction, ctx: &SessionContext<'_, Self>) -> ProfileResult<()> {
        self.correlator.issue(action, ctx.now(), |action| ctx.issue(&action.command()))
    }

    fn on_codec_config_changed(&mut self, status: CodecStatus, ctx: &SessionContext<'_, Self>) {
        let previous = self.codec_status.as_ref().map(|status| &status.config);
        let reconfigure = CodecNegotiator::requires_audio_reconfiguration(previous, &status.config);
        info!("{}: codec now {}", ctx.peer(), status.config);

        ctx.notify(ProfileEvent::CodecConfigChanged {
            peer: ctx.peer(),
            status: status.clone(),
        });
        if reconfigure {
            ctx.notify(ProfileEvent::AudioRoute {
                peer: ctx.peer(),
                update: AudioRouteUpdate::A2dpReconfigure {
                    config: status.config.clone(),
                },
            });
        }
        self.codec_status = Some(status);
    }

    fn on_command_result(
        &mut self,
        outcome: CommandOutcome,
        code: Option<u32>,
        ctx: &SessionContext<'_, Self>,
    ) -> ProfileResult<()> {
        let Some(pending) = self.correlator.on_command_result() else {
            return Ok(());
        };
        if !outcome.is_ok() {
            warn!("{}: {:?} failed with {:?}", ctx.peer(), pending.action, outcome);
            ctx.notify(ProfileEvent::CommandResult {
                peer: ctx.peer(),
                profile: ProfileKind::A2dp,
                outcome,
                code,
            });
        }
        Ok(())
    }

    fn set_codec_preference(&mut self, config: CodecConfig, ctx: &SessionContext<'_, Self>) -> ProfileResult<()> {
        match self.negotiator.apply_preference(&config, self.codec_status.as_ref()) {
            PreferenceDecision::Apply(configs) => self.issue(A2dpAction::SetCodecPreference(configs), ctx),
            PreferenceDecision::Unchanged => Ok(()),
            PreferenceDecision::NegotiationIncomplete => {
                Err(ProfileError::codec_rejected("codec negotiation incomplete"))
            }
            PreferenceDecision::NotSelectable => Err(ProfileError::codec_rejected(format!(
                "{} is not selectable",
                config
            ))),
        }
    }
}

impl ProfileSession for A2dpSession {
    type Request = A2dpRequest;
    type Timer = Infallible;

    fn profile(&self) -> ProfileKind {
        ProfileKind::A2dp
    }

    fn connect_timeout(&self) -> Duration {
        self.config.connect_timeout()
    }

    fn on_connected(&mut self, ctx: &mut SessionContext<'_, Self>) {
        self.playing = false;
        ctx.notify(ProfileEvent::PlayingStateChanged {
            peer: ctx.peer(),
            playing: false,
        });
    }

    fn on_disconnected(&mut self, ctx: &mut SessionContext<'_, Self>) {
        let dropped = self.correlator.clear();
        if dropped > 0 {
            debug!("{}: {} preference lists unanswered at disconnect", ctx.peer(), dropped);
        }
        self.codec_status = None;
        self.playing = false;
    }

    fn on_audio_changed(
        &mut self,
        _previous: AudioState,
        current: AudioState,
        _wideband: bool,
        ctx: &mut SessionContext<'_, Self>,
    ) {
        let playing = current == AudioState::AudioOn;
        if playing == self.playing {
            return;
        }
        self.playing = playing;
        ctx.notify(ProfileEvent::PlayingStateChanged {
            peer: ctx.peer(),
            playing,
        });
    }

    fn handle_event(&mut self, event: StackEvent, ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()> {
        match event {
            StackEvent::CodecConfigChanged {
                config,
                selectable,
                local_capabilities,
            } => {
                self.on_codec_config_changed(CodecStatus::new(config, selectable, local_capabilities), ctx);
                Ok(())
            }
            StackEvent::CommandResult { outcome, code } => self.on_command_result(outcome, code, ctx),
            event => Err(ProfileError::unexpected(ctx.connection_state(), event.name())),
        }
    }

    fn handle_request(&mut self, request: A2dpRequest, ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()> {
        let current = self.codec_status.as_ref().map(|status| &status.config);
        match request {
            A2dpRequest::SetCodecPreference(config) => self.set_codec_preference(config, ctx),
            A2dpRequest::EnableOptionalCodecs => {
                let table = ctx.preferences().codec_priorities();
                match self.negotiator.enable_optional(&table, current) {
                    Some(configs) => self.issue(A2dpAction::EnableOptionalCodecs(configs), ctx),
                    None => Ok(()),
                }
            }
            A2dpRequest::DisableOptionalCodecs => {
                let table = ctx.preferences().codec_priorities();
                match self.negotiator.disable_optional(&table, current) {
                    Some(configs) => self.issue(A2dpAction::DisableOptionalCodecs(configs), ctx),
                    None => Ok(()),
                }
            }
        }
    }

    fn handle_timer(&mut self, timer: Infallible, _ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()> {
        match timer {}
    }
}
