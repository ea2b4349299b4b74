//! Handsfree client session
//!
//! Runs while the service level connection is up. It keeps the call roster in
//! step with the gateway by polling the current call list, picks the call
//! control action for each local request, and republishes gateway indicators.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::actions::{
    accept_action, explicit_transfer_action, hold_action, private_mode_action, reject_action,
    terminate_action, AcceptMode, CallAction, HfpAction,
};
use super::call::{Call, CallRoster, CallState};
use super::reconciler::CallReconciler;
use crate::config::HfpClientConfig;
use crate::correlator::{CommandCorrelator, CorrelatorStats};
use crate::errors::{ProfileError, ProfileResult};
use crate::events::{
    AudioRouteUpdate, CommandOutcome, NetworkIndicatorKind, PeerCapabilities, PeerInfo, ProfileEvent,
    StackEvent, VolumeChannel,
};
use crate::state_machine::{ProfileSession, SessionContext};
use crate::types::{AudioState, ProfileKind};

/// Highest speaker or microphone gain
pub const MAX_VOLUME: u8 = 15;

const NARROWBAND_SAMPLE_RATE_HZ: u32 = 8_000;
const WIDEBAND_SAMPLE_RATE_HZ: u32 = 16_000;

/// Local requests accepted while the service level connection is up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HfpRequest {
    Dial { number: String },
    Accept(AcceptMode),
    Reject,
    Hold,
    /// End the ongoing call, or only the active call at `index`
    Terminate { index: Option<u32> },
    EnterPrivateMode { index: u32 },
    ExplicitCallTransfer,
    SendDtmf(char),
    StartVoiceRecognition,
    StopVoiceRecognition,
    SetSpeakerVolume(u8),
    SetMicVolume(u8),
    SetAudioRouteAllowed(bool),
    QueryCurrentCalls,
    QueryOperatorName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HfpTimer {
    PollCurrentCalls,
}

/// Handsfree unit side of one gateway
#[derive(Debug)]
pub struct HfpClientSession {
    config: HfpClientConfig,
    correlator: CommandCorrelator<HfpAction>,
    reconciler: CallReconciler,
    capabilities: PeerCapabilities,
    next_query_at: Option<Instant>,
    operator_name: Option<String>,
    subscriber_number: Option<String>,
    network_service: bool,
    voice_recognition: bool,
    in_band_ring: bool,
    audio_route_allowed: bool,
    audio_routed: bool,
    speaker_from_peer: bool,
    mic_from_peer: bool,
}

impl HfpClientSession {
    pub fn new(config: HfpClientConfig) -> Self {
        let reconciler = CallReconciler::new(config.outgoing_call_timeout());
        let audio_route_allowed = config.audio_route_allowed;
        Self {
            config,
            correlator: CommandCorrelator::new(),
            reconciler,
            capabilities: PeerCapabilities::default(),
            next_query_at: None,
            operator_name: None,
            subscriber_number: None,
            network_service: false,
            voice_recognition: false,
            in_band_ring: false,
            audio_route_allowed,
            audio_routed: false,
            speaker_from_peer: false,
            mic_from_peer: false,
        }
    }

    pub fn roster(&self) -> &CallRoster {
        self.reconciler.roster()
    }

    pub fn capabilities(&self) -> PeerCapabilities {
        self.capabilities
    }

    pub fn operator_name(&self) -> Option<&str> {
        self.operator_name.as_deref()
    }

    pub fn subscriber_number(&self) -> Option<&str> {
        self.subscriber_number.as_deref()
    }

    pub fn network_service(&self) -> bool {
        self.network_service
    }

    pub fn is_voice_recognition_active(&self) -> bool {
        self.voice_recognition
    }

    pub fn is_in_band_ring(&self) -> bool {
        self.in_band_ring
    }

    pub fn is_audio_route_allowed(&self) -> bool {
        self.audio_route_allowed
    }

    /// Actions issued and still waiting for their result
    pub fn pending_actions(&self) -> impl Iterator<Item = &HfpAction> {
        self.correlator.iter().map(|pending| &pending.action)
    }

    pub fn correlator_stats(&self) -> CorrelatorStats {
        self.correlator.stats()
    }

    fn issue(&mut self, action: HfpAction, ctx: &SessionContext<'_, Self>) -> ProfileResult<()> {
        self.correlator.issue(action, ctx.now(), |action| ctx.issue(&action.command()))
    }

    fn notify_call_changes(&self, calls: Vec<Call>, ctx: &SessionContext<'_, Self>) {
        for call in calls {
            debug!("{}: call {} now {:?}", ctx.peer(), call.index, call.state);
            ctx.notify(ProfileEvent::CallChanged { peer: ctx.peer(), call });
        }
    }

    fn notify_info(&self, info: PeerInfo, ctx: &SessionContext<'_, Self>) {
        ctx.notify(ProfileEvent::PeerInfo { peer: ctx.peer(), info });
    }

    /// Ask for the current call list, at most once per poll interval
    fn query_current_calls(&mut self, ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()> {
        ctx.cancel(&HfpTimer::PollCurrentCalls);
        let now = ctx.now();

        if self
            .correlator
            .iter()
            .any(|pending| pending.action == HfpAction::QueryCurrentCalls)
        {
            debug!("{}: call list query already outstanding", ctx.peer());
            ctx.schedule(HfpTimer::PollCurrentCalls, self.config.call_poll_interval());
            return Ok(());
        }
        if let Some(at) = self.next_query_at.filter(|at| now < *at) {
            debug!("{}: call list query throttled", ctx.peer());
            ctx.schedule(HfpTimer::PollCurrentCalls, at.saturating_duration_since(now));
            return Ok(());
        }

        self.next_query_at = Some(now + self.config.call_poll_interval());
        self.reconciler.begin_pass();
        self.issue(HfpAction::QueryCurrentCalls, ctx)
    }

    fn surface_result(&self, outcome: CommandOutcome, code: Option<u32>, ctx: &SessionContext<'_, Self>) {
        ctx.notify(ProfileEvent::CommandResult {
            peer: ctx.peer(),
            profile: ProfileKind::HandsfreeClient,
            outcome,
            code,
        });
    }

    fn on_command_result(
        &mut self,
        outcome: CommandOutcome,
        code: Option<u32>,
        ctx: &mut SessionContext<'_, Self>,
    ) -> ProfileResult<()> {
        let Some(pending) = self.correlator.on_command_result() else {
            return Ok(());
        };
        debug!(
            "{}: {:?} answered {:?} after {:?}",
            ctx.peer(),
            pending.action,
            outcome,
            ctx.now().saturating_duration_since(pending.issued_at)
        );

        match pending.action {
            HfpAction::Accept { action, mode, retried } => {
                if outcome.is_ok() {
                    return Ok(());
                }
                let roster = self.reconciler.roster();
                if !retried && !roster.has_state(CallState::Active) {
                    if let Some(fallback) = self.config.accept_retry.fallback_for(action, roster) {
                        info!("{}: {} refused, retrying as {}", ctx.peer(), action, fallback);
                        return self.issue(
                            HfpAction::Accept {
                                action: fallback,
                                mode,
                                retried: true,
                            },
                            ctx,
                        );
                    }
                }
                self.surface_result(outcome, code, ctx);
                if retried {
                    return Err(ProfileError::RetryExhausted {
                        action: format!("accept ({})", action),
                    });
                }
                Ok(())
            }
            HfpAction::Dial { number } => {
                if !outcome.is_ok() {
                    warn!("{}: dialing {} failed with {:?}", ctx.peer(), number, outcome);
                    if let Some(call) = self.reconciler.abandon_dial() {
                        self.notify_call_changes(vec![call], ctx);
                    }
                    self.surface_result(outcome, code, ctx);
                }
                Ok(())
            }
            HfpAction::Reject(_)
            | HfpAction::Hold(_)
            | HfpAction::Terminate(_)
            | HfpAction::EnterPrivateMode(_)
            | HfpAction::ExplicitTransfer
            | HfpAction::SendDtmf(_) => {
                if !outcome.is_ok() {
                    self.surface_result(outcome, code, ctx);
                }
                Ok(())
            }
            HfpAction::DisableNrec => {
                if !outcome.is_ok() {
                    warn!("{}: gateway kept echo cancelling and noise reduction on", ctx.peer());
                }
                Ok(())
            }
            HfpAction::SetVolume { .. } | HfpAction::SubscriberInfo | HfpAction::QueryOperatorName => Ok(()),
            action @ (HfpAction::StartVoiceRecognition | HfpAction::StopVoiceRecognition) => {
                let active = action == HfpAction::StartVoiceRecognition;
                if outcome.is_ok() && self.voice_recognition != active {
                    self.voice_recognition = active;
                    self.notify_info(PeerInfo::VoiceRecognition(active), ctx);
                } else if !outcome.is_ok() {
                    self.surface_result(outcome, code, ctx);
                }
                Ok(())
            }
            HfpAction::QueryCurrentCalls => self.finish_call_query(ctx),
        }
    }

    fn finish_call_query(&mut self, ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()> {
        let pass = self.reconciler.complete_pass(ctx.now());

        if let Some(age) = pass.stuck_dial {
            if let Err(error) = self.issue(HfpAction::Terminate(CallAction::HangUp), ctx) {
                warn!("{}: could not terminate stuck dial: {}", ctx.peer(), error);
            }
            self.notify_call_changes(pass.changed, ctx);
            ctx.cancel(&HfpTimer::PollCurrentCalls);
            return Err(ProfileError::StuckOutgoingCall { age });
        }

        self.notify_call_changes(pass.changed, ctx);
        if pass.poll_again {
            if !ctx.is_scheduled(&HfpTimer::PollCurrentCalls) {
                ctx.schedule(HfpTimer::PollCurrentCalls, self.config.call_poll_interval());
            }
        } else {
            ctx.cancel(&HfpTimer::PollCurrentCalls);
        }
        Ok(())
    }

    fn on_network_indicator(
        &mut self,
        kind: NetworkIndicatorKind,
        value: u32,
        ctx: &mut SessionContext<'_, Self>,
    ) -> ProfileResult<()> {
        match kind {
            NetworkIndicatorKind::ServiceAvailable => {
                let available = value != 0;
                self.network_service = available;
                self.notify_info(PeerInfo::NetworkService(available), ctx);
                if available {
                    return self.issue(HfpAction::QueryOperatorName, ctx);
                }
                if self.operator_name.take().is_some() {
                    self.notify_info(PeerInfo::OperatorName(None), ctx);
                }
            }
            NetworkIndicatorKind::Roaming => self.notify_info(PeerInfo::Roaming(value != 0), ctx),
            NetworkIndicatorKind::SignalStrength => self.notify_info(PeerInfo::SignalStrength(value), ctx),
            NetworkIndicatorKind::BatteryLevel => self.notify_info(PeerInfo::BatteryLevel(value), ctx),
        }
        Ok(())
    }

    fn dial(&mut self, number: String, ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()> {
        if number.trim().is_empty() {
            return Err(ProfileError::invalid_request("cannot dial an empty number"));
        }
        let call = self.reconciler.begin_dial(number.clone(), ctx.now())?;
        info!("{}: dialing {}", ctx.peer(), number);
        self.notify_call_changes(vec![call], ctx);

        if let Err(error) = self.issue(HfpAction::Dial { number }, ctx) {
            if let Some(call) = self.reconciler.abandon_dial() {
                self.notify_call_changes(vec![call], ctx);
            }
            return Err(error);
        }
        self.query_current_calls(ctx)
    }

    fn set_volume(&mut self, channel: VolumeChannel, level: u8, ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()> {
        if level > MAX_VOLUME {
            return Err(ProfileError::invalid_request(format!(
                "volume {} above {}",
                level, MAX_VOLUME
            )));
        }
        let from_peer = match channel {
            VolumeChannel::Speaker => &mut self.speaker_from_peer,
            VolumeChannel::Microphone => &mut self.mic_from_peer,
        };
        if std::mem::take(from_peer) {
            debug!("{}: {:?} volume {} echoes the gateway, not sent", ctx.peer(), channel, level);
            return Ok(());
        }
        self.issue(HfpAction::SetVolume { channel, level }, ctx)
    }

    fn set_voice_recognition(&mut self, active: bool, ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()> {
        if !self.capabilities.has_feature(PeerCapabilities::VOICE_RECOGNITION) {
            return Err(ProfileError::invalid_request("gateway has no voice recognition"));
        }
        if self.voice_recognition == active {
            debug!("{}: voice recognition already {}", ctx.peer(), if active { "on" } else { "off" });
            return Ok(());
        }
        let action = if active {
            HfpAction::StartVoiceRecognition
        } else {
            HfpAction::StopVoiceRecognition
        };
        self.issue(action, ctx)
    }

    fn require_call_hold(&self, flag: u32, operation: &str) -> ProfileResult<()> {
        if self.capabilities.supports_call_hold(flag) {
            Ok(())
        } else {
            Err(ProfileError::invalid_request(format!("gateway does not support {}", operation)))
        }
    }

    fn reset(&mut self) {
        self.next_query_at = None;
        self.operator_name = None;
        self.subscriber_number = None;
        self.network_service = false;
        self.voice_recognition = false;
        self.in_band_ring = false;
        self.audio_routed = false;
        self.speaker_from_peer = false;
        self.mic_from_peer = false;
    }
}

impl ProfileSession for HfpClientSession {
    type Request = HfpRequest;
    type Timer = HfpTimer;

    fn profile(&self) -> ProfileKind {
        ProfileKind::HandsfreeClient
    }

    fn connect_timeout(&self) -> Duration {
        self.config.connect_timeout()
    }

    fn on_link_up(&mut self, capabilities: PeerCapabilities, ctx: &mut SessionContext<'_, Self>) -> bool {
        debug!(
            "{}: gateway features {:#06x}, call hold {:#04x}",
            ctx.peer(),
            capabilities.features,
            capabilities.call_hold
        );
        self.capabilities = capabilities;
        if self.config.require_enhanced_call_status
            && !capabilities.has_feature(PeerCapabilities::ENHANCED_CALL_STATUS)
        {
            warn!("{}: gateway lacks enhanced call status", ctx.peer());
            return false;
        }
        true
    }

    fn on_connected(&mut self, ctx: &mut SessionContext<'_, Self>) {
        if self.config.disable_nrec && self.capabilities.has_feature(PeerCapabilities::ECHO_NOISE_REDUCTION) {
            if let Err(error) = self.issue(HfpAction::DisableNrec, ctx) {
                warn!("{}: {}", ctx.peer(), error);
            }
        }
        if let Err(error) = self.issue(HfpAction::SubscriberInfo, ctx) {
            warn!("{}: {}", ctx.peer(), error);
        }
    }

    fn on_disconnected(&mut self, ctx: &mut SessionContext<'_, Self>) {
        self.correlator.clear();
        let calls = self.reconciler.terminate_all();
        if !calls.is_empty() {
            info!("{}: link lost with {} calls", ctx.peer(), calls.len());
        }
        self.notify_call_changes(calls, ctx);
        self.reset();
    }

    fn on_audio_changed(
        &mut self,
        previous: AudioState,
        current: AudioState,
        wideband: bool,
        ctx: &mut SessionContext<'_, Self>,
    ) {
        if current == AudioState::AudioOn {
            if !self.audio_route_allowed {
                info!("{}: audio routing disallowed, dropping SCO", ctx.peer());
                ctx.request_audio_disconnect();
                return;
            }
            let sample_rate_hz = if wideband {
                WIDEBAND_SAMPLE_RATE_HZ
            } else {
                NARROWBAND_SAMPLE_RATE_HZ
            };
            self.audio_routed = true;
            ctx.notify(ProfileEvent::AudioRoute {
                peer: ctx.peer(),
                update: AudioRouteUpdate::HfpEnabled { sample_rate_hz },
            });
        } else if previous == AudioState::AudioOn && self.audio_routed {
            self.audio_routed = false;
            ctx.notify(ProfileEvent::AudioRoute {
                peer: ctx.peer(),
                update: AudioRouteUpdate::HfpDisabled,
            });
        }
    }

    fn handle_event(&mut self, event: StackEvent, ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()> {
        match event {
            StackEvent::CallIndicator { kind, value } => {
                debug!("{}: indicator {:?} = {}", ctx.peer(), kind, value);
                self.query_current_calls(ctx)
            }
            StackEvent::CallListEntry {
                index,
                direction,
                state,
                multiparty,
                number,
            } => {
                self.reconciler
                    .record_entry(index, direction, state, multiparty, number, ctx.now());
                Ok(())
            }
            StackEvent::CommandResult { outcome, code } => self.on_command_result(outcome, code, ctx),
            StackEvent::NetworkIndicator { kind, value } => self.on_network_indicator(kind, value, ctx),
            StackEvent::VolumeChanged { channel, level } => {
                match channel {
                    VolumeChannel::Speaker => self.speaker_from_peer = true,
                    VolumeChannel::Microphone => self.mic_from_peer = true,
                }
                ctx.notify(ProfileEvent::VolumeChanged {
                    peer: ctx.peer(),
                    channel,
                    level,
                });
                Ok(())
            }
            StackEvent::OperatorName(name) => {
                self.operator_name = Some(name.clone());
                self.notify_info(PeerInfo::OperatorName(Some(name)), ctx);
                Ok(())
            }
            StackEvent::SubscriberInfo(number) => {
                self.subscriber_number = Some(number.clone());
                self.notify_info(PeerInfo::SubscriberNumber(number), ctx);
                Ok(())
            }
            StackEvent::VoiceRecognitionChanged { active } => {
                self.voice_recognition = active;
                self.notify_info(PeerInfo::VoiceRecognition(active), ctx);
                Ok(())
            }
            StackEvent::InBandRingChanged { enabled } => {
                self.in_band_ring = enabled;
                self.notify_info(PeerInfo::InBandRing(enabled), ctx);
                Ok(())
            }
            event @ (StackEvent::CodecConfigChanged { .. }
            | StackEvent::ConnectionChanged { .. }
            | StackEvent::AudioChanged { .. }) => {
                Err(ProfileError::unexpected(ctx.connection_state(), event.name()))
            }
        }
    }

    fn handle_request(&mut self, request: HfpRequest, ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()> {
        match request {
            HfpRequest::Dial { number } => self.dial(number, ctx),
            HfpRequest::Accept(mode) => {
                let action = accept_action(self.reconciler.roster(), mode).ok_or_else(|| ProfileError::no_matching_call("accept"))?;
                self.issue(
                    HfpAction::Accept {
                        action,
                        mode,
                        retried: false,
                    },
                    ctx,
                )
            }
            HfpRequest::Reject => {
                let action = reject_action(self.reconciler.roster()).ok_or_else(|| ProfileError::no_matching_call("reject"))?;
                self.issue(HfpAction::Reject(action), ctx)
            }
            HfpRequest::Hold => {
                let action = hold_action(self.reconciler.roster()).ok_or_else(|| ProfileError::no_matching_call("hold"))?;
                self.issue(HfpAction::Hold(action), ctx)
            }
            HfpRequest::Terminate { index } => {
                if index.is_some() {
                    self.require_call_hold(PeerCapabilities::CHLD_RELEASE_SPECIFIC, "releasing a specific call")?;
                }
                let action = terminate_action(self.reconciler.roster(), index)
                    .ok_or_else(|| ProfileError::no_matching_call("terminate"))?;
                self.issue(HfpAction::Terminate(action), ctx)
            }
            HfpRequest::EnterPrivateMode { index } => {
                self.require_call_hold(PeerCapabilities::CHLD_PRIVATE, "private consultation")?;
                private_mode_action(self.reconciler.roster(), index)
                    .ok_or_else(|| ProfileError::no_matching_call("private mode"))?;
                self.issue(HfpAction::EnterPrivateMode(index), ctx)
            }
            HfpRequest::ExplicitCallTransfer => {
                self.require_call_hold(PeerCapabilities::CHLD_MERGE_AND_DETACH, "explicit call transfer")?;
                explicit_transfer_action(self.reconciler.roster())
                    .ok_or_else(|| ProfileError::no_matching_call("explicit call transfer"))?;
                self.issue(HfpAction::ExplicitTransfer, ctx)
            }
            HfpRequest::SendDtmf(code) => {
                if !matches!(code, '0'..='9' | '*' | '#' | 'A'..='D') {
                    return Err(ProfileError::invalid_request(format!("invalid DTMF code {:?}", code)));
                }
                self.issue(HfpAction::SendDtmf(code), ctx)
            }
            HfpRequest::StartVoiceRecognition => self.set_voice_recognition(true, ctx),
            HfpRequest::StopVoiceRecognition => self.set_voice_recognition(false, ctx),
            HfpRequest::SetSpeakerVolume(level) => self.set_volume(VolumeChannel::Speaker, level, ctx),
            HfpRequest::SetMicVolume(level) => self.set_volume(VolumeChannel::Microphone, level, ctx),
            HfpRequest::SetAudioRouteAllowed(allowed) => {
                info!("{}: audio routing {}", ctx.peer(), if allowed { "allowed" } else { "disallowed" });
                self.audio_route_allowed = allowed;
                if !allowed && ctx.audio_state() != AudioState::AudioOff {
                    ctx.request_audio_disconnect();
                }
                Ok(())
            }
            HfpRequest::QueryCurrentCalls => self.query_current_calls(ctx),
            HfpRequest::QueryOperatorName => self.issue(HfpAction::QueryOperatorName, ctx),
        }
    }

    fn handle_timer(&mut self, timer: HfpTimer, ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()> {
        match timer {
            HfpTimer::PollCurrentCalls => self.query_current_calls(ctx),
        }
    }
}
