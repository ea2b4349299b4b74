//! Per-peer connection state machine
//!
//! One instance per (peer, profile). It is synchronous and deterministic:
//! callers feed it messages together with the current time, and it reports
//! the next instant it needs to be woken for a timer. The actor in
//! [`crate::actor`] supplies both from tokio.
//!
//! ```text
//!                  Connect / incoming
//!   Disconnected ─────────────────────▶ Connecting ──link up──▶ Connected ◀─▶ AudioOn
//!        ▲                                  │                      │
//!        │            timeout / link down   │       Disconnect     │
//!        ├──────────────────────────────────┘                      ▼
//!        └──────────────── link down / timeout ─────────────── Disconnecting
//! ```
//!
//! Messages are processed one at a time from a local queue. Anything a handler
//! wants to happen next (synthesized events, replayed requests) is queued
//! rather than handled re-entrantly.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::session::{ProfileSession, SessionContext};
use super::timers::{TimerKind, TimerQueue};
use crate::errors::{ProfileError, ProfileResult};
use crate::events::{PeerCapabilities, ProfileEvent, RawAudioState, RawConnectionState, StackEvent};
use crate::policy::admit_incoming;
use crate::preferences::PreferenceStore;
use crate::sink::EventSink;
use crate::transport::{ProfileCommand, ProfileTransport};
use crate::types::{AudioState, ConnectionState, PeerId, PeerSnapshot, ProfileKind};

/// Input of a peer machine
#[derive(Debug, Clone, PartialEq)]
pub enum Message<R> {
    Connect,
    Disconnect,
    ConnectAudio,
    DisconnectAudio,
    Stack(StackEvent),
    Request(R),
}

impl<R> Message<R> {
    fn name(&self) -> &'static str {
        match self {
            Message::Connect => "Connect",
            Message::Disconnect => "Disconnect",
            Message::ConnectAudio => "ConnectAudio",
            Message::DisconnectAudio => "DisconnectAudio",
            Message::Stack(event) => event.name(),
            Message::Request(_) => "Request",
        }
    }
}

/// Entry of the local queue
#[derive(Debug)]
pub(crate) enum Envelope<R, T> {
    Message(Message<R>),
    Timer(TimerKind<T>),
}

/// Everything except the session, so hooks can borrow it mutably
pub(crate) struct MachineCore<S: ProfileSession> {
    pub(crate) peer: PeerId,
    pub(crate) profile: ProfileKind,
    pub(crate) state: ConnectionState,
    pub(crate) audio: AudioState,
    pub(crate) wideband: bool,
    pub(crate) transport: Arc<dyn ProfileTransport>,
    pub(crate) preferences: Arc<dyn PreferenceStore>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) timers: TimerQueue<TimerKind<S::Timer>>,
    pub(crate) deferred: VecDeque<Message<S::Request>>,
    pub(crate) local: VecDeque<Envelope<S::Request, S::Timer>>,
}

/// Connection lifecycle of one peer for one profile
pub struct ConnectionStateMachine<S: ProfileSession> {
    core: MachineCore<S>,
    session: S,
}

impl<S: ProfileSession> ConnectionStateMachine<S> {
    pub fn new(
        peer: PeerId,
        session: S,
        transport: Arc<dyn ProfileTransport>,
        preferences: Arc<dyn PreferenceStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let profile = session.profile();
        debug!("Created {} machine for {}", profile, peer);
        Self {
            core: MachineCore {
                peer,
                profile,
                state: ConnectionState::Disconnected,
                audio: AudioState::AudioOff,
                wideband: false,
                transport,
                preferences,
                sink,
                timers: TimerQueue::new(),
                deferred: VecDeque::new(),
                local: VecDeque::new(),
            },
            session,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.core.peer
    }

    pub fn profile(&self) -> ProfileKind {
        self.core.profile
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state
    }

    pub fn audio_state(&self) -> AudioState {
        self.core.audio
    }

    /// Wideband speech in use on the current audio link
    pub fn is_wideband(&self) -> bool {
        self.core.wideband
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            connection: self.core.state,
            audio: self.core.audio,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Messages waiting for the next stable state
    pub fn deferred_len(&self) -> usize {
        self.core.deferred.len()
    }

    /// When the earliest pending timer is due
    pub fn next_deadline(&self) -> Option<Instant> {
        self.core.timers.next_deadline()
    }

    pub fn timer_deadline(&self, kind: &TimerKind<S::Timer>) -> Option<Instant> {
        self.core.timers.deadline_of(kind)
    }

    /// Handle one inbound message and everything it queues
    pub fn process(&mut self, message: Message<S::Request>, now: Instant) {
        self.core.local.push_back(Envelope::Message(message));
        self.drain(now);
    }

    /// Fire every timer due at `now`, earliest first
    pub fn fire_due_timers(&mut self, now: Instant) {
        while let Some(kind) = self.core.timers.pop_due(now) {
            self.core.local.push_back(Envelope::Timer(kind));
            self.drain(now);
        }
    }

    fn drain(&mut self, now: Instant) {
        while let Some(envelope) = self.core.local.pop_front() {
            if let Err(error) = self.dispatch(envelope, now) {
                self.report(error);
            }
        }
    }

    fn dispatch(&mut self, envelope: Envelope<S::Request, S::Timer>, now: Instant) -> ProfileResult<()> {
        match envelope {
            Envelope::Message(message) => {
                debug!(
                    "{} {}: {} while {}",
                    self.core.profile,
                    self.core.peer,
                    message.name(),
                    self.core.state
                );
                match message {
                    Message::Connect => self.on_connect(now),
                    Message::Disconnect => self.on_disconnect(now),
                    Message::ConnectAudio => self.on_connect_audio(now),
                    Message::DisconnectAudio => self.on_disconnect_audio(),
                    Message::Stack(event) => self.on_stack_event(event, now),
                    Message::Request(request) => self.on_request(request, now),
                }
            }
            Envelope::Timer(kind) => self.on_timer(kind, now),
        }
    }

    fn report(&self, error: ProfileError) {
        if error.is_unexpected_event() {
            warn!("{} {}: {}, dropped", self.core.profile, self.core.peer, error);
            return;
        }
        warn!("{} {}: {}", self.core.profile, self.core.peer, error);
        self.core.sink.notify(ProfileEvent::RequestFailed {
            peer: self.core.peer,
            profile: self.core.profile,
            error,
        });
    }

    fn on_connect(&mut self, now: Instant) -> ProfileResult<()> {
        match self.core.state {
            ConnectionState::Disconnected => {
                info!("{} {}: connecting", self.core.profile, self.core.peer);
                if !self.core.transport.connect(self.core.peer).is_accepted() {
                    return Err(ProfileError::rejected("connect"));
                }
                self.transition(ConnectionState::Connecting, now);
                Ok(())
            }
            ConnectionState::Connecting | ConnectionState::Disconnecting => {
                debug!(
                    "{} {}: deferring Connect while {}",
                    self.core.profile, self.core.peer, self.core.state
                );
                self.core.deferred.push_back(Message::Connect);
                Ok(())
            }
            ConnectionState::Connected => {
                debug!("{} {}: already connected", self.core.profile, self.core.peer);
                Ok(())
            }
        }
    }

    fn on_disconnect(&mut self, now: Instant) -> ProfileResult<()> {
        if self.core.state == ConnectionState::Disconnected {
            debug!("{} {}: already disconnected", self.core.profile, self.core.peer);
            return Ok(());
        }
        info!("{} {}: disconnecting", self.core.profile, self.core.peer);
        if !self.core.transport.disconnect(self.core.peer).is_accepted() {
            self.transition(ConnectionState::Disconnected, now);
            return Err(ProfileError::rejected("disconnect"));
        }
        self.transition(ConnectionState::Disconnecting, now);
        Ok(())
    }

    fn on_connect_audio(&mut self, now: Instant) -> ProfileResult<()> {
        if self.core.state != ConnectionState::Connected {
            return Err(ProfileError::invalid_state(format!(
                "cannot connect audio while {}",
                self.core.state
            )));
        }
        if self.core.audio != AudioState::AudioOff {
            debug!("{} {}: audio already {}", self.core.profile, self.core.peer, self.core.audio);
            return Ok(());
        }
        let status = self
            .core
            .transport
            .issue_command(self.core.peer, &ProfileCommand::ConnectAudio);
        if !status.is_accepted() {
            return Err(ProfileError::rejected("connect audio"));
        }
        self.set_audio(AudioState::AudioConnecting, false, now);
        Ok(())
    }

    fn on_disconnect_audio(&mut self) -> ProfileResult<()> {
        if self.core.state != ConnectionState::Connected {
            return Err(ProfileError::invalid_state(format!(
                "cannot disconnect audio while {}",
                self.core.state
            )));
        }
        if self.core.audio == AudioState::AudioOff {
            debug!("{} {}: audio already off", self.core.profile, self.core.peer);
            return Ok(());
        }
        let status = self
            .core
            .transport
            .issue_command(self.core.peer, &ProfileCommand::DisconnectAudio);
        if !status.is_accepted() {
            return Err(ProfileError::rejected("disconnect audio"));
        }
        Ok(())
    }

    fn on_stack_event(&mut self, event: StackEvent, now: Instant) -> ProfileResult<()> {
        match event {
            StackEvent::ConnectionChanged { state, capabilities } => {
                self.on_connection_changed(state, capabilities, now);
                Ok(())
            }
            StackEvent::AudioChanged { state } => self.on_audio_changed(state, now),
            event => {
                if self.core.state == ConnectionState::Disconnected {
                    return Err(ProfileError::unexpected(self.core.state, event.name()));
                }
                let mut ctx = SessionContext::new(&mut self.core, now);
                self.session.handle_event(event, &mut ctx)
            }
        }
    }

    fn on_request(&mut self, request: S::Request, now: Instant) -> ProfileResult<()> {
        if self.core.state != ConnectionState::Connected {
            return Err(ProfileError::invalid_state(format!(
                "{:?} needs a connected peer, state is {}",
                request, self.core.state
            )));
        }
        let mut ctx = SessionContext::new(&mut self.core, now);
        self.session.handle_request(request, &mut ctx)
    }

    fn on_connection_changed(&mut self, raw: RawConnectionState, capabilities: PeerCapabilities, now: Instant) {
        use ConnectionState::*;

        match (self.core.state, raw) {
            (Disconnected, RawConnectionState::Connecting) | (Disconnecting, RawConnectionState::Connecting) => {
                if self.admit() {
                    self.transition(Connecting, now);
                } else {
                    self.refuse();
                }
            }
            (Disconnected, RawConnectionState::Connected) | (Disconnecting, RawConnectionState::Connected) => {
                if self.admit() {
                    self.link_up(capabilities, now);
                } else {
                    self.refuse();
                }
            }
            (Connecting, RawConnectionState::Connected) => self.link_up(capabilities, now),
            (Connecting | Connected | Disconnecting, RawConnectionState::Disconnected) => {
                self.transition(Disconnected, now)
            }
            (Connecting | Connected, RawConnectionState::Disconnecting) => self.transition(Disconnecting, now),
            (state, raw) => {
                debug!(
                    "{} {}: ignoring link {:?} while {}",
                    self.core.profile, self.core.peer, raw, state
                );
            }
        }
    }

    fn admit(&self) -> bool {
        let admission = admit_incoming(self.core.peer, self.core.preferences.as_ref());
        if !admission.is_accepted() {
            warn!(
                "{} {}: incoming connection refused: {:?}",
                self.core.profile, self.core.peer, admission
            );
        }
        admission.is_accepted()
    }

    fn refuse(&self) {
        if !self.core.transport.disconnect(self.core.peer).is_accepted() {
            warn!("{} {}: transport rejected disconnect of refused peer", self.core.profile, self.core.peer);
        }
    }

    fn link_up(&mut self, capabilities: PeerCapabilities, now: Instant) {
        let accepted = {
            let mut ctx = SessionContext::new(&mut self.core, now);
            self.session.on_link_up(capabilities, &mut ctx)
        };
        if accepted {
            self.transition(ConnectionState::Connected, now);
            return;
        }
        warn!("{} {}: peer refused by profile, disconnecting", self.core.profile, self.core.peer);
        if self.core.transport.disconnect(self.core.peer).is_accepted() {
            self.transition(ConnectionState::Disconnecting, now);
        } else {
            self.transition(ConnectionState::Disconnected, now);
        }
    }

    fn on_audio_changed(&mut self, raw: RawAudioState, now: Instant) -> ProfileResult<()> {
        if self.core.state != ConnectionState::Connected {
            return Err(ProfileError::unexpected(self.core.state, "AudioChanged"));
        }
        let (audio, wideband) = match raw {
            RawAudioState::Disconnected | RawAudioState::Suspended => (AudioState::AudioOff, false),
            RawAudioState::Connecting => (AudioState::AudioConnecting, false),
            RawAudioState::Connected => (AudioState::AudioOn, false),
            RawAudioState::ConnectedWideband => (AudioState::AudioOn, true),
        };
        let same_link = audio != AudioState::AudioOn || wideband == self.core.wideband;
        if audio == self.core.audio && same_link {
            debug!("{} {}: audio already {}", self.core.profile, self.core.peer, audio);
            return Ok(());
        }
        self.set_audio(audio, wideband, now);
        Ok(())
    }

    fn set_audio(&mut self, audio: AudioState, wideband: bool, now: Instant) {
        let previous = self.core.audio;
        self.core.audio = audio;
        self.core.wideband = audio == AudioState::AudioOn && wideband;
        info!(
            "{} {}: audio {} -> {}{}",
            self.core.profile,
            self.core.peer,
            previous,
            audio,
            if self.core.wideband { " (wideband)" } else { "" }
        );
        self.core.sink.notify(ProfileEvent::AudioStateChanged {
            peer: self.core.peer,
            profile: self.core.profile,
            previous,
            current: audio,
            wideband: (audio == AudioState::AudioOn).then_some(self.core.wideband),
        });
        let wideband = self.core.wideband;
        let mut ctx = SessionContext::new(&mut self.core, now);
        self.session.on_audio_changed(previous, audio, wideband, &mut ctx);
    }

    fn on_timer(&mut self, kind: TimerKind<S::Timer>, now: Instant) -> ProfileResult<()> {
        match kind {
            TimerKind::ConnectTimeout => {
                if self.core.state != ConnectionState::Connecting {
                    debug!("{} {}: stale connect timeout", self.core.profile, self.core.peer);
                    return Ok(());
                }
                let after = self.session.connect_timeout();
                warn!("{} {}: connect timed out after {:?}", self.core.profile, self.core.peer, after);
                if !self.core.transport.disconnect(self.core.peer).is_accepted() {
                    warn!("{} {}: transport rejected disconnect after timeout", self.core.profile, self.core.peer);
                }
                self.synthesize_link_down();
                Err(ProfileError::Timeout {
                    operation: "connect".to_string(),
                    after,
                })
            }
            TimerKind::DisconnectTimeout => {
                if self.core.state != ConnectionState::Disconnecting {
                    debug!("{} {}: stale disconnect timeout", self.core.profile, self.core.peer);
                    return Ok(());
                }
                warn!("{} {}: disconnect never confirmed, forcing", self.core.profile, self.core.peer);
                self.synthesize_link_down();
                Ok(())
            }
            TimerKind::Session(timer) => {
                if self.core.state != ConnectionState::Connected {
                    debug!("{} {}: stale {:?}", self.core.profile, self.core.peer, timer);
                    return Ok(());
                }
                let mut ctx = SessionContext::new(&mut self.core, now);
                self.session.handle_timer(timer, &mut ctx)
            }
        }
    }

    fn synthesize_link_down(&mut self) {
        self.core.local.push_front(Envelope::Message(Message::Stack(StackEvent::connection(
            RawConnectionState::Disconnected,
        ))));
    }

    fn transition(&mut self, next: ConnectionState, now: Instant) {
        let previous = self.core.state;
        if previous == next {
            return;
        }

        match previous {
            ConnectionState::Connecting => {
                self.core.timers.cancel(&TimerKind::ConnectTimeout);
            }
            ConnectionState::Disconnecting => {
                self.core.timers.cancel(&TimerKind::DisconnectTimeout);
            }
            ConnectionState::Connected => {
                if self.core.audio != AudioState::AudioOff {
                    self.set_audio(AudioState::AudioOff, false, now);
                }
                self.core
                    .timers
                    .cancel_where(|kind| matches!(kind, TimerKind::Session(_)));
            }
            ConnectionState::Disconnected => {}
        }

        self.core.state = next;
        info!("{} {}: {} -> {}", self.core.profile, self.core.peer, previous, next);
        self.core.sink.notify(ProfileEvent::ConnectionStateChanged {
            peer: self.core.peer,
            profile: self.core.profile,
            previous,
            current: next,
        });

        match next {
            ConnectionState::Connecting => {
                let deadline = now + self.session.connect_timeout();
                self.core.timers.schedule(TimerKind::ConnectTimeout, deadline);
            }
            ConnectionState::Disconnecting => {
                let deadline = now + self.session.connect_timeout();
                self.core.timers.schedule(TimerKind::DisconnectTimeout, deadline);
            }
            ConnectionState::Connected => {
                let before = self.core.deferred.len();
                self.core.deferred.retain(|message| !matches!(message, Message::Connect));
                if before != self.core.deferred.len() {
                    debug!(
                        "{} {}: dropped {} deferred Connect",
                        self.core.profile,
                        self.core.peer,
                        before - self.core.deferred.len()
                    );
                }
                if self.core.audio != AudioState::AudioOff {
                    self.set_audio(AudioState::AudioOff, false, now);
                }
                let mut ctx = SessionContext::new(&mut self.core, now);
                self.session.on_connected(&mut ctx);
            }
            ConnectionState::Disconnected => {
                let mut ctx = SessionContext::new(&mut self.core, now);
                self.session.on_disconnected(&mut ctx);
            }
        }

        if next.is_stable() {
            self.replay_deferred();
        }
    }

    fn replay_deferred(&mut self) {
        if self.core.deferred.is_empty() {
            return;
        }
        debug!(
            "{} {}: replaying {} deferred messages",
            self.core.profile,
            self.core.peer,
            self.core.deferred.len()
        );
        while let Some(message) = self.core.deferred.pop_back() {
            self.core.local.push_front(Envelope::Message(message));
        }
    }
}

impl<S: ProfileSession> std::fmt::Debug for ConnectionStateMachine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("peer", &self.core.peer)
            .field("profile", &self.core.profile)
            .field("state", &self.core.state)
            .field("audio", &self.core.audio)
            .field("deferred", &self.core.deferred.len())
            .field("timers", &self.core.timers.len())
            .finish()
    }
}
