//! Profile hooks plugged into the connection state machine
//!
//! The connection lifecycle is the same for every profile. What differs is
//! what happens once a peer is connected: A2DP negotiates codecs and tracks
//! the stream, the handsfree client tracks calls. A [`ProfileSession`]
//! carries that part and reaches the outside world only through the
//! [`SessionContext`] it is handed.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::machine::{Envelope, MachineCore, Message};
use super::timers::TimerKind;
use crate::errors::ProfileResult;
use crate::events::{PeerCapabilities, ProfileEvent, StackEvent};
use crate::preferences::PreferenceStore;
use crate::transport::ProfileCommand;
use crate::types::{AudioState, CommandStatus, ConnectionState, PeerId, ProfileKind};

/// Profile-specific behavior of a peer machine
///
/// Hooks run inside the machine's message loop and must not block.
pub trait ProfileSession: Send + Sized + 'static {
    /// Local requests the profile accepts while connected
    type Request: fmt::Debug + Clone + Send + 'static;
    /// Profile-owned timer kinds
    type Timer: fmt::Debug + Clone + PartialEq + Send + 'static;

    fn profile(&self) -> ProfileKind;

    /// Bound on the Connecting and Disconnecting states
    fn connect_timeout(&self) -> Duration;

    /// Link reported up; returning `false` refuses the peer
    fn on_link_up(&mut self, _capabilities: PeerCapabilities, _ctx: &mut SessionContext<'_, Self>) -> bool {
        true
    }

    fn on_connected(&mut self, _ctx: &mut SessionContext<'_, Self>) {}

    fn on_disconnected(&mut self, _ctx: &mut SessionContext<'_, Self>) {}

    /// Audio sub-state changed; the notification is already published
    fn on_audio_changed(
        &mut self,
        _previous: AudioState,
        _current: AudioState,
        _wideband: bool,
        _ctx: &mut SessionContext<'_, Self>,
    ) {
    }

    /// Stack event other than link and audio changes, never while disconnected
    fn handle_event(&mut self, event: StackEvent, ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()>;

    /// Local request, only while connected
    fn handle_request(&mut self, request: Self::Request, ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()>;

    /// Profile timer fired, only while connected
    fn handle_timer(&mut self, _timer: Self::Timer, _ctx: &mut SessionContext<'_, Self>) -> ProfileResult<()> {
        Ok(())
    }
}

/// What a session may touch while handling one message
pub struct SessionContext<'a, S: ProfileSession> {
    core: &'a mut MachineCore<S>,
    now: Instant,
}

impl<'a, S: ProfileSession> SessionContext<'a, S> {
    pub(crate) fn new(core: &'a mut MachineCore<S>, now: Instant) -> Self {
        Self { core, now }
    }

    pub fn peer(&self) -> PeerId {
        self.core.peer
    }

    /// Time the current message is processed at
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.state
    }

    pub fn audio_state(&self) -> AudioState {
        self.core.audio
    }

    pub fn preferences(&self) -> &dyn PreferenceStore {
        self.core.preferences.as_ref()
    }

    /// Hand a command to the transport
    pub fn issue(&self, command: &ProfileCommand) -> CommandStatus {
        debug!("{} {}: issuing {:?}", self.core.profile, self.core.peer, command);
        self.core.transport.issue_command(self.core.peer, command)
    }

    pub fn notify(&self, event: ProfileEvent) {
        self.core.sink.notify(event);
    }

    /// Arm `timer` after `delay`, replacing a pending one of the same kind
    pub fn schedule(&mut self, timer: S::Timer, delay: Duration) {
        self.core.timers.schedule(TimerKind::Session(timer), self.now + delay);
    }

    pub fn cancel(&mut self, timer: &S::Timer) -> bool {
        self.core.timers.cancel(&TimerKind::Session(timer.clone()))
    }

    pub fn is_scheduled(&self, timer: &S::Timer) -> bool {
        self.core.timers.is_scheduled(&TimerKind::Session(timer.clone()))
    }

    /// Queue an audio disconnect behind the message being handled
    pub fn request_audio_disconnect(&mut self) {
        self.core.local.push_back(Envelope::Message(Message::DisconnectAudio));
    }
}
