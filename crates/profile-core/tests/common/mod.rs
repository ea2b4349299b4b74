//! Shared fixtures for the profile integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use btaudio_profile_core::prelude::*;
use btaudio_profile_core::config::HfpClientConfig;
use btaudio_profile_core::events::CallIndicatorKind;
use btaudio_profile_core::hfp::{CallDirection, CallIndex};
use btaudio_profile_core::logging::{setup_test_logging, LoggingConfig};

pub const PEER: PeerId = PeerId::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);

/// Route machine logs through the test output capture
pub fn init_logging() {
    setup_test_logging(&LoggingConfig::default().with_filter("btaudio_profile_core=debug"));
}

/// Everything the transport was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect(PeerId),
    Disconnect(PeerId),
    Command(PeerId, ProfileCommand),
}

/// Transport recording every call, with switches to refuse them
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    reject_connect: AtomicBool,
    reject_disconnect: AtomicBool,
    reject_commands: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_connect(&self, reject: bool) {
        self.reject_connect.store(reject, Ordering::SeqCst);
    }

    pub fn reject_disconnect(&self, reject: bool) {
        self.reject_disconnect.store(reject, Ordering::SeqCst);
    }

    pub fn reject_commands(&self, reject: bool) {
        self.reject_commands.store(reject, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn commands(&self) -> Vec<ProfileCommand> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Command(_, command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, TransportCall::Connect(_)))
            .count()
    }

    pub fn disconnects(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, TransportCall::Disconnect(_)))
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: TransportCall, reject: &AtomicBool) -> CommandStatus {
        self.calls.lock().push(call);
        (!reject.load(Ordering::SeqCst)).into()
    }
}

impl ProfileTransport for RecordingTransport {
    fn connect(&self, peer: PeerId) -> CommandStatus {
        self.record(TransportCall::Connect(peer), &self.reject_connect)
    }

    fn disconnect(&self, peer: PeerId) -> CommandStatus {
        self.record(TransportCall::Disconnect(peer), &self.reject_disconnect)
    }

    fn issue_command(&self, peer: PeerId, command: &ProfileCommand) -> CommandStatus {
        self.record(TransportCall::Command(peer, command.clone()), &self.reject_commands)
    }
}

/// Sink keeping every notification in order
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProfileEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ProfileEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// (previous, current) of every connection state change
    pub fn connection_changes(&self) -> Vec<(ConnectionState, ConnectionState)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProfileEvent::ConnectionStateChanged { previous, current, .. } => Some((*previous, *current)),
                _ => None,
            })
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProfileEvent::CallChanged { call, .. } => Some(call.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<ProfileError> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProfileEvent::RequestFailed { error, .. } => Some(error.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn notify(&self, event: ProfileEvent) {
        self.events.lock().push(event);
    }
}

/// A machine driven by hand with an explicit clock
pub struct Harness<S: ProfileSession> {
    pub machine: ConnectionStateMachine<S>,
    pub transport: Arc<RecordingTransport>,
    pub preferences: Arc<InMemoryPreferences>,
    pub sink: Arc<RecordingSink>,
    pub now: Instant,
}

impl<S: ProfileSession> Harness<S> {
    pub fn new(session: S) -> Self {
        init_logging();
        let transport = RecordingTransport::new();
        let preferences = Arc::new(InMemoryPreferences::new());
        let sink = RecordingSink::new();
        let machine = ConnectionStateMachine::new(
            PEER,
            session,
            transport.clone(),
            preferences.clone(),
            sink.clone(),
        );
        Self {
            machine,
            transport,
            preferences,
            sink,
            now: Instant::now(),
        }
    }

    pub fn send(&mut self, message: Message<S::Request>) {
        self.machine.process(message, self.now);
    }

    pub fn event(&mut self, event: StackEvent) {
        self.send(Message::Stack(event));
    }

    pub fn request(&mut self, request: S::Request) {
        self.send(Message::Request(request));
    }

    pub fn result(&mut self, outcome: CommandOutcome) {
        self.event(StackEvent::command_result(outcome));
    }

    pub fn link(&mut self, state: RawConnectionState, capabilities: PeerCapabilities) {
        self.event(StackEvent::ConnectionChanged { state, capabilities });
    }

    /// Move the clock and fire whatever came due
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.machine.fire_due_timers(self.now);
    }

    /// Forget recorded transport calls and notifications
    pub fn clear(&self) {
        self.transport.clear();
        self.sink.clear();
    }
}

impl Harness<A2dpSession> {
    pub fn a2dp() -> Self {
        Self::new(A2dpSession::new(A2dpConfig::default()))
    }

    pub fn connected_a2dp() -> Self {
        let mut harness = Self::a2dp();
        harness.send(Message::Connect);
        harness.link(RawConnectionState::Connected, PeerCapabilities::default());
        assert_eq!(harness.machine.state(), ConnectionState::Connected);
        harness.clear();
        harness
    }
}

pub fn gateway_capabilities() -> PeerCapabilities {
    PeerCapabilities::new(
        PeerCapabilities::THREE_WAY_CALLING
            | PeerCapabilities::VOICE_RECOGNITION
            | PeerCapabilities::ENHANCED_CALL_STATUS
            | PeerCapabilities::ENHANCED_CALL_CONTROL,
        PeerCapabilities::CHLD_RELEASE
            | PeerCapabilities::CHLD_RELEASE_AND_ACCEPT
            | PeerCapabilities::CHLD_RELEASE_SPECIFIC
            | PeerCapabilities::CHLD_HOLD_AND_ACCEPT
            | PeerCapabilities::CHLD_PRIVATE
            | PeerCapabilities::CHLD_MERGE
            | PeerCapabilities::CHLD_MERGE_AND_DETACH,
    )
}

impl Harness<HfpClientSession> {
    pub fn hfp() -> Self {
        Self::hfp_with(HfpClientConfig::default())
    }

    pub fn hfp_with(config: HfpClientConfig) -> Self {
        Self::new(HfpClientSession::new(config))
    }

    /// Connected to a gateway, subscriber info answered, records cleared
    pub fn connected_hfp() -> Self {
        let mut harness = Self::hfp();
        harness.send(Message::Connect);
        harness.link(RawConnectionState::Connected, gateway_capabilities());
        assert_eq!(harness.machine.state(), ConnectionState::Connected);
        harness.result(CommandOutcome::Ok);
        assert_eq!(harness.machine.session().pending_actions().count(), 0);
        harness.clear();
        harness
    }

    /// Run one full call list query answered with `entries`
    pub fn report_calls(&mut self, entries: &[(u32, CallState)]) {
        self.event(StackEvent::CallIndicator {
            kind: CallIndicatorKind::Call,
            value: 1,
        });
        self.answer_call_query(entries);
    }

    /// Answer an outstanding call list query with `entries`
    pub fn answer_call_query(&mut self, entries: &[(u32, CallState)]) {
        for (index, state) in entries {
            self.event(StackEvent::CallListEntry {
                index: *index,
                direction: CallDirection::Incoming,
                state: *state,
                multiparty: false,
                number: format!("555000{}", index),
            });
        }
        self.result(CommandOutcome::Ok);
    }

    pub fn roster_states(&self) -> Vec<(CallIndex, CallState)> {
        self.machine
            .session()
            .roster()
            .iter()
            .map(|call| (call.index, call.state))
            .collect()
    }
}
