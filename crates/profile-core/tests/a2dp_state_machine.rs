//! Connection lifecycle and codec handling of the A2DP machine

mod common;

use std::time::Duration;

use btaudio_profile_core::codec::{BitsPerSample, ChannelMode, SampleRate};
use btaudio_profile_core::prelude::*;
use btaudio_profile_core::state_machine::TimerKind;
use common::{Harness, TransportCall, PEER};
use pretty_assertions::assert_eq;

use ConnectionState::{Connected, Connecting, Disconnected, Disconnecting};

fn sbc() -> CodecConfig {
    CodecConfig::new(CodecType::Sbc, 0).with_audio(SampleRate::HZ_44100, BitsPerSample::BITS_16, ChannelMode::STEREO)
}

fn aac() -> CodecConfig {
    CodecConfig::new(CodecType::Aac, 0).with_audio(
        SampleRate::HZ_44100 | SampleRate::HZ_48000,
        BitsPerSample::BITS_16,
        ChannelMode::STEREO,
    )
}

fn codec_changed(config: CodecConfig) -> StackEvent {
    StackEvent::CodecConfigChanged {
        config,
        selectable: vec![sbc(), aac()],
        local_capabilities: vec![sbc(), aac()],
    }
}

#[test]
fn test_connect_timeout_issues_one_disconnect() {
    let mut harness = Harness::a2dp();
    harness.send(Message::Connect);
    assert_eq!(harness.machine.state(), Connecting);
    assert_eq!(harness.transport.calls(), vec![TransportCall::Connect(PEER)]);

    harness.advance(Duration::from_secs(29));
    assert_eq!(harness.machine.state(), Connecting);

    harness.advance(Duration::from_secs(1));
    assert_eq!(harness.machine.state(), Disconnected);
    assert_eq!(harness.transport.disconnects(), 1);
    assert_eq!(harness.machine.next_deadline(), None);
    assert_eq!(
        harness.sink.connection_changes(),
        vec![(Disconnected, Connecting), (Connecting, Disconnected)]
    );
    assert_eq!(
        harness.sink.failures(),
        vec![ProfileError::Timeout {
            operation: "connect".to_string(),
            after: Duration::from_secs(30),
        }]
    );
}

#[test]
fn test_connect_rejected_stays_disconnected() {
    let mut harness = Harness::a2dp();
    harness.transport.reject_connect(true);
    harness.send(Message::Connect);

    assert_eq!(harness.machine.state(), Disconnected);
    assert!(harness.sink.connection_changes().is_empty());
    assert_eq!(harness.sink.failures(), vec![ProfileError::rejected("connect")]);
    assert_eq!(harness.machine.next_deadline(), None);
}

#[test]
fn test_disconnect_while_disconnected_is_silent() {
    let mut harness = Harness::a2dp();
    harness.send(Message::Disconnect);

    assert_eq!(harness.machine.state(), Disconnected);
    assert!(harness.transport.calls().is_empty());
    assert!(harness.sink.events().is_empty());
}

#[test]
fn test_disconnect_from_connected() {
    let mut harness = Harness::connected_a2dp();
    harness.send(Message::Disconnect);
    assert_eq!(harness.machine.state(), Disconnecting);
    assert_eq!(harness.transport.disconnects(), 1);

    harness.link(RawConnectionState::Disconnected, PeerCapabilities::default());
    assert_eq!(harness.machine.state(), Disconnected);
    assert_eq!(
        harness.sink.connection_changes(),
        vec![(Connected, Disconnecting), (Disconnecting, Disconnected)]
    );
    assert_eq!(harness.machine.next_deadline(), None);
}

#[test]
fn test_rejected_disconnect_forces_disconnected() {
    let mut harness = Harness::connected_a2dp();
    harness.transport.reject_disconnect(true);
    harness.send(Message::Disconnect);

    assert_eq!(harness.machine.state(), Disconnected);
    assert_eq!(harness.sink.connection_changes(), vec![(Connected, Disconnected)]);
    assert_eq!(harness.sink.failures(), vec![ProfileError::rejected("disconnect")]);
}

#[test]
fn test_unconfirmed_disconnect_is_bounded() {
    let mut harness = Harness::connected_a2dp();
    harness.send(Message::Disconnect);
    assert!(harness.machine.timer_deadline(&TimerKind::DisconnectTimeout).is_some());

    harness.advance(Duration::from_secs(30));
    assert_eq!(harness.machine.state(), Disconnected);
    assert_eq!(harness.transport.disconnects(), 1);
    assert!(harness.sink.failures().is_empty());
}

#[test]
fn test_incoming_connection_needs_admission() {
    let mut harness = Harness::a2dp();
    harness.link(RawConnectionState::Connecting, PeerCapabilities::default());
    assert_eq!(harness.machine.state(), Disconnected);
    assert_eq!(harness.transport.calls(), vec![TransportCall::Disconnect(PEER)]);
    assert!(harness.sink.events().is_empty());

    harness.clear();
    harness.preferences.set_bonded(PEER, true);
    harness.link(RawConnectionState::Connecting, PeerCapabilities::default());
    assert_eq!(harness.machine.state(), Connecting);
    harness.link(RawConnectionState::Connected, PeerCapabilities::default());
    assert_eq!(harness.machine.state(), Connected);
    assert!(harness.transport.calls().is_empty());
}

#[test]
fn test_quiet_mode_refuses_known_peer() {
    let mut harness = Harness::a2dp();
    harness.preferences.set_priority(PEER, ConnectionPriority::AutoConnect);
    harness.preferences.set_quiet_mode(true);

    harness.link(RawConnectionState::Connected, PeerCapabilities::default());
    assert_eq!(harness.machine.state(), Disconnected);
    assert_eq!(harness.transport.disconnects(), 1);
}

#[test]
fn test_connect_deferred_while_disconnecting_is_replayed() {
    let mut harness = Harness::connected_a2dp();
    harness.send(Message::Disconnect);
    harness.send(Message::Connect);
    assert_eq!(harness.machine.state(), Disconnecting);
    assert_eq!(harness.machine.deferred_len(), 1);
    assert_eq!(harness.transport.connects(), 0);

    harness.link(RawConnectionState::Disconnected, PeerCapabilities::default());
    assert_eq!(harness.machine.deferred_len(), 0);
    assert_eq!(harness.machine.state(), Connecting);
    assert_eq!(harness.transport.connects(), 1);
    assert_eq!(
        harness.sink.connection_changes(),
        vec![
            (Connected, Disconnecting),
            (Disconnecting, Disconnected),
            (Disconnected, Connecting)
        ]
    );
}

#[test]
fn test_deferred_connect_dropped_once_connected() {
    let mut harness = Harness::a2dp();
    harness.send(Message::Connect);
    harness.send(Message::Connect);
    assert_eq!(harness.machine.deferred_len(), 1);

    harness.link(RawConnectionState::Connected, PeerCapabilities::default());
    assert_eq!(harness.machine.state(), Connected);
    assert_eq!(harness.machine.deferred_len(), 0);
    assert_eq!(harness.transport.connects(), 1);
    assert_eq!(harness.machine.timer_deadline(&TimerKind::ConnectTimeout), None);
}

#[test]
fn test_stream_start_and_link_loss_stop_audio() {
    let mut harness = Harness::connected_a2dp();
    harness.send(Message::ConnectAudio);
    assert_eq!(harness.transport.commands(), vec![ProfileCommand::ConnectAudio]);
    assert_eq!(harness.machine.audio_state(), AudioState::AudioConnecting);

    harness.event(StackEvent::audio(RawAudioState::Connected));
    assert_eq!(harness.machine.audio_state(), AudioState::AudioOn);
    assert!(harness.machine.session().is_playing());

    harness.clear();
    harness.link(RawConnectionState::Disconnected, PeerCapabilities::default());
    assert_eq!(harness.machine.state(), Disconnected);
    assert_eq!(harness.machine.audio_state(), AudioState::AudioOff);
    assert_eq!(
        harness.sink.events(),
        vec![
            ProfileEvent::AudioStateChanged {
                peer: PEER,
                profile: ProfileKind::A2dp,
                previous: AudioState::AudioOn,
                current: AudioState::AudioOff,
                wideband: None,
            },
            ProfileEvent::PlayingStateChanged {
                peer: PEER,
                playing: false,
            },
            ProfileEvent::ConnectionStateChanged {
                peer: PEER,
                profile: ProfileKind::A2dp,
                previous: Connected,
                current: Disconnected,
            },
        ]
    );
}

#[test]
fn test_suspend_stops_playing() {
    let mut harness = Harness::connected_a2dp();
    harness.event(StackEvent::audio(RawAudioState::Connected));
    harness.event(StackEvent::audio(RawAudioState::Suspended));

    assert_eq!(harness.machine.audio_state(), AudioState::AudioOff);
    assert!(!harness.machine.session().is_playing());
    let playing: Vec<bool> = harness
        .sink
        .events()
        .iter()
        .filter_map(|event| match event {
            ProfileEvent::PlayingStateChanged { playing, .. } => Some(*playing),
            _ => None,
        })
        .collect();
    assert_eq!(playing, vec![true, false]);
}

#[test]
fn test_audio_outside_connected_is_refused() {
    let mut harness = Harness::a2dp();
    harness.send(Message::ConnectAudio);
    assert!(matches!(
        harness.sink.failures().as_slice(),
        [ProfileError::InvalidState { .. }]
    ));

    harness.clear();
    harness.send(Message::Connect);
    harness.event(StackEvent::audio(RawAudioState::Connected));
    assert_eq!(harness.machine.audio_state(), AudioState::AudioOff);
    assert!(harness.sink.failures().is_empty());
}

#[test]
fn test_session_events_dropped_while_disconnected() {
    let mut harness = Harness::a2dp();
    harness.event(codec_changed(sbc()));
    assert!(harness.sink.events().is_empty());
    assert!(harness.machine.session().codec_status().is_none());
}

#[test]
fn test_feeding_parameter_change_reconfigures_audio() {
    let mut harness = Harness::connected_a2dp();
    harness.event(codec_changed(sbc()));

    let events = harness.sink.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], ProfileEvent::CodecConfigChanged { .. }));
    assert_eq!(
        events[1],
        ProfileEvent::AudioRoute {
            peer: PEER,
            update: AudioRouteUpdate::A2dpReconfigure { config: sbc() },
        }
    );

    harness.clear();
    harness.event(codec_changed(sbc().with_codec_specific([1, 0, 0, 0])));
    let events = harness.sink.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ProfileEvent::CodecConfigChanged { .. }));
}

#[test]
fn test_codec_preference_issued_and_failure_surfaced() {
    let mut harness = Harness::connected_a2dp();
    harness.event(codec_changed(sbc()));
    harness.clear();

    let wanted = CodecConfig::new(CodecType::Aac, 5).with_audio(
        SampleRate::HZ_48000,
        BitsPerSample::BITS_16,
        ChannelMode::STEREO,
    );
    harness.request(A2dpRequest::SetCodecPreference(wanted.clone()));
    assert_eq!(
        harness.transport.commands(),
        vec![ProfileCommand::SetCodecPreference { configs: vec![wanted] }]
    );

    harness.result(CommandOutcome::Error);
    assert_eq!(
        harness.sink.events(),
        vec![ProfileEvent::CommandResult {
            peer: PEER,
            profile: ProfileKind::A2dp,
            outcome: CommandOutcome::Error,
            code: None,
        }]
    );
}

#[test]
fn test_codec_preference_refusals() {
    let mut harness = Harness::connected_a2dp();
    harness.request(A2dpRequest::SetCodecPreference(aac()));
    assert_eq!(
        harness.sink.failures(),
        vec![ProfileError::codec_rejected("codec negotiation incomplete")]
    );

    harness.event(codec_changed(sbc()));
    harness.clear();
    harness.request(A2dpRequest::SetCodecPreference(CodecConfig::new(CodecType::Ldac, 1)));
    assert!(matches!(
        harness.sink.failures().as_slice(),
        [ProfileError::CodecRejected { .. }]
    ));
    assert!(harness.transport.commands().is_empty());
}

#[test]
fn test_enable_optional_codecs_uses_stored_priorities() {
    let mut harness = Harness::connected_a2dp();
    harness.preferences.set_codec_priority(CodecType::Aac, 3);
    harness.event(codec_changed(sbc()));
    harness.clear();

    harness.request(A2dpRequest::EnableOptionalCodecs);
    let commands = harness.transport.commands();
    let [ProfileCommand::SetCodecPreference { configs }] = commands.as_slice() else {
        panic!("expected one preference list, got {:?}", commands);
    };
    assert!(configs.iter().all(|config| !config.is_mandatory()));
    assert_eq!(configs.len(), CodecType::ALL.len() - 1);
    assert_eq!(configs[0].codec_type, CodecType::Aac);
    assert_eq!(configs[0].priority, 3);
}

#[test]
fn test_unmatched_result_changes_nothing() {
    let mut harness = Harness::connected_a2dp();
    harness.result(CommandOutcome::Ok);

    assert_eq!(harness.machine.state(), Connected);
    assert!(harness.sink.events().is_empty());
    assert_eq!(harness.machine.session().correlator_stats().unmatched, 1);
}
