// Integration tests for the session lifecycle
//
// These tests drive a LiveSession against in-memory fakes and verify
// connect preconditions, the open handshake, media flow, and that teardown
// releases everything from every state.

mod common;

use common::*;
use loqa_coach::live::ChannelEvent;
use loqa_coach::session::{ConnectionState, LiveSession};
use loqa_coach::SessionError;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn session(transport: Arc<FakeTransport>, api_key: Option<&str>) -> LiveSession {
    LiveSession::new(
        "test-session",
        interview(),
        fast_settings(),
        transport,
        api_key.map(str::to_string),
    )
}

/// Connect and complete the open handshake
async fn open_session(
    dimensions: (u32, u32),
) -> (LiveSession, RemoteEnd, MediaProbe, OutputProbe, Arc<FakeTransport>) {
    let (transport, mut remotes) = FakeTransport::new(OpenMode::Accept);
    let mut session = session(Arc::clone(&transport), Some("test-key"));
    let (media, media_probe) = FakeMedia::new(dimensions);
    let (output, output_probe) = FakeOutput::new();

    session.connect(Some(media), output).await.unwrap();
    let remote = remotes.recv().await.unwrap();
    remote.send(ChannelEvent::Open).await;

    eventually("session open", || session.state() == ConnectionState::Open).await;

    (session, remote, media_probe, output_probe, transport)
}

#[tokio::test]
async fn test_connect_without_media_is_precondition_error() {
    let (transport, _remotes) = FakeTransport::new(OpenMode::Accept);
    let mut session = session(transport, Some("test-key"));
    let (output, _) = FakeOutput::new();

    let err = session.connect(None, output).await.unwrap_err();

    assert!(matches!(err, SessionError::Precondition(_)));
    assert_eq!(session.state(), ConnectionState::Idle);
    assert!(session.status().error.unwrap().contains("Media stream is not ready"));
}

#[tokio::test]
async fn test_connect_without_api_key_is_precondition_error() {
    for key in [None, Some(""), Some("   ")] {
        let (transport, _remotes) = FakeTransport::new(OpenMode::Accept);
        let mut session = session(Arc::clone(&transport), key);
        let (media, probe) = FakeMedia::new((640, 480));
        let (output, _) = FakeOutput::new();

        let err = session.connect(Some(media), output).await.unwrap_err();

        assert_eq!(err, SessionError::Precondition("API key is missing".to_string()));
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(probe.calls().is_empty(), "media must not be touched");
    }
}

#[tokio::test]
async fn test_missing_api_key_reported_before_missing_media() {
    let (transport, _remotes) = FakeTransport::new(OpenMode::Accept);
    let mut session = session(transport, None);
    let (output, _) = FakeOutput::new();

    let err = session.connect(None, output).await.unwrap_err();

    assert_eq!(err, SessionError::Precondition("API key is missing".to_string()));
    assert_eq!(session.status().error.as_deref(), Some("API key is missing"));
}

#[tokio::test]
async fn test_open_handshake_starts_capture() {
    let (transport, mut remotes) = FakeTransport::new(OpenMode::Accept);
    let mut session = session(transport, Some("test-key"));
    let (media, probe) = FakeMedia::new((640, 480));
    let (output, _) = FakeOutput::new();

    session.connect(Some(media), output).await.unwrap();

    let status = session.status();
    assert_eq!(status.state, ConnectionState::Connecting);
    assert!(status.connecting);
    assert!(!status.connected);
    assert!(status.started_at.is_some());

    let remote = remotes.recv().await.unwrap();
    assert_eq!(remote.api_key, "test-key");
    assert_eq!(remote.setup.response_modalities, vec!["AUDIO"]);
    assert!(remote.setup.system_instruction.contains("Acme"));
    assert!(probe.calls().is_empty(), "capture waits for the open acknowledgment");

    remote.send(ChannelEvent::Open).await;
    eventually("session open", || session.state() == ConnectionState::Open).await;

    assert!(session.status().connected);
    assert_eq!(probe.calls(), vec!["start_audio"]);

    session.disconnect().await;
}

#[tokio::test]
async fn test_connect_while_active_is_rejected() {
    let (mut session, _remote, _media, _output, _transport) = open_session((640, 480)).await;

    let (media, _) = FakeMedia::new((640, 480));
    let (output, _) = FakeOutput::new();
    let err = session.connect(Some(media), output).await.unwrap_err();

    assert!(matches!(err, SessionError::Precondition(_)));
    assert_eq!(session.state(), ConnectionState::Open);

    session.disconnect().await;
}

#[tokio::test]
async fn test_microphone_chunks_are_sent_and_measured() {
    let (mut session, mut remote, media, _output, _transport) = open_session((640, 480)).await;

    media.push_chunk(vec![0.5; 4096]).await;

    // Video frames interleave with audio; find the audio chunk
    let input = loop {
        let input = remote.outbound.recv().await.unwrap();
        if input.media.mime_type.starts_with("audio/") {
            break input;
        }
    };
    assert_eq!(input.media.mime_type, "audio/pcm;rate=16000");

    eventually("volume", || (session.status().volume - 0.5).abs() < 1e-6).await;

    session.disconnect().await;
}

#[tokio::test]
async fn test_video_frames_sent_on_interval() {
    let (mut session, mut remote, _media, _output, _transport) = open_session((640, 480)).await;

    let input = remote.outbound.recv().await.unwrap();
    assert_eq!(input.media.mime_type, "image/jpeg");

    session.disconnect().await;
}

#[tokio::test]
async fn test_video_skipped_until_camera_has_dimensions() {
    let (mut session, mut remote, _media, _output, _transport) = open_session((0, 0)).await;

    // Several ticks elapse at the 20ms interval
    tokio::time::sleep(std::time::Duration::from_millis(120)).await;
    assert!(remote.outbound.try_recv().is_err(), "nothing sent");
    assert_eq!(session.status().error, None);

    session.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_from_idle() {
    let (transport, _remotes) = FakeTransport::new(OpenMode::Accept);
    let mut session = session(Arc::clone(&transport), Some("test-key"));

    let transcript = session.disconnect().await;

    assert!(transcript.is_empty());
    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(transport.close_count(), 0);
}

#[tokio::test]
async fn test_disconnect_while_connecting() {
    let (transport, _remotes) = FakeTransport::new(OpenMode::Hang);
    let mut session = session(Arc::clone(&transport), Some("test-key"));
    let (media, probe) = FakeMedia::new((640, 480));
    let (output, output_probe) = FakeOutput::new();

    session.connect(Some(media), output).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connecting);

    session.disconnect().await;

    let status = session.status();
    assert_eq!(status.state, ConnectionState::Closed);
    assert_eq!(status.scheduled_units, 0);
    assert!(!probe.tap_active());
    assert!(probe.calls().contains(&"release"));
    assert!(!probe.calls().contains(&"start_audio"));
    assert!(output_probe.is_closed());
    assert_eq!(transport.close_count(), 0, "no connection was ever opened");
}

#[tokio::test]
async fn test_disconnect_from_open_releases_everything() {
    let (mut session, remote, media, output, transport) = open_session((640, 480)).await;

    remote.message(audio_message(200)).await;
    remote.message(audio_message(200)).await;
    eventually("units scheduled", || session.status().scheduled_units == 2).await;

    session.disconnect().await;

    let status = session.status();
    assert_eq!(status.state, ConnectionState::Closed);
    assert!(!status.connected);
    assert_eq!(status.scheduled_units, 0);
    assert_eq!(status.volume, 0.0);

    assert_eq!(media.calls(), vec!["start_audio", "stop_audio", "release"]);
    assert!(!media.tap_active());
    assert_eq!(output.stopped().len(), 2);
    assert!(output.is_closed());
    assert_eq!(transport.close_count(), 1);
    assert!(remote.events.is_closed(), "inbound receiver dropped");
}

#[tokio::test]
async fn test_second_disconnect_is_noop() {
    let (mut session, _remote, media, _output, transport) = open_session((640, 480)).await;

    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(transport.close_count(), 1);
    assert_eq!(
        media.calls().iter().filter(|c| **c == "release").count(),
        1
    );
}

#[tokio::test]
async fn test_dropping_session_tears_down() {
    let (session, _remote, media, output, transport) = open_session((640, 480)).await;

    drop(session);

    eventually("teardown after drop", || media.calls().contains(&"release")).await;
    eventually("output closed", || output.is_closed()).await;
    eventually("connection closed", || transport.close_count() == 1).await;
}

#[tokio::test]
async fn test_transport_error_sets_error_flag() {
    let (mut session, remote, media, _output, _transport) = open_session((640, 480)).await;

    remote
        .send(ChannelEvent::Error("connection reset".to_string()))
        .await;

    eventually("session closed", || session.state() == ConnectionState::Closed).await;

    let status = session.status();
    assert_eq!(status.error.as_deref(), Some("Connection error: connection reset"));
    assert!(media.calls().contains(&"release"));

    // Disconnect after a failure still succeeds
    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_open_failure_sets_error_flag() {
    let (transport, _remotes) = FakeTransport::new(OpenMode::Fail("unreachable".to_string()));
    let mut session = session(transport, Some("test-key"));
    let (media, probe) = FakeMedia::new((640, 480));
    let (output, _) = FakeOutput::new();

    session.connect(Some(media), output).await.unwrap();

    eventually("session closed", || session.state() == ConnectionState::Closed).await;
    assert!(session.status().error.unwrap().contains("unreachable"));
    assert!(probe.calls().contains(&"release"));
}

#[tokio::test]
async fn test_remote_close_ends_session() {
    let (mut session, remote, media, _output, transport) = open_session((640, 480)).await;

    remote.send(ChannelEvent::Closed).await;

    eventually("session closed", || session.state() == ConnectionState::Closed).await;
    assert_eq!(session.status().error, None);
    assert!(media.calls().contains(&"release"));
    assert_eq!(transport.close_count(), 1);

    session.disconnect().await;
}

#[tokio::test]
async fn test_reconnect_after_close() {
    let (transport, mut remotes) = FakeTransport::new(OpenMode::Accept);
    let mut session = session(Arc::clone(&transport), Some("test-key"));

    for _ in 0..2 {
        let (media, _) = FakeMedia::new((640, 480));
        let (output, _) = FakeOutput::new();
        session.connect(Some(media), output).await.unwrap();

        let remote = remotes.recv().await.unwrap();
        remote.send(ChannelEvent::Open).await;
        eventually("session open", || session.state() == ConnectionState::Open).await;

        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    assert_eq!(transport.close_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_camera_does_not_stall_the_session() {
    let (transport, mut remotes) = FakeTransport::new(OpenMode::Accept);
    let mut session = session(transport, Some("test-key"));
    let (media, camera) = FakeMedia::slow_camera(Duration::from_millis(400));
    let (output, output_probe) = FakeOutput::new();

    session.connect(Some(media), output).await.unwrap();
    let mut remote = remotes.recv().await.unwrap();
    remote.send(ChannelEvent::Open).await;
    eventually("session open", || session.state() == ConnectionState::Open).await;

    eventually("frame grab in flight", || camera.frames() == 1).await;

    // Inbound speech is scheduled while the grab is still running
    let sent = Instant::now();
    remote.message(audio_message(200)).await;
    eventually("speech scheduled", || output_probe.started().len() == 1).await;
    let scheduled_after = sent.elapsed();
    assert!(
        scheduled_after < Duration::from_millis(100),
        "speech waited {:?} behind a frame grab",
        scheduled_after
    );

    // Microphone chunks keep flowing too
    camera.push_chunk(vec![0.5; 4096]).await;
    let input = tokio::time::timeout(Duration::from_millis(100), async {
        loop {
            let input = remote.outbound.recv().await.unwrap();
            if input.media.mime_type.starts_with("audio/") {
                break input;
            }
        }
    })
    .await
    .expect("microphone chunk stuck behind a frame grab");
    assert_eq!(input.media.mime_type, "audio/pcm;rate=16000");

    // Ticks that fire during the grab are skipped, not queued
    assert_eq!(camera.frames(), 1);

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(camera.calls(), vec!["start_audio", "stop_audio", "release"]);
}

#[tokio::test]
async fn test_disconnect_completes_when_connection_close_hangs() {
    let (transport, mut remotes) = FakeTransport::with_stuck_close();
    let mut session = session(Arc::clone(&transport), Some("test-key"));
    let (media, probe) = FakeMedia::new((0, 0));
    let (output, output_probe) = FakeOutput::new();

    session.connect(Some(media), output).await.unwrap();
    let remote = remotes.recv().await.unwrap();
    remote.send(ChannelEvent::Open).await;
    eventually("session open", || session.state() == ConnectionState::Open).await;

    tokio::time::timeout(Duration::from_secs(2), session.disconnect())
        .await
        .expect("disconnect hung on connection close");

    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(transport.close_count(), 1);
    assert!(probe.calls().contains(&"release"));
    assert!(output_probe.is_closed());
}

#[tokio::test]
async fn test_transport_error_reaches_closed_when_close_hangs() {
    let (transport, mut remotes) = FakeTransport::with_stuck_close();
    let mut session = session(Arc::clone(&transport), Some("test-key"));
    let (media, _probe) = FakeMedia::new((0, 0));
    let (output, _) = FakeOutput::new();

    session.connect(Some(media), output).await.unwrap();
    let remote = remotes.recv().await.unwrap();
    remote.send(ChannelEvent::Open).await;
    eventually("session open", || session.state() == ConnectionState::Open).await;

    remote.send(ChannelEvent::Error("server went away".to_string())).await;

    eventually("session closed", || session.state() == ConnectionState::Closed).await;
    assert_eq!(
        session.status().error.as_deref(),
        Some("Connection error: server went away")
    );
    assert_eq!(transport.close_count(), 1);

    session.disconnect().await;
}
