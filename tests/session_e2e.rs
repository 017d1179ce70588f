//! End-to-end session lifecycle tests against fake capture and transport.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{controller_with, fast_config, TestSource};
use plate_console::capture::CaptureError;
use plate_console::channel::{ChannelState, CloseCause, InboundMessage, Outbound};
use plate_console::session::{
    ReconnectPolicy, SessionError, SessionState, SessionUpdate, StopCause,
};

fn detection(text: &str) -> InboundMessage {
    InboundMessage::Text(format!(r#"{{"detection":"{}"}}"#, text))
}

fn count_sent(updates: &[SessionUpdate]) -> usize {
    updates
        .iter()
        .filter(|u| matches!(u, SessionUpdate::FrameSent))
        .count()
}

#[tokio::test]
async fn test_no_frames_before_channel_opens() {
    let (mut controller, connector) = controller_with(fast_config(), TestSource::default());
    controller.start(None).unwrap();
    assert_eq!(controller.state(), SessionState::Starting);
    assert_eq!(controller.channel_state(), ChannelState::Connecting);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let updates = controller.process_pending();
    assert_eq!(count_sent(&updates), 0);
    assert_eq!(controller.sampler_ticks(), 0);
    assert!(connector.with(0, |c| c.written()).is_empty());

    connector.events(0).opened();
    let updates = controller.process_pending();
    assert_eq!(updates, vec![SessionUpdate::Detecting]);
    assert!(controller.is_detecting());

    tokio::time::sleep(Duration::from_millis(60)).await;
    let updates = controller.process_pending();
    assert!(count_sent(&updates) > 0);

    let written = connector.with(0, |c| c.written());
    assert!(!written.is_empty());
    match &written[0] {
        Outbound::Frame(data) => assert_eq!(&data[..2], &[0xFF, 0xD8]),
        other => panic!("Expected a JPEG frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_close_returns_to_idle_and_stops_sampling() {
    let (mut controller, connector) = controller_with(fast_config(), TestSource::default());
    controller.start(None).unwrap();
    connector.events(0).opened();
    controller.process_pending();
    tokio::time::sleep(Duration::from_millis(40)).await;

    connector.events(0).closed(CloseCause::Remote);
    let updates = controller.process_pending();
    assert_eq!(
        updates.last(),
        Some(&SessionUpdate::Stopped(StopCause::ChannelClosed(CloseCause::Remote)))
    );
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(!controller.is_sampling());
    assert!(!controller.source().attached);

    let ticks = controller.sampler_ticks();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(controller.sampler_ticks(), ticks);
    assert!(controller.process_pending().is_empty());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (mut controller, connector) = controller_with(fast_config(), TestSource::default());
    controller.stop();
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(controller.last_stop_cause().is_none());

    controller.start(None).unwrap();
    connector.events(0).opened();
    controller.process_pending();

    controller.stop();
    let epoch = controller.epoch();
    controller.stop();
    assert_eq!(controller.epoch(), epoch);
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(controller.last_stop_cause(), Some(&StopCause::User));
    assert_eq!(controller.channel_state(), ChannelState::Closed);

    let written = connector.with(0, |c| c.written());
    assert_eq!(written.last(), Some(&Outbound::Close));
}

#[tokio::test]
async fn test_dropping_active_controller_releases_everything() {
    let source = TestSource::default();
    let surface = source.surface.clone();
    let (mut controller, connector) = controller_with(fast_config(), source);
    controller.start(None).unwrap();
    connector.events(0).opened();
    controller.process_pending();
    tokio::time::sleep(Duration::from_millis(40)).await;

    let ticks = controller.sampler_tick_counter();
    assert!(ticks.load(Ordering::SeqCst) > 0);
    assert!(surface.dimensions().is_some());

    drop(controller);

    let written = connector.with(0, |c| c.written());
    assert_eq!(written.last(), Some(&Outbound::Close));
    assert!(matches!(surface.current(), Ok(None)));

    let after_drop = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), after_drop);
}

#[tokio::test]
async fn test_events_after_stop_are_ignored() {
    let (mut controller, connector) = controller_with(fast_config(), TestSource::default());
    controller.start(None).unwrap();
    let events = connector.events(0);
    events.opened();
    controller.process_pending();

    controller.stop();
    events.message(detection("LATE1"));
    events.opened();
    events.closed(CloseCause::Remote);

    let updates = controller.process_pending();
    assert_eq!(updates.len(), 3);
    assert!(updates.iter().all(|u| *u == SessionUpdate::Ignored));
    assert!(controller.buffer().is_empty());
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(controller.last_stop_cause(), Some(&StopCause::User));
}

#[tokio::test]
async fn test_start_rejected_while_active() {
    let (mut controller, connector) = controller_with(fast_config(), TestSource::default());
    controller.start(Some("/dev/video0")).unwrap();
    assert_eq!(
        controller.start(None),
        Err(SessionError::AlreadyActive(SessionState::Starting))
    );

    connector.events(0).opened();
    controller.process_pending();
    assert_eq!(
        controller.start(None),
        Err(SessionError::AlreadyActive(SessionState::Detecting))
    );

    assert_eq!(connector.count(), 1);
    assert_eq!(controller.source().attach_calls, 1);
    assert_eq!(controller.source().last_device.as_deref(), Some("/dev/video0"));
}

#[tokio::test]
async fn test_attach_failure_leaves_controller_idle() {
    let source = TestSource::failing(CaptureError::PermissionDenied);
    let (mut controller, connector) = controller_with(fast_config(), source);

    let err = controller.start(None).unwrap_err();
    assert_eq!(err, SessionError::Capture(CaptureError::PermissionDenied));
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(connector.count(), 0);
    assert_eq!(
        controller.last_stop_cause(),
        Some(&StopCause::CaptureFailed(CaptureError::PermissionDenied))
    );

    // Start may be tried again; the source is asked afresh
    assert!(controller.start(None).is_err());
    assert_eq!(controller.source().attach_calls, 2);
    assert_eq!(controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_stream_failure_mid_session_stops() {
    let (mut controller, connector) = controller_with(fast_config(), TestSource::default());
    controller.start(None).unwrap();
    connector.events(0).opened();
    controller.process_pending();

    controller.source().surface.fail("camera unplugged");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let updates = controller.process_pending();

    assert!(updates.iter().any(|u| matches!(
        u,
        SessionUpdate::Stopped(StopCause::CaptureFailed(CaptureError::StreamFailed(_)))
    )));
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(controller.channel_state(), ChannelState::Closed);
}

#[tokio::test]
async fn test_detections_fill_buffer_with_eviction() {
    let (mut controller, connector) = controller_with(fast_config(), TestSource::default());
    controller.start(None).unwrap();
    let events = connector.events(0);
    events.opened();
    for plate in ["AAA", "BBB", "CCC", "DDD"] {
        events.message(detection(plate));
    }
    controller.process_pending();

    assert_eq!(controller.buffer().texts(), vec!["BBB", "CCC", "DDD"]);
    assert_eq!(controller.select_detection(0), Some("BBB"));
    assert!(controller.selection().is_selected("BBB"));
}

#[tokio::test]
async fn test_malformed_messages_leave_buffer_unchanged() {
    let (mut controller, connector) = controller_with(fast_config(), TestSource::default());
    controller.start(None).unwrap();
    let events = connector.events(0);
    events.opened();
    events.message(detection("KEEP1"));
    controller.process_pending();

    events.message(InboundMessage::Text("{}".to_string()));
    events.message(InboundMessage::Text("not json".to_string()));
    events.message(InboundMessage::Text("[1,2]".to_string()));
    events.message(InboundMessage::Binary(vec![1, 2, 3]));
    let updates = controller.process_pending();

    assert!(updates.iter().all(|u| *u == SessionUpdate::Ignored));
    assert_eq!(controller.buffer().texts(), vec!["KEEP1"]);
    assert!(controller.is_detecting());
}

#[tokio::test]
async fn test_selection_survives_eviction() {
    let (mut controller, connector) = controller_with(fast_config(), TestSource::default());
    controller.start(None).unwrap();
    let events = connector.events(0);
    events.opened();
    events.message(detection("FIRST"));
    controller.process_pending();
    controller.select_detection(0);

    for plate in ["B1", "B2", "B3"] {
        events.message(detection(plate));
    }
    controller.process_pending();

    assert!(!controller.buffer().texts().contains(&"FIRST".to_string()));
    assert_eq!(controller.selection().current(), "FIRST");
}

#[tokio::test]
async fn test_restart_after_stop_uses_fresh_channel() {
    let (mut controller, connector) = controller_with(fast_config(), TestSource::default());
    controller.start(None).unwrap();
    connector.events(0).opened();
    controller.process_pending();
    controller.stop();

    controller.start(None).unwrap();
    assert_eq!(connector.count(), 2);

    // The old connection reporting open must not affect the new session
    connector.events(0).opened();
    assert_eq!(controller.process_pending(), vec![SessionUpdate::Ignored]);
    assert_eq!(controller.state(), SessionState::Starting);

    connector.events(1).opened();
    assert_eq!(controller.process_pending(), vec![SessionUpdate::Detecting]);
}

fn reconnecting_config() -> plate_console::session::SessionConfig {
    let mut config = fast_config();
    config.reconnect = ReconnectPolicy {
        enabled: true,
        max_attempts: 2,
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(20),
    };
    config
}

#[tokio::test]
async fn test_channel_failure_schedules_reconnect() {
    let (mut controller, connector) = controller_with(reconnecting_config(), TestSource::default());
    controller.start(None).unwrap();
    connector.events(0).opened();
    controller.process_pending();

    connector.events(0).closed(CloseCause::TransportError("reset".to_string()));
    let updates = controller.process_pending();
    assert_eq!(updates, vec![SessionUpdate::Reconnecting { attempt: 1 }]);
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(controller.is_retry_pending());

    let event = tokio::time::timeout(Duration::from_secs(1), controller.next_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        controller.handle(event),
        SessionUpdate::Reconnecting { attempt: 1 }
    );
    assert_eq!(controller.state(), SessionState::Starting);
    assert_eq!(connector.count(), 2);

    connector.events(1).opened();
    assert_eq!(controller.process_pending(), vec![SessionUpdate::Detecting]);
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let (mut controller, connector) = controller_with(reconnecting_config(), TestSource::default());
    controller.start(None).unwrap();

    for index in 0..2 {
        connector.events(index).closed(CloseCause::ConnectTimeout);
        let updates = controller.process_pending();
        assert_eq!(updates, vec![SessionUpdate::Reconnecting { attempt: index as u32 + 1 }]);
        let event = tokio::time::timeout(Duration::from_secs(1), controller.next_event())
            .await
            .unwrap()
            .unwrap();
        controller.handle(event);
    }

    connector.events(2).closed(CloseCause::ConnectTimeout);
    let updates = controller.process_pending();
    assert_eq!(
        updates,
        vec![SessionUpdate::Stopped(StopCause::ChannelClosed(CloseCause::ConnectTimeout))]
    );
    assert!(!controller.is_retry_pending());
}

#[tokio::test]
async fn test_stop_cancels_pending_reconnect() {
    let (mut controller, connector) = controller_with(reconnecting_config(), TestSource::default());
    controller.start(None).unwrap();
    connector.events(0).closed(CloseCause::Remote);
    controller.process_pending();
    assert!(controller.is_retry_pending());

    controller.stop();
    assert!(!controller.is_retry_pending());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(controller.process_pending(), vec![SessionUpdate::Ignored]);
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(connector.count(), 1);
}

#[tokio::test]
async fn test_user_stop_never_reconnects() {
    let (mut controller, connector) = controller_with(reconnecting_config(), TestSource::default());
    controller.start(None).unwrap();
    connector.events(0).opened();
    controller.process_pending();
    controller.stop();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(controller.process_pending().is_empty());
    assert_eq!(connector.count(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_camera_ffmpeg_cannot_open_never_connects() {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;

    use common::FakeConnector;
    use plate_console::capture::{CaptureSource, FfmpegInput, FfmpegSource, Resolution};
    use plate_console::session::SessionController;

    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("ffmpeg");
    std::fs::write(
        &program,
        "#!/bin/sh\necho 'video=Gate Cam: Could not open video device' >&2\nexit 1\n",
    )
    .unwrap();
    std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

    let source = FfmpegSource::new(
        FfmpegInput::Camera {
            format: "dshow".to_string(),
            default_device: Some("video=Gate Cam".to_string()),
        },
        Resolution::PREVIEW,
    )
    .with_program(&program);
    let connector = FakeConnector::default();
    let mut controller = SessionController::new(fast_config(), source, Arc::new(connector.clone()));

    let err = controller.start(None).unwrap_err();
    assert_eq!(
        err,
        SessionError::Capture(CaptureError::DeviceNotFound("video=Gate Cam".to_string()))
    );
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(!controller.source().is_attached());
    assert_eq!(connector.count(), 0);
}
