//! Integration tests for joining a call across both transport sessions.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use call_session::transport::TransportError;
use call_session::{CallError, CallUpdate, ConnectionState};
use call_test_utils::{
    init_test_tracing, test_config, wait_until, MockMediaDevices, MockTransport, TestCall,
    TEST_LOCAL_IDENTITY, TEST_SCREEN_IDENTITY,
};
use common::secret::SecretString;
use common::types::ParticipantId;

#[tokio::test]
async fn test_join_publishes_disabled_microphone_and_camera() {
    init_test_tracing();
    let call = TestCall::joined().await;

    let microphone = call.devices.microphone().unwrap();
    let camera = call.devices.camera().unwrap();
    assert!(!microphone.is_enabled());
    assert!(!camera.is_enabled());

    assert_eq!(call.primary.published().len(), 2);
    assert!(call.auxiliary.published().is_empty());

    let snapshot = call.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.connection_state, ConnectionState::Connected);
    assert!(snapshot.local_media.has_microphone);
    assert!(snapshot.local_media.has_camera);
    assert!(!snapshot.local_media.microphone_enabled);
    assert!(!snapshot.local_media.camera_enabled);
    assert!(snapshot.joined_at.is_some());
    assert!(snapshot.last_error.is_none());

    call.shutdown().await;
}

#[tokio::test]
async fn test_join_resolves_both_identities() {
    let call = TestCall::joined().await;

    let snapshot = call.handle.snapshot().await.unwrap();
    assert_eq!(
        snapshot.local_identity,
        Some(ParticipantId::from(TEST_LOCAL_IDENTITY))
    );
    assert_eq!(
        snapshot.screen_identity,
        Some(ParticipantId::from(TEST_SCREEN_IDENTITY))
    );

    call.shutdown().await;
}

#[tokio::test]
async fn test_sessions_use_their_own_credentials() {
    let config = test_config()
        .with_screen_token(SecretString::from("screen-token"))
        .with_identities(Some(ParticipantId::from("42")), None);
    let call = TestCall::spawn(
        config,
        MockTransport::with_identity(TEST_LOCAL_IDENTITY),
        MockTransport::with_identity(TEST_SCREEN_IDENTITY),
        MockMediaDevices::granting(),
    );
    call.handle.join().await.unwrap();

    let primary = call.primary.last_connect().unwrap();
    let auxiliary = call.auxiliary.last_connect().unwrap();
    assert_eq!(primary.credential, "test-token");
    assert_eq!(primary.identity, Some(ParticipantId::from("42")));
    assert_eq!(auxiliary.credential, "screen-token");
    assert_eq!(auxiliary.identity, None);
    assert_eq!(primary.channel, auxiliary.channel);

    let snapshot = call.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.local_identity, Some(ParticipantId::from("42")));

    call.shutdown().await;
}

#[tokio::test]
async fn test_join_emits_state_updates() {
    let call = TestCall::start();
    let mut updates = call.handle.subscribe();

    call.handle.join().await.unwrap();

    assert_eq!(
        updates.recv().await.unwrap(),
        CallUpdate::ConnectionChanged(ConnectionState::Connecting)
    );
    assert_eq!(
        updates.recv().await.unwrap(),
        CallUpdate::ConnectionChanged(ConnectionState::Connected)
    );
    assert!(matches!(
        updates.recv().await.unwrap(),
        CallUpdate::LocalMediaChanged(media) if media.has_microphone && !media.microphone_enabled
    ));

    call.shutdown().await;
}

#[tokio::test]
async fn test_second_join_while_connected_is_noop() {
    let call = TestCall::joined().await;

    let state = call.handle.join().await.unwrap();

    assert_eq!(state, ConnectionState::Connected);
    assert_eq!(call.primary.connect_calls(), 1);
    assert_eq!(call.auxiliary.connect_calls(), 1);
    assert_eq!(call.devices.microphones_created(), 1);
    assert_eq!(call.primary.publish_calls(), 1);

    call.shutdown().await;
}

#[tokio::test]
async fn test_second_join_while_connecting_is_noop() {
    let call = TestCall::spawn(
        test_config(),
        MockTransport::builder()
            .identity(TEST_LOCAL_IDENTITY)
            .hold_connect()
            .build(),
        MockTransport::with_identity(TEST_SCREEN_IDENTITY),
        MockMediaDevices::granting(),
    );

    let first = tokio::spawn({
        let handle = call.handle.clone();
        async move { handle.join().await }
    });
    let primary = call.primary.clone();
    wait_until(|| primary.connect_calls() == 1).await;

    // Queries are served while the join is in flight.
    let snapshot = call.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.connection_state, ConnectionState::Connecting);

    let second = call.handle.join().await.unwrap();
    assert_eq!(second, ConnectionState::Connecting);

    call.primary.release_connect();
    assert_eq!(first.await.unwrap().unwrap(), ConnectionState::Connected);

    assert_eq!(call.primary.connect_calls(), 1);
    assert_eq!(call.auxiliary.connect_calls(), 1);
    assert_eq!(call.devices.microphones_created(), 1);

    call.shutdown().await;
}

#[tokio::test]
async fn test_already_active_connect_reconciles_to_connected() {
    let call = TestCall::spawn(
        test_config(),
        MockTransport::builder()
            .fail_connect(TransportError::AlreadyConnected)
            .build(),
        MockTransport::with_identity(TEST_SCREEN_IDENTITY),
        MockMediaDevices::granting(),
    );

    let state = call.handle.join().await.unwrap();
    assert_eq!(state, ConnectionState::Connected);

    // Nothing past the connect step ran.
    assert_eq!(call.devices.microphones_created(), 0);
    assert_eq!(call.primary.publish_calls(), 0);
    assert_eq!(call.handle.toggle_microphone().await.unwrap(), None);

    let snapshot = call.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.connection_state, ConnectionState::Connected);
    assert!(!snapshot.local_media.has_microphone);
    assert!(snapshot.last_error.is_none());

    call.shutdown().await;
}

#[tokio::test]
async fn test_already_active_publish_keeps_tracks() {
    let call = TestCall::spawn(
        test_config(),
        MockTransport::builder()
            .identity(TEST_LOCAL_IDENTITY)
            .fail_publish(TransportError::AlreadyConnected)
            .build(),
        MockTransport::with_identity(TEST_SCREEN_IDENTITY),
        MockMediaDevices::granting(),
    );

    assert_eq!(
        call.handle.join().await.unwrap(),
        ConnectionState::Connected
    );
    assert!(!call.devices.microphone().unwrap().is_enabled());
    assert_eq!(call.handle.toggle_microphone().await.unwrap(), Some(true));

    call.shutdown().await;
}

#[tokio::test]
async fn test_camera_permission_failure_rolls_back() {
    let call = TestCall::spawn(
        test_config(),
        MockTransport::with_identity(TEST_LOCAL_IDENTITY),
        MockTransport::with_identity(TEST_SCREEN_IDENTITY),
        MockMediaDevices::builder()
            .fail_camera(TransportError::PermissionDenied("camera".to_string()))
            .build(),
    );

    let err = call.handle.join().await.unwrap_err();
    assert!(matches!(
        err,
        CallError::TrackCreation(TransportError::PermissionDenied(_))
    ));
    assert!(err.is_user_actionable());

    let microphone = call.devices.microphone().unwrap();
    assert!(microphone.is_stopped());
    assert_eq!(microphone.close_calls(), 1);
    assert_eq!(call.primary.disconnect_calls(), 1);
    assert_eq!(call.auxiliary.disconnect_calls(), 1);
    assert_eq!(call.primary.publish_calls(), 0);

    let snapshot = call.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.connection_state, ConnectionState::Idle);
    assert!(!snapshot.local_media.has_microphone);
    assert_eq!(
        snapshot.last_error.as_deref(),
        Some("Permission to use the device was denied")
    );

    call.shutdown().await;
}

#[tokio::test]
async fn test_connect_failure_disconnects_the_other_session() {
    let call = TestCall::spawn(
        test_config(),
        MockTransport::with_identity(TEST_LOCAL_IDENTITY),
        MockTransport::builder()
            .fail_connect(TransportError::Network("timeout".to_string()))
            .build(),
        MockMediaDevices::granting(),
    );
    let mut updates = call.handle.subscribe();

    let err = call.handle.join().await.unwrap_err();
    assert!(matches!(
        err,
        CallError::Transport(TransportError::Network(_))
    ));
    assert_eq!(call.primary.disconnect_calls(), 1);
    assert_eq!(call.devices.microphones_created(), 0);

    let mut saw_error = false;
    while let Ok(update) = updates.try_recv() {
        if let CallUpdate::Error(message) = update {
            assert_eq!(message, "Connection problem, please try again");
            saw_error = true;
        }
    }
    assert!(saw_error);

    let snapshot = call.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.connection_state, ConnectionState::Idle);

    call.shutdown().await;
}

#[tokio::test]
async fn test_join_retry_after_failure_runs_again() {
    let call = TestCall::spawn(
        test_config(),
        MockTransport::with_identity(TEST_LOCAL_IDENTITY),
        MockTransport::with_identity(TEST_SCREEN_IDENTITY),
        MockMediaDevices::builder()
            .fail_microphone(TransportError::DeviceUnavailable("busy".to_string()))
            .build(),
    );

    assert!(call.handle.join().await.is_err());
    let snapshot = call.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.connection_state, ConnectionState::Idle);
    assert_eq!(call.primary.connect_calls(), 1);

    // A retry runs the whole sequence again.
    assert!(call.handle.join().await.is_err());
    assert_eq!(call.primary.connect_calls(), 2);
    assert_eq!(call.primary.disconnect_calls(), 2);

    call.shutdown().await;
}
