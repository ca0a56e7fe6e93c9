//! Integration tests for speaking detection driven by volume telemetry.
//!
//! Time is paused so decay timers can be stepped deterministically.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use call_session::CallUpdate;
use call_test_utils::{pid, TestCall};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_speaker_added_then_removed_after_decay() {
    let call = TestCall::joined().await;

    call.primary.emit_volume(&[("A", 7)]).await;
    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(snapshot.speaking.contains(&pid("A")));

    sleep(Duration::from_millis(1100)).await;
    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(snapshot.speaking.contains(&pid("A")));

    sleep(Duration::from_millis(200)).await;
    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(snapshot.speaking.is_empty());

    call.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_new_sample_extends_speaking() {
    let call = TestCall::joined().await;

    call.primary.emit_volume(&[("A", 7)]).await;
    sleep(Duration::from_millis(1000)).await;
    call.primary.emit_volume(&[("A", 9)]).await;

    // Past the original 1.2 s mark.
    sleep(Duration::from_millis(500)).await;
    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(snapshot.speaking.contains(&pid("A")));

    // Past 1.2 s after the second sample.
    sleep(Duration::from_millis(800)).await;
    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(snapshot.speaking.is_empty());

    call.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_below_threshold_is_ignored() {
    let call = TestCall::joined().await;

    call.primary.emit_volume(&[("A", 4), ("B", 5), ("C", 0)]).await;

    let snapshot = call.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.speaking.into_iter().collect::<Vec<_>>(), vec![pid("B")]);

    call.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_speaking_updates_are_emitted_once_per_transition() {
    let call = TestCall::joined().await;
    let mut updates = call.handle.subscribe();

    call.primary.emit_volume(&[("A", 7)]).await;
    call.primary.emit_volume(&[("A", 8)]).await;
    sleep(Duration::from_millis(1300)).await;
    call.handle.snapshot().await.unwrap();

    let mut transitions = Vec::new();
    while let Ok(update) = updates.try_recv() {
        match update {
            CallUpdate::SpeakingStarted(id) => transitions.push(format!("started:{id}")),
            CallUpdate::SpeakingStopped(id) => transitions.push(format!("stopped:{id}")),
            _ => {}
        }
    }
    assert_eq!(transitions, vec!["started:A", "stopped:A"]);

    call.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_participant_left_stops_speaking() {
    let call = TestCall::joined().await;
    let mut updates = call.handle.subscribe();

    call.primary.emit_joined("A").await;
    call.primary.emit_volume(&[("A", 7)]).await;
    call.primary.emit_left("A").await;

    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(snapshot.speaking.is_empty());

    let stopped = std::iter::from_fn(|| updates.try_recv().ok())
        .filter(|update| matches!(update, CallUpdate::SpeakingStopped(_)))
        .count();
    assert_eq!(stopped, 1);

    // The cancelled timer does not fire later.
    sleep(Duration::from_secs(2)).await;
    call.handle.snapshot().await.unwrap();
    assert!(updates.try_recv().is_err());

    call.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_leave_clears_speaking() {
    let call = TestCall::joined().await;

    call.primary.emit_volume(&[("A", 7), ("B", 7)]).await;
    call.handle.leave().await.unwrap();

    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(snapshot.speaking.is_empty());

    call.shutdown().await;
}
