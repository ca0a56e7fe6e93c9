//! Metrics definitions for the call session coordinator.
//!
//! Naming follows Prometheus conventions:
//! - `call_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Every label value comes from a closed set in code:
//! - `status`: success, already_connected, track_error, transport_error
//! - `direction`: inbound, outbound
//! - `message_type`: block, unblock, status_update
//! - `reason`: not_utf8, not_json, unrecognized, own_identity
//! - `source`: camera, screen
//! - `event`: bounded by `TransportEvent` variants
//!
//! Participant identifiers are never used as labels.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Join / Screen Share
// ============================================================================

/// Record a settled join attempt.
///
/// Metrics: `call_join_total`, `call_join_duration_seconds`
/// Labels: `status`
pub fn record_join(status: &'static str, duration: Duration) {
    counter!("call_join_total", "status" => status).increment(1);
    histogram!("call_join_duration_seconds", "status" => status).record(duration.as_secs_f64());
}

/// Record a screen share start attempt.
///
/// Metric: `call_screen_share_total`
/// Labels: `status` (success, no_system_audio, error)
pub fn record_screen_share(status: &'static str) {
    counter!("call_screen_share_total", "status" => status).increment(1);
}

// ============================================================================
// Registry / Speaking (Gauges)
// ============================================================================

/// Set the number of remote participants in the registry.
///
/// Metric: `call_participants_active`
pub fn set_participants_active(count: usize) {
    // usize to f64 conversion is safe for realistic participant counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("call_participants_active").set(count as f64);
}

/// Set the number of participants currently speaking.
///
/// Metric: `call_speaking_active`
pub fn set_speaking_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("call_speaking_active").set(count as f64);
}

// ============================================================================
// Control Channel
// ============================================================================

/// Record a control message sent or received.
///
/// Metric: `call_control_messages_total`
/// Labels: `direction`, `message_type`
pub fn record_control_message(direction: &'static str, message_type: &'static str) {
    counter!(
        "call_control_messages_total",
        "direction" => direction,
        "message_type" => message_type
    )
    .increment(1);
}

/// Record an inbound payload that could not be decoded.
///
/// Metric: `call_control_messages_dropped_total`
/// Labels: `reason`
pub fn record_control_dropped(reason: &'static str) {
    counter!("call_control_messages_dropped_total", "reason" => reason).increment(1);
}

// ============================================================================
// Event Handling
// ============================================================================

/// Record a remote video classification.
///
/// Metric: `call_video_classification_total`
/// Labels: `source`
pub fn record_video_classification(source: &'static str) {
    counter!("call_video_classification_total", "source" => source).increment(1);
}

/// Record a failure swallowed inside a transport event handler.
///
/// Metric: `call_event_handler_errors_total`
/// Labels: `event`
pub fn record_event_handler_error(event: &'static str) {
    counter!("call_event_handler_errors_total", "event" => event).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use metrics_util::MetricKind;

    #[test]
    fn test_record_join() {
        record_join("success", Duration::from_millis(120));
        record_join("already_connected", Duration::from_millis(5));
        record_join("track_error", Duration::from_secs(3));
        record_join("transport_error", Duration::from_millis(900));
    }

    #[test]
    fn test_gauges() {
        set_participants_active(0);
        set_participants_active(12);
        set_speaking_active(0);
        set_speaking_active(3);
    }

    #[test]
    fn test_control_counters() {
        record_control_message("inbound", "block");
        record_control_message("outbound", "status_update");
        record_control_dropped("not_json");
        record_control_dropped("unrecognized");
    }

    #[test]
    fn test_event_counters() {
        record_video_classification("camera");
        record_video_classification("screen");
        record_event_handler_error("media_published");
        record_screen_share("no_system_audio");
    }

    #[test]
    fn test_metrics_are_captured_by_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_join("success", Duration::from_millis(250));
            record_control_message("inbound", "block");
            record_control_message("inbound", "block");
            set_participants_active(4);
        });

        let metrics = snapshotter.snapshot().into_vec();

        let join_total = metrics.iter().find(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter && key.key().name() == "call_join_total"
        });
        assert!(matches!(join_total, Some((_, _, _, DebugValue::Counter(1)))));

        let control_total = metrics.iter().find(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter && key.key().name() == "call_control_messages_total"
        });
        assert!(matches!(control_total, Some((_, _, _, DebugValue::Counter(2)))));

        let participants = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "call_participants_active");
        assert!(matches!(
            participants,
            Some((_, _, _, DebugValue::Gauge(v))) if v.into_inner() == 4.0
        ));

        assert!(metrics
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "call_join_duration_seconds"));
    }
}
