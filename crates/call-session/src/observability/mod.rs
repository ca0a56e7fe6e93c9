//! Observability for the call session coordinator.
//!
//! The coordinator records through the `metrics` facade only; the embedding
//! application installs whatever recorder/exporter it uses. Logging is
//! `tracing` with one target per component:
//!
//! | Target | Component |
//! |--------|-----------|
//! | `call.actor` | Actor loop, handle plumbing, teardown |
//! | `call.session` | Join/leave across the two transport sessions |
//! | `call.registry` | Lifecycle events, subscribe, classification |
//! | `call.moderation` | Control channel, moderation sets |
//! | `call.speaking` | Speaking detector |
//! | `call.media` | Local tracks, screen share |
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `call_join_total` | Counter | `status` | Join outcomes |
//! | `call_join_duration_seconds` | Histogram | `status` | Time from join request to settle |
//! | `call_participants_active` | Gauge | none | Remote participants in the registry |
//! | `call_speaking_active` | Gauge | none | Participants currently speaking |
//! | `call_control_messages_total` | Counter | `direction`, `message_type` | Control channel traffic |
//! | `call_control_messages_dropped_total` | Counter | `reason` | Inbound payloads that were undecodable or about ourselves |
//! | `call_video_classification_total` | Counter | `source` | Camera vs. screen results |
//! | `call_event_handler_errors_total` | Counter | `event` | Swallowed event handler failures |
//! | `call_screen_share_total` | Counter | `status` | Screen share start outcomes |

pub mod metrics;

pub use metrics::{
    record_control_dropped, record_control_message, record_event_handler_error, record_join,
    record_screen_share, record_video_classification, set_participants_active,
    set_speaking_active,
};
