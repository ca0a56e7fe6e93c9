//! Message types for the call actor.
//!
//! Every `CallHandle` operation is a `CallMessage` sent over `tokio::sync::mpsc`;
//! replies come back on a `tokio::sync::oneshot`. State changes fan out to
//! subscribers as `CallUpdate`s over `tokio::sync::broadcast`.

use crate::errors::CallError;
use crate::local_media::{LocalMediaSnapshot, ScreenShareState};
use crate::moderation::{ControlMessage, ModerationSnapshot};
use crate::registry::RemoteParticipantInfo;
use chrono::{DateTime, Utc};
use common::types::{ChannelId, ParticipantId};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::oneshot;

/// Messages sent to `CallActor`.
#[derive(Debug)]
pub enum CallMessage {
    /// Join the call. Resolves once the join settles.
    Join {
        respond_to: oneshot::Sender<Result<ConnectionState, CallError>>,
    },

    /// Leave the call (best-effort).
    Leave {
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Flip the local microphone.
    ToggleMicrophone {
        respond_to: oneshot::Sender<Result<Option<bool>, CallError>>,
    },

    /// Flip the local camera.
    ToggleCamera {
        respond_to: oneshot::Sender<Result<Option<bool>, CallError>>,
    },

    /// Start or stop the screen share. Resolves once a start settles.
    ToggleScreenShare {
        respond_to: oneshot::Sender<Result<ScreenShareState, CallError>>,
    },

    /// Local moderation action on a remote participant.
    Moderate {
        participant_id: ParticipantId,
        action: ModerationAction,
        /// `true` if the moderation sets changed.
        respond_to: oneshot::Sender<bool>,
    },

    /// Send a control message on the primary session.
    SendControl {
        message: ControlMessage,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Read the full call state.
    GetSnapshot {
        respond_to: oneshot::Sender<CallSnapshot>,
    },

    /// Read one remote participant.
    GetParticipant {
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Option<RemoteParticipantInfo>>,
    },
}

/// Local moderation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Mute,
    Unmute,
    DisableVideo,
    EnableVideo,
    Block,
    Unblock,
}

impl ModerationAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ModerationAction::Mute => "mute",
            ModerationAction::Unmute => "unmute",
            ModerationAction::DisableVideo => "disable_video",
            ModerationAction::EnableVideo => "enable_video",
            ModerationAction::Block => "block",
            ModerationAction::Unblock => "unblock",
        }
    }
}

/// Connection state of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Leaving,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Leaving => "leaving",
        }
    }
}

/// Read model of the whole call.
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub channel_id: ChannelId,
    pub connection_state: ConnectionState,
    /// Identity of the primary session, once known.
    pub local_identity: Option<ParticipantId>,
    /// Identity of the auxiliary (screen) session, once known.
    pub screen_identity: Option<ParticipantId>,
    pub local_media: LocalMediaSnapshot,
    /// Remote participants ordered by identity.
    pub participants: Vec<RemoteParticipantInfo>,
    pub moderation: ModerationSnapshot,
    pub speaking: BTreeSet<ParticipantId>,
    /// UI-safe message of the last failed join or screen share, cleared by
    /// the next successful attempt.
    pub last_error: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
}

/// Change notifications for subscribers.
///
/// Subscribers that lag lose updates; the snapshot stays authoritative.
#[derive(Debug, Clone, PartialEq)]
pub enum CallUpdate {
    ConnectionChanged(ConnectionState),
    ParticipantJoined(ParticipantId),
    ParticipantLeft(ParticipantId),
    /// A registry entry's tracks or flags changed.
    ParticipantUpdated(RemoteParticipantInfo),
    SpeakingStarted(ParticipantId),
    SpeakingStopped(ParticipantId),
    ModerationChanged(ModerationSnapshot),
    LocalMediaChanged(LocalMediaSnapshot),
    /// UI-safe error message.
    Error(String),
}
