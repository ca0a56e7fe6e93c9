//! Moderation control channel.
//!
//! A thin signaling convention carried on the primary session's data channel:
//! small JSON objects discriminated by `type`. Nothing here is authenticated.
//! Any peer can send `block` for any identity and the local `blocked` set
//! cannot tell a peer's request from a local action. The sets are advisory UI
//! state and stop no media by themselves.
//!
//! Wire format:
//!
//! ```text
//! { "type": "block",   "uid": <participant-id> }
//! { "type": "unblock", "uid": <participant-id> }
//! { "type": "status_update", "uid": <participant-id>,
//!   "audioEnabled"?: <bool>, "videoEnabled"?: <bool> }
//! ```

use crate::registry::{ParticipantRegistry, RemoteParticipantInfo};
use bytes::Bytes;
use common::types::ParticipantId;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// A control message on the data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Block {
        #[serde(deserialize_with = "uid_from_json")]
        uid: ParticipantId,
    },
    Unblock {
        #[serde(deserialize_with = "uid_from_json")]
        uid: ParticipantId,
    },
    StatusUpdate {
        #[serde(deserialize_with = "uid_from_json")]
        uid: ParticipantId,
        #[serde(
            rename = "audioEnabled",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        audio_enabled: Option<bool>,
        #[serde(
            rename = "videoEnabled",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        video_enabled: Option<bool>,
    },
}

impl ControlMessage {
    /// Message type as a string for log fields and metric labels.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            ControlMessage::Block { .. } => "block",
            ControlMessage::Unblock { .. } => "unblock",
            ControlMessage::StatusUpdate { .. } => "status_update",
        }
    }

    /// Encode as UTF-8 JSON.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Transports commonly use numeric uids; accept either a string or an integer.
fn uid_from_json<'de, D>(deserializer: D) -> Result<ParticipantId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireUid {
        Text(String),
        Number(u64),
    }

    match WireUid::deserialize(deserializer)? {
        WireUid::Text(s) => Ok(ParticipantId::new(s)),
        WireUid::Number(n) => Ok(ParticipantId::from(n)),
    }
}

/// Why an inbound payload was dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("payload is not valid JSON")]
    NotJson,

    #[error("unrecognized control message")]
    Unrecognized,
}

impl DecodeError {
    /// Reason as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DecodeError::NotUtf8 => "not_utf8",
            DecodeError::NotJson => "not_json",
            DecodeError::Unrecognized => "unrecognized",
        }
    }
}

/// Decode an inbound payload. Never panics; callers drop any `Err`.
pub fn decode(payload: &[u8]) -> Result<ControlMessage, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    let value: serde_json::Value = serde_json::from_str(text).map_err(|_| DecodeError::NotJson)?;
    ControlMessage::deserialize(value).map_err(|_| DecodeError::Unrecognized)
}

/// Local moderation sets.
#[derive(Debug, Default)]
pub struct ModerationState {
    muted: BTreeSet<ParticipantId>,
    video_disabled: BTreeSet<ParticipantId>,
    blocked: BTreeSet<ParticipantId>,
}

/// Copy of the moderation sets for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModerationSnapshot {
    pub muted: BTreeSet<ParticipantId>,
    pub video_disabled: BTreeSet<ParticipantId>,
    pub blocked: BTreeSet<ParticipantId>,
}

/// Which moderation set an action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationSet {
    Muted,
    VideoDisabled,
    Blocked,
}

impl ModerationState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to `set`. Returns `true` if the set changed.
    pub fn insert(&mut self, set: ModerationSet, id: ParticipantId) -> bool {
        self.set_mut(set).insert(id)
    }

    /// Remove `id` from `set`. Returns `true` if the set changed.
    pub fn remove(&mut self, set: ModerationSet, id: &ParticipantId) -> bool {
        self.set_mut(set).remove(id)
    }

    #[must_use]
    pub fn contains(&self, set: ModerationSet, id: &ParticipantId) -> bool {
        match set {
            ModerationSet::Muted => self.muted.contains(id),
            ModerationSet::VideoDisabled => self.video_disabled.contains(id),
            ModerationSet::Blocked => self.blocked.contains(id),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ModerationSnapshot {
        ModerationSnapshot {
            muted: self.muted.clone(),
            video_disabled: self.video_disabled.clone(),
            blocked: self.blocked.clone(),
        }
    }

    fn set_mut(&mut self, set: ModerationSet) -> &mut BTreeSet<ParticipantId> {
        match set {
            ModerationSet::Muted => &mut self.muted,
            ModerationSet::VideoDisabled => &mut self.video_disabled,
            ModerationSet::Blocked => &mut self.blocked,
        }
    }
}

/// State touched by an inbound control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEffect {
    /// A moderation set changed.
    Moderation,
    /// A registry entry was created or updated.
    Participant(RemoteParticipantInfo),
    /// The message repeated existing state.
    Unchanged,
}

/// Fold an inbound control message into local state.
pub fn apply_control(
    message: ControlMessage,
    moderation: &mut ModerationState,
    registry: &mut ParticipantRegistry,
) -> ControlEffect {
    let changed = match message {
        ControlMessage::Block { uid } => moderation.insert(ModerationSet::Blocked, uid),
        ControlMessage::Unblock { uid } => moderation.remove(ModerationSet::Blocked, &uid),
        ControlMessage::StatusUpdate {
            uid,
            audio_enabled,
            video_enabled,
        } => {
            return ControlEffect::Participant(registry.apply_status(
                &uid,
                audio_enabled,
                video_enabled,
            ));
        }
    };

    if changed {
        ControlEffect::Moderation
    } else {
        ControlEffect::Unchanged
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn id(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    #[test]
    fn test_decode_block_and_unblock() {
        assert_eq!(
            decode(br#"{"type":"block","uid":"X"}"#),
            Ok(ControlMessage::Block { uid: id("X") })
        );
        assert_eq!(
            decode(br#"{"type":"unblock","uid":"X"}"#),
            Ok(ControlMessage::Unblock { uid: id("X") })
        );
    }

    #[test]
    fn test_decode_numeric_uid() {
        assert_eq!(
            decode(br#"{"type":"block","uid":4242}"#),
            Ok(ControlMessage::Block { uid: id("4242") })
        );
    }

    #[test]
    fn test_decode_status_update_optional_fields() {
        assert_eq!(
            decode(br#"{"type":"status_update","uid":"a","audioEnabled":false}"#),
            Ok(ControlMessage::StatusUpdate {
                uid: id("a"),
                audio_enabled: Some(false),
                video_enabled: None,
            })
        );
        assert_eq!(
            decode(br#"{"type":"status_update","uid":"a"}"#),
            Ok(ControlMessage::StatusUpdate {
                uid: id("a"),
                audio_enabled: None,
                video_enabled: None,
            })
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode(&[0xff, 0xfe, 0x00]), Err(DecodeError::NotUtf8));
        assert_eq!(decode(b"{not json"), Err(DecodeError::NotJson));
        assert_eq!(decode(b""), Err(DecodeError::NotJson));
        assert_eq!(
            decode(br#"{"type":"kick","uid":"X"}"#),
            Err(DecodeError::Unrecognized)
        );
        assert_eq!(decode(br#"{"type":"block"}"#), Err(DecodeError::Unrecognized));
        assert_eq!(decode(br#"{"uid":"X"}"#), Err(DecodeError::Unrecognized));
        assert_eq!(decode(br#"["block","X"]"#), Err(DecodeError::Unrecognized));
        assert_eq!(
            decode(br#"{"type":"status_update","uid":"a","audioEnabled":"yes"}"#),
            Err(DecodeError::Unrecognized)
        );
    }

    #[test]
    fn test_encode_uses_wire_field_names() {
        let message = ControlMessage::StatusUpdate {
            uid: id("me"),
            audio_enabled: Some(true),
            video_enabled: None,
        };
        let bytes = message.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["type"], "status_update");
        assert_eq!(value["uid"], "me");
        assert_eq!(value["audioEnabled"], true);
        assert!(value.get("videoEnabled").is_none());
    }

    #[test]
    fn test_block_unblock_round_trip_through_state() {
        let mut moderation = ModerationState::new();
        let mut registry = ParticipantRegistry::new();

        let effect = apply_control(
            decode(br#"{"type":"block","uid":"X"}"#).unwrap(),
            &mut moderation,
            &mut registry,
        );
        assert_eq!(effect, ControlEffect::Moderation);
        assert!(moderation.contains(ModerationSet::Blocked, &id("X")));

        let effect = apply_control(
            ControlMessage::Block { uid: id("X") },
            &mut moderation,
            &mut registry,
        );
        assert_eq!(effect, ControlEffect::Unchanged);

        apply_control(
            decode(br#"{"type":"unblock","uid":"X"}"#).unwrap(),
            &mut moderation,
            &mut registry,
        );
        assert!(!moderation.contains(ModerationSet::Blocked, &id("X")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_status_update_lands_in_registry() {
        let mut moderation = ModerationState::new();
        let mut registry = ParticipantRegistry::new();

        let effect = apply_control(
            ControlMessage::StatusUpdate {
                uid: id("a"),
                audio_enabled: None,
                video_enabled: Some(true),
            },
            &mut moderation,
            &mut registry,
        );

        assert_eq!(
            effect,
            ControlEffect::Participant(RemoteParticipantInfo {
                participant_id: id("a"),
                has_audio: false,
                has_video: false,
                has_screen: false,
                audio_enabled: false,
                video_enabled: true,
            })
        );
        assert_eq!(moderation.snapshot(), ModerationSnapshot::default());
    }

    #[test]
    fn test_sets_are_independent() {
        let mut moderation = ModerationState::new();

        assert!(moderation.insert(ModerationSet::Muted, id("a")));
        assert!(moderation.insert(ModerationSet::VideoDisabled, id("a")));
        assert!(!moderation.contains(ModerationSet::Blocked, &id("a")));

        assert!(moderation.remove(ModerationSet::Muted, &id("a")));
        assert!(!moderation.remove(ModerationSet::Muted, &id("a")));
        assert!(moderation.contains(ModerationSet::VideoDisabled, &id("a")));
    }
}
