//! Participant registry: the local mirror of every remote participant.
//!
//! Presence and media are tracked independently. An entry is created when a
//! participant is first seen (even if it never publishes) and removed only when
//! the transport reports the participant left. Unpublishing every track leaves
//! a placeholder entry behind with both flags off.
//!
//! The registry is owned by the call actor; every mutation below is a single
//! read-modify-write step with no suspension point in between.

use crate::classifier::VideoSource;
use crate::transport::{MediaKind, RemoteTrackHandle};
use common::types::ParticipantId;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// One remote participant's known media and status.
#[derive(Clone)]
pub struct RemoteParticipant {
    pub id: ParticipantId,
    pub audio_track: Option<RemoteTrackHandle>,
    /// Camera video.
    pub video_track: Option<RemoteTrackHandle>,
    pub screen_track: Option<RemoteTrackHandle>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl RemoteParticipant {
    fn placeholder(id: ParticipantId) -> Self {
        Self {
            id,
            audio_track: None,
            video_track: None,
            screen_track: None,
            audio_enabled: false,
            video_enabled: false,
        }
    }

    /// Whether any track is attached.
    #[must_use]
    pub fn has_tracks(&self) -> bool {
        self.audio_track.is_some() || self.video_track.is_some() || self.screen_track.is_some()
    }

    /// Read-only summary for the presentation layer.
    #[must_use]
    pub fn info(&self) -> RemoteParticipantInfo {
        RemoteParticipantInfo {
            participant_id: self.id.clone(),
            has_audio: self.audio_track.is_some(),
            has_video: self.video_track.is_some(),
            has_screen: self.screen_track.is_some(),
            audio_enabled: self.audio_enabled,
            video_enabled: self.video_enabled,
        }
    }

    /// Stop local playback/rendering of every attached track.
    pub fn stop_tracks(&self) {
        for track in [&self.audio_track, &self.video_track, &self.screen_track]
            .into_iter()
            .flatten()
        {
            track.stop();
        }
    }
}

impl fmt::Debug for RemoteParticipant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteParticipant")
            .field("id", &self.id)
            .field("has_audio", &self.audio_track.is_some())
            .field("has_video", &self.video_track.is_some())
            .field("has_screen", &self.screen_track.is_some())
            .field("audio_enabled", &self.audio_enabled)
            .field("video_enabled", &self.video_enabled)
            .finish()
    }
}

/// Summary of a remote participant, free of track handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteParticipantInfo {
    pub participant_id: ParticipantId,
    pub has_audio: bool,
    pub has_video: bool,
    pub has_screen: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

/// Remote participants keyed by identity.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    participants: HashMap<ParticipantId, RemoteParticipant>,
}

impl ParticipantRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&RemoteParticipant> {
        self.participants.get(id)
    }

    /// Summaries of all participants, ordered by identity.
    #[must_use]
    pub fn infos(&self) -> Vec<RemoteParticipantInfo> {
        let mut infos: Vec<_> = self
            .participants
            .values()
            .map(RemoteParticipant::info)
            .collect();
        infos.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        infos
    }

    /// Record that a participant is present. Returns `true` if a placeholder
    /// entry was inserted, `false` if one already existed.
    pub fn observe_presence(&mut self, id: &ParticipantId) -> bool {
        if self.participants.contains_key(id) {
            return false;
        }
        self.participants
            .insert(id.clone(), RemoteParticipant::placeholder(id.clone()));
        true
    }

    /// Remove a participant that left. Returns the removed entry so its
    /// tracks can be stopped.
    pub fn remove(&mut self, id: &ParticipantId) -> Option<RemoteParticipant> {
        self.participants.remove(id)
    }

    /// Store a subscribed audio track and mark audio enabled.
    pub fn attach_audio(
        &mut self,
        id: &ParticipantId,
        track: RemoteTrackHandle,
    ) -> RemoteParticipantInfo {
        let entry = self.entry(id);
        entry.audio_track = Some(track);
        entry.audio_enabled = true;
        entry.info()
    }

    /// Store a subscribed video track in the slot matching its source.
    ///
    /// Screen tracks do not touch `video_enabled`, which describes the camera.
    pub fn attach_video(
        &mut self,
        id: &ParticipantId,
        track: RemoteTrackHandle,
        source: VideoSource,
    ) -> RemoteParticipantInfo {
        let entry = self.entry(id);
        match source {
            VideoSource::Screen => {
                entry.screen_track = Some(track);
            }
            VideoSource::Camera => {
                entry.video_track = Some(track);
                entry.video_enabled = true;
            }
        }
        entry.info()
    }

    /// Drop the track of `kind` after an unpublish. Returns the detached
    /// track, or `None` if the participant or track was unknown.
    ///
    /// The transport only reports the media kind, so a video unpublish
    /// detaches the screen track when it is the only video the participant
    /// has, and the camera track otherwise. The entry itself stays.
    pub fn detach(&mut self, id: &ParticipantId, kind: MediaKind) -> Option<RemoteTrackHandle> {
        let entry = self.participants.get_mut(id)?;
        match kind {
            MediaKind::Audio => {
                entry.audio_enabled = false;
                entry.audio_track.take()
            }
            MediaKind::Video => {
                if entry.video_track.is_none() && entry.screen_track.is_some() {
                    entry.screen_track.take()
                } else {
                    entry.video_enabled = false;
                    entry.video_track.take()
                }
            }
        }
    }

    /// Merge a peer's status report, creating the entry if needed. Only the
    /// flags present are overwritten.
    pub fn apply_status(
        &mut self,
        id: &ParticipantId,
        audio_enabled: Option<bool>,
        video_enabled: Option<bool>,
    ) -> RemoteParticipantInfo {
        let entry = self.entry(id);
        if let Some(audio) = audio_enabled {
            entry.audio_enabled = audio;
        }
        if let Some(video) = video_enabled {
            entry.video_enabled = video;
        }
        entry.info()
    }

    /// Remove every entry, returning them so their tracks can be stopped.
    pub fn clear(&mut self) -> Vec<RemoteParticipant> {
        self.participants.drain().map(|(_, p)| p).collect()
    }

    fn entry(&mut self, id: &ParticipantId) -> &mut RemoteParticipant {
        self.participants
            .entry(id.clone())
            .or_insert_with(|| RemoteParticipant::placeholder(id.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::transport::{RemoteTrack, TransportError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct StubTrack {
        stopped: AtomicBool,
    }

    impl RemoteTrack for StubTrack {
        fn kind(&self) -> MediaKind {
            MediaKind::Video
        }
        fn play(&self) -> Result<(), TransportError> {
            Ok(())
        }
        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn display_surface(&self) -> Result<Option<String>, TransportError> {
            Ok(None)
        }
        fn label(&self) -> Result<Option<String>, TransportError> {
            Ok(None)
        }
    }

    fn track() -> RemoteTrackHandle {
        Arc::new(StubTrack::default())
    }

    fn id(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    #[test]
    fn test_presence_creates_placeholder_once() {
        let mut registry = ParticipantRegistry::new();

        assert!(registry.observe_presence(&id("a")));
        assert!(!registry.observe_presence(&id("a")));
        assert_eq!(registry.len(), 1);

        let entry = registry.get(&id("a")).unwrap();
        assert!(!entry.has_tracks());
        assert!(!entry.audio_enabled);
        assert!(!entry.video_enabled);
    }

    #[test]
    fn test_presence_does_not_reset_existing_media() {
        let mut registry = ParticipantRegistry::new();
        registry.attach_audio(&id("a"), track());

        registry.observe_presence(&id("a"));

        let entry = registry.get(&id("a")).unwrap();
        assert!(entry.audio_track.is_some());
        assert!(entry.audio_enabled);
    }

    #[test]
    fn test_presence_then_left_leaves_nothing() {
        let mut registry = ParticipantRegistry::new();
        registry.observe_presence(&id("a"));

        assert!(registry.remove(&id("a")).is_some());
        assert!(!registry.contains(&id("a")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_attach_video_by_source() {
        let mut registry = ParticipantRegistry::new();

        let info = registry.attach_video(&id("a"), track(), VideoSource::Screen);
        assert!(info.has_screen);
        assert!(!info.has_video);
        assert!(!info.video_enabled);

        let info = registry.attach_video(&id("a"), track(), VideoSource::Camera);
        assert!(info.has_video);
        assert!(info.video_enabled);
        assert!(info.has_screen);
    }

    #[test]
    fn test_detach_keeps_entry_and_clears_flag() {
        let mut registry = ParticipantRegistry::new();
        registry.attach_audio(&id("a"), track());
        registry.attach_video(&id("a"), track(), VideoSource::Camera);

        assert!(registry.detach(&id("a"), MediaKind::Audio).is_some());
        let entry = registry.get(&id("a")).unwrap();
        assert!(entry.audio_track.is_none());
        assert!(!entry.audio_enabled);
        assert!(entry.video_enabled);

        assert!(registry.detach(&id("a"), MediaKind::Video).is_some());
        let entry = registry.get(&id("a")).unwrap();
        assert!(!entry.has_tracks());
        assert!(!entry.video_enabled);
        assert!(registry.contains(&id("a")));
    }

    #[test]
    fn test_detach_video_prefers_lone_screen_track() {
        let mut registry = ParticipantRegistry::new();
        registry.attach_video(&id("a"), track(), VideoSource::Screen);

        assert!(registry.detach(&id("a"), MediaKind::Video).is_some());
        assert!(registry.get(&id("a")).unwrap().screen_track.is_none());
    }

    #[test]
    fn test_detach_unknown_is_none() {
        let mut registry = ParticipantRegistry::new();
        assert!(registry.detach(&id("ghost"), MediaKind::Audio).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_apply_status_merges_present_fields_only() {
        let mut registry = ParticipantRegistry::new();
        registry.attach_audio(&id("a"), track());
        registry.attach_video(&id("a"), track(), VideoSource::Camera);

        let info = registry.apply_status(&id("a"), Some(false), None);
        assert!(!info.audio_enabled);
        assert!(info.video_enabled);
        assert!(info.has_audio);

        let info = registry.apply_status(&id("a"), None, Some(false));
        assert!(!info.audio_enabled);
        assert!(!info.video_enabled);
    }

    #[test]
    fn test_apply_status_creates_missing_entry() {
        let mut registry = ParticipantRegistry::new();

        let info = registry.apply_status(&id("late"), Some(true), None);

        assert!(registry.contains(&id("late")));
        assert!(info.audio_enabled);
        assert!(!info.has_audio);
    }

    #[test]
    fn test_clear_returns_entries_for_cleanup() {
        let mut registry = ParticipantRegistry::new();
        let stub = Arc::new(StubTrack::default());
        registry.attach_video(
            &id("a"),
            Arc::clone(&stub) as RemoteTrackHandle,
            VideoSource::Camera,
        );
        registry.observe_presence(&id("b"));

        let removed = registry.clear();
        assert_eq!(removed.len(), 2);
        assert!(registry.is_empty());

        for participant in &removed {
            participant.stop_tracks();
        }
        assert!(stub.stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_infos_sorted() {
        let mut registry = ParticipantRegistry::new();
        registry.observe_presence(&id("charlie"));
        registry.observe_presence(&id("alice"));
        registry.observe_presence(&id("bob"));

        let ids: Vec<_> = registry
            .infos()
            .into_iter()
            .map(|i| i.participant_id.to_string())
            .collect();
        assert_eq!(ids, ["alice", "bob", "charlie"]);
    }
}
