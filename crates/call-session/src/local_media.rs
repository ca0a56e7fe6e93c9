//! Local media: microphone, camera and screen share.
//!
//! Microphone and camera tracks are created and published by the join flow,
//! then handed to [`LocalMedia`]. Toggling them flips `enabled` on the
//! published track and never republishes. Screen share is a separate cycle on
//! the auxiliary session:
//!
//! ```text
//! Idle --toggle--> Starting --capture+publish ok--> Sharing
//!   ^                 |                                |
//!   +-----failure-----+                                |
//!   +------------toggle (stop, close, unpublish)-------+
//! ```

use crate::errors::CallError;
use crate::transport::{
    LocalTrackHandle, MediaDevices, ScreenCapture, ScreenCaptureOptions, SystemAudio,
    TransportError, TransportSession,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Screen share lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenShareState {
    Idle,
    /// Capture or auxiliary publish in flight.
    Starting,
    Sharing,
}

/// Local media flags for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalMediaSnapshot {
    pub has_microphone: bool,
    pub microphone_enabled: bool,
    pub has_camera: bool,
    pub camera_enabled: bool,
    pub screen_share: ScreenShareState,
    /// Whether the active screen share carries system audio.
    pub screen_audio: bool,
}

#[derive(Debug)]
enum Screen {
    Idle,
    Starting,
    Sharing(ScreenCapture),
}

/// Owner of the local tracks.
pub struct LocalMedia {
    microphone: Option<LocalTrackHandle>,
    microphone_enabled: bool,
    camera: Option<LocalTrackHandle>,
    camera_enabled: bool,
    screen: Screen,
}

impl Default for LocalMedia {
    fn default() -> Self {
        Self {
            microphone: None,
            microphone_enabled: false,
            camera: None,
            camera_enabled: false,
            screen: Screen::Idle,
        }
    }
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl LocalMedia {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of the tracks a join published. Both start disabled.
    pub fn install(
        &mut self,
        microphone: Option<LocalTrackHandle>,
        camera: Option<LocalTrackHandle>,
    ) {
        self.microphone = microphone;
        self.microphone_enabled = false;
        self.camera = camera;
        self.camera_enabled = false;
    }

    /// Flip the microphone. Returns the new `enabled` value, or `None` when
    /// no microphone track exists yet.
    pub fn toggle_microphone(&mut self) -> Result<Option<bool>, CallError> {
        toggle(self.microphone.as_ref(), &mut self.microphone_enabled, "microphone")
    }

    /// Flip the camera. Returns the new `enabled` value, or `None` when no
    /// camera track exists yet.
    pub fn toggle_camera(&mut self) -> Result<Option<bool>, CallError> {
        toggle(self.camera.as_ref(), &mut self.camera_enabled, "camera")
    }

    #[must_use]
    pub fn microphone_enabled(&self) -> bool {
        self.microphone_enabled
    }

    #[must_use]
    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    #[must_use]
    pub fn screen_state(&self) -> ScreenShareState {
        match self.screen {
            Screen::Idle => ScreenShareState::Idle,
            Screen::Starting => ScreenShareState::Starting,
            Screen::Sharing(_) => ScreenShareState::Sharing,
        }
    }

    /// Move Idle -> Starting. Returns `false` in any other state.
    pub fn begin_screen_share(&mut self) -> bool {
        if matches!(self.screen, Screen::Idle) {
            self.screen = Screen::Starting;
            true
        } else {
            false
        }
    }

    /// Settle a start: Starting -> Sharing. A capture that arrives in any
    /// other state (the call ended meanwhile) is handed back to the caller.
    pub fn complete_screen_share(&mut self, capture: ScreenCapture) -> Result<(), ScreenCapture> {
        if matches!(self.screen, Screen::Starting) {
            self.screen = Screen::Sharing(capture);
            Ok(())
        } else {
            Err(capture)
        }
    }

    /// Starting -> Idle after a failed start.
    pub fn abort_screen_share(&mut self) {
        if matches!(self.screen, Screen::Starting) {
            self.screen = Screen::Idle;
        }
    }

    /// Sharing -> Idle, returning the capture to stop and unpublish.
    pub fn take_screen_share(&mut self) -> Option<ScreenCapture> {
        match std::mem::replace(&mut self.screen, Screen::Idle) {
            Screen::Sharing(capture) => Some(capture),
            other => {
                self.screen = other;
                None
            }
        }
    }

    /// Drop every local track and reset all flags. Returns the tracks so the
    /// caller can stop and close them.
    pub fn take_all(&mut self) -> Vec<LocalTrackHandle> {
        let mut tracks = Vec::new();
        tracks.extend(self.microphone.take());
        tracks.extend(self.camera.take());
        if let Screen::Sharing(capture) = std::mem::replace(&mut self.screen, Screen::Idle) {
            tracks.extend(capture.tracks());
        }
        self.microphone_enabled = false;
        self.camera_enabled = false;
        tracks
    }

    #[must_use]
    pub fn snapshot(&self) -> LocalMediaSnapshot {
        LocalMediaSnapshot {
            has_microphone: self.microphone.is_some(),
            microphone_enabled: self.microphone_enabled,
            has_camera: self.camera.is_some(),
            camera_enabled: self.camera_enabled,
            screen_share: self.screen_state(),
            screen_audio: matches!(&self.screen, Screen::Sharing(c) if c.audio.is_some()),
        }
    }
}

fn toggle(
    track: Option<&LocalTrackHandle>,
    enabled: &mut bool,
    name: &'static str,
) -> Result<Option<bool>, CallError> {
    let Some(track) = track else {
        debug!(target: "call.media", track = name, "Toggle before track exists, ignoring");
        return Ok(None);
    };

    let next = !*enabled;
    track.set_enabled(next).map_err(CallError::Transport)?;
    *enabled = next;

    debug!(target: "call.media", track = name, enabled = next, "Local track toggled");
    Ok(Some(next))
}

/// Stop and close local tracks.
pub fn release_tracks(tracks: &[LocalTrackHandle]) {
    for track in tracks {
        track.stop();
        track.close();
    }
}

/// Tracks acquired by a task that may be aborted part way.
///
/// Dropping the guard stops and closes every track it still holds, so a
/// join or screen-share start cancelled while waiting on a permission prompt
/// does not leave a device open. [`TrackGuard::disarm`] hands the tracks
/// over on success.
#[derive(Default)]
pub struct TrackGuard {
    tracks: Vec<LocalTrackHandle>,
}

impl TrackGuard {
    pub fn push(&mut self, track: LocalTrackHandle) {
        self.tracks.push(track);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Stop and close the held tracks now.
    pub fn release(&mut self) {
        release_tracks(&std::mem::take(&mut self.tracks));
    }

    /// Keep the tracks open; the caller owns them from here.
    pub fn disarm(mut self) {
        self.tracks.clear();
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        if !self.tracks.is_empty() {
            debug!(target: "call.media", tracks = self.tracks.len(), "Releasing unclaimed tracks");
            self.release();
        }
    }
}

/// A started screen share.
#[derive(Debug)]
pub struct ScreenShareStart {
    pub capture: ScreenCapture,
    /// System audio was requested but the platform could not provide it.
    pub fell_back: bool,
}

/// Capture the screen and publish it on the auxiliary session.
///
/// System audio is requested first; an `Unsupported` answer retries the
/// capture video-only. Tracks are released if the publish fails.
pub async fn start_screen_share(
    devices: &dyn MediaDevices,
    auxiliary: &dyn TransportSession,
) -> Result<ScreenShareStart, CallError> {
    let with_audio = ScreenCaptureOptions {
        system_audio: SystemAudio::Auto,
    };

    let (capture, fell_back) = match devices.create_screen_track(with_audio).await {
        Ok(capture) => (capture, false),
        Err(TransportError::Unsupported(reason)) => {
            info!(
                target: "call.media",
                reason = %reason,
                "System audio unsupported, sharing screen without audio"
            );
            let video_only = ScreenCaptureOptions {
                system_audio: SystemAudio::Disabled,
            };
            let capture = devices
                .create_screen_track(video_only)
                .await
                .map_err(CallError::TrackCreation)?;
            (capture, true)
        }
        Err(e) => return Err(CallError::TrackCreation(e)),
    };

    let tracks = capture.tracks();
    let mut guard = TrackGuard::default();
    for track in &tracks {
        guard.push(Arc::clone(track));
    }
    if let Err(e) = auxiliary.publish(&tracks).await {
        warn!(target: "call.media", error = %e, "Screen publish failed, releasing capture");
        guard.release();
        return Err(CallError::Transport(e));
    }
    guard.disarm();

    info!(
        target: "call.media",
        system_audio = capture.audio.is_some(),
        "Screen share published on auxiliary session"
    );
    Ok(ScreenShareStart { capture, fell_back })
}

/// Stop a screen share: stop and close its tracks, then unpublish them from
/// the auxiliary session.
pub async fn stop_screen_share(
    capture: ScreenCapture,
    auxiliary: &dyn TransportSession,
) -> Result<(), CallError> {
    let tracks = capture.tracks();
    release_tracks(&tracks);
    auxiliary.unpublish(&tracks).await?;
    info!(target: "call.media", "Screen share stopped");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::transport::MediaKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct StubTrack {
        kind: MediaKind,
        enabled: AtomicBool,
        closed: AtomicBool,
        refuse: bool,
    }

    impl StubTrack {
        fn new(kind: MediaKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                enabled: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                refuse: false,
            })
        }
    }

    impl crate::transport::LocalTrack for StubTrack {
        fn kind(&self) -> MediaKind {
            self.kind
        }
        fn set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
            if self.refuse {
                return Err(TransportError::Other("track ended".to_string()));
            }
            self.enabled.store(enabled, Ordering::SeqCst);
            Ok(())
        }
        fn stop(&self) {}
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_toggle_without_track_is_noop() {
        let mut media = LocalMedia::new();
        assert_eq!(media.toggle_microphone().unwrap(), None);
        assert_eq!(media.toggle_camera().unwrap(), None);
        assert!(!media.microphone_enabled());
    }

    #[test]
    fn test_toggle_twice_restores_value() {
        let mic = StubTrack::new(MediaKind::Audio);
        let mut media = LocalMedia::new();
        media.install(Some(mic.clone()), None);

        assert_eq!(media.toggle_microphone().unwrap(), Some(true));
        assert!(mic.enabled.load(Ordering::SeqCst));
        assert_eq!(media.toggle_microphone().unwrap(), Some(false));
        assert!(!mic.enabled.load(Ordering::SeqCst));
        assert!(!media.microphone_enabled());
    }

    #[test]
    fn test_failed_toggle_keeps_flag() {
        let camera = Arc::new(StubTrack {
            kind: MediaKind::Video,
            enabled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            refuse: true,
        });
        let mut media = LocalMedia::new();
        media.install(None, Some(camera));

        assert!(matches!(media.toggle_camera(), Err(CallError::Transport(_))));
        assert!(!media.camera_enabled());
    }

    #[test]
    fn test_screen_state_machine() {
        let mut media = LocalMedia::new();
        assert!(media.begin_screen_share());
        assert!(!media.begin_screen_share());
        assert_eq!(media.screen_state(), ScreenShareState::Starting);

        let capture = ScreenCapture {
            video: StubTrack::new(MediaKind::Video),
            audio: Some(StubTrack::new(MediaKind::Audio)),
        };
        media.complete_screen_share(capture).unwrap();
        assert_eq!(media.screen_state(), ScreenShareState::Sharing);
        assert!(media.snapshot().screen_audio);

        let capture = media.take_screen_share().unwrap();
        assert_eq!(capture.tracks().len(), 2);
        assert_eq!(media.screen_state(), ScreenShareState::Idle);
        assert!(media.take_screen_share().is_none());
    }

    #[test]
    fn test_late_capture_is_returned() {
        let mut media = LocalMedia::new();
        let capture = ScreenCapture {
            video: StubTrack::new(MediaKind::Video),
            audio: None,
        };
        assert!(media.complete_screen_share(capture).is_err());
        assert_eq!(media.screen_state(), ScreenShareState::Idle);
    }

    #[test]
    fn test_take_all_releases_everything() {
        let mic = StubTrack::new(MediaKind::Audio);
        let screen = StubTrack::new(MediaKind::Video);
        let mut media = LocalMedia::new();
        media.install(Some(mic.clone()), Some(StubTrack::new(MediaKind::Video)));
        media.toggle_microphone().unwrap();
        media.begin_screen_share();
        media
            .complete_screen_share(ScreenCapture {
                video: screen.clone(),
                audio: None,
            })
            .unwrap();

        let tracks = media.take_all();
        assert_eq!(tracks.len(), 3);
        release_tracks(&tracks);

        assert!(mic.closed.load(Ordering::SeqCst));
        assert!(screen.closed.load(Ordering::SeqCst));
        let snapshot = media.snapshot();
        assert!(!snapshot.has_microphone);
        assert!(!snapshot.microphone_enabled);
        assert_eq!(snapshot.screen_share, ScreenShareState::Idle);
    }

    #[test]
    fn test_dropped_guard_closes_tracks() {
        let mic = StubTrack::new(MediaKind::Audio);
        let mut guard = TrackGuard::default();
        guard.push(mic.clone());
        assert_eq!(guard.len(), 1);

        drop(guard);
        assert!(mic.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_disarmed_guard_keeps_tracks_open() {
        let mic = StubTrack::new(MediaKind::Audio);
        let mut guard = TrackGuard::default();
        guard.push(mic.clone());

        guard.disarm();
        assert!(!mic.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelled_task_releases_guarded_tracks() {
        let mic = StubTrack::new(MediaKind::Audio);
        let held = mic.clone();
        let task = tokio::spawn(async move {
            let mut guard = TrackGuard::default();
            guard.push(held);
            std::future::pending::<()>().await;
            guard.disarm();
        });
        tokio::task::yield_now().await;

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(mic.closed.load(Ordering::SeqCst));
    }
}
