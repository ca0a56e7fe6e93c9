//! Mock local and remote tracks.
//!
//! Both record every call so tests can assert what the coordinator did with
//! a track (published disabled, closed on leave, audio played, ...).

use call_session::transport::{LocalTrack, MediaKind, RemoteTrack, TransportError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Local track that records `set_enabled`, `stop` and `close`.
#[derive(Debug)]
pub struct MockLocalTrack {
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    refuse_set_enabled: AtomicBool,
}

impl MockLocalTrack {
    /// Create a track. Fresh capture tracks start enabled.
    #[must_use]
    pub fn new(kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            refuse_set_enabled: AtomicBool::new(false),
        })
    }

    /// Make subsequent `set_enabled` calls fail.
    pub fn refuse_set_enabled(&self) {
        self.refuse_set_enabled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of `close` calls (a track must be closed exactly once).
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl LocalTrack for MockLocalTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        if self.refuse_set_enabled.load(Ordering::SeqCst) {
            return Err(TransportError::Other("track ended".to_string()));
        }
        self.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Remote track with scriptable inspection results.
#[derive(Debug)]
pub struct MockRemoteTrack {
    kind: MediaKind,
    display_surface: Option<String>,
    label: Option<String>,
    fail_inspection: bool,
    fail_play: bool,
    played: AtomicBool,
    stopped: AtomicBool,
}

impl MockRemoteTrack {
    fn base(kind: MediaKind) -> Self {
        Self {
            kind,
            display_surface: None,
            label: None,
            fail_inspection: false,
            fail_play: false,
            played: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Remote microphone audio.
    #[must_use]
    pub fn audio() -> Arc<Self> {
        Arc::new(Self::base(MediaKind::Audio))
    }

    /// Remote audio whose playback fails.
    #[must_use]
    pub fn unplayable_audio() -> Arc<Self> {
        Arc::new(Self {
            fail_play: true,
            ..Self::base(MediaKind::Audio)
        })
    }

    /// Remote camera video with a typical webcam label.
    #[must_use]
    pub fn camera() -> Arc<Self> {
        Arc::new(Self {
            label: Some("FaceTime HD Camera".to_string()),
            ..Self::base(MediaKind::Video)
        })
    }

    /// Remote screen capture declaring a display surface.
    #[must_use]
    pub fn screen(surface: &str) -> Arc<Self> {
        Arc::new(Self {
            display_surface: Some(surface.to_string()),
            ..Self::base(MediaKind::Video)
        })
    }

    /// Remote video identified only by its label.
    #[must_use]
    pub fn labelled(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: Some(label.to_string()),
            ..Self::base(MediaKind::Video)
        })
    }

    /// Remote video whose settings cannot be read.
    #[must_use]
    pub fn uninspectable() -> Arc<Self> {
        Arc::new(Self {
            fail_inspection: true,
            ..Self::base(MediaKind::Video)
        })
    }

    #[must_use]
    pub fn was_played(&self) -> bool {
        self.played.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl RemoteTrack for MockRemoteTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn play(&self) -> Result<(), TransportError> {
        if self.fail_play {
            return Err(TransportError::Other("autoplay blocked".to_string()));
        }
        self.played.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn display_surface(&self) -> Result<Option<String>, TransportError> {
        if self.fail_inspection {
            return Err(TransportError::Other("settings unavailable".to_string()));
        }
        Ok(self.display_surface.clone())
    }

    fn label(&self) -> Result<Option<String>, TransportError> {
        if self.fail_inspection {
            return Err(TransportError::Other("settings unavailable".to_string()));
        }
        Ok(self.label.clone())
    }
}
