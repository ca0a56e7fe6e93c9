//! Media transport collaborator interface.
//!
//! The transport engine (codec negotiation, network transport, NAT traversal)
//! lives outside this crate. The coordinator only needs the primitives below:
//! session join/leave, publish/unpublish of local tracks, subscribe to remote
//! tracks, an arbitrary-message data channel, and a stream of lifecycle
//! events. Two independent [`TransportSession`] instances back one call: the
//! primary session for camera and microphone, the auxiliary session for
//! screen share.

use async_trait::async_trait;
use bytes::Bytes;
use common::secret::SecretString;
use common::types::{ChannelId, ParticipantId};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Media kind as reported by the transport.
///
/// Camera and screen-share video both travel as [`MediaKind::Video`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the kind as a string for log fields and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Errors reported by the transport collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The session is already connecting or connected (opened by another actor).
    #[error("Session already active")]
    AlreadyConnected,

    /// The user or the OS refused access to a capture device.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The requested capture device does not exist or is busy.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The platform does not support the requested capability.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Operation requires a connected session.
    #[error("Session not connected")]
    NotConnected,

    /// Network or signaling failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Any other transport failure.
    #[error("Transport failure: {0}")]
    Other(String),
}

/// One `(participant, level)` pair from a volume telemetry batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSample {
    pub participant_id: ParticipantId,
    /// Volume level on the transport's own scale.
    pub level: u32,
}

impl VolumeSample {
    #[must_use]
    pub fn new(participant_id: impl Into<ParticipantId>, level: u32) -> Self {
        Self {
            participant_id: participant_id.into(),
            level,
        }
    }
}

/// Lifecycle notifications emitted by a transport session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A remote participant is present in the channel (may publish nothing).
    ParticipantJoined { participant_id: ParticipantId },

    /// A remote participant left the channel.
    ParticipantLeft { participant_id: ParticipantId },

    /// A remote participant published a track of the given kind.
    MediaPublished {
        participant_id: ParticipantId,
        kind: MediaKind,
    },

    /// A remote participant unpublished a track of the given kind.
    MediaUnpublished {
        participant_id: ParticipantId,
        kind: MediaKind,
    },

    /// Periodic per-participant volume telemetry.
    VolumeIndicator { samples: Vec<VolumeSample> },

    /// Raw bytes received on the data channel.
    Message {
        sender: ParticipantId,
        payload: Bytes,
    },
}

impl TransportEvent {
    /// Returns the event name for log fields and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            TransportEvent::ParticipantJoined { .. } => "participant_joined",
            TransportEvent::ParticipantLeft { .. } => "participant_left",
            TransportEvent::MediaPublished { .. } => "media_published",
            TransportEvent::MediaUnpublished { .. } => "media_unpublished",
            TransportEvent::VolumeIndicator { .. } => "volume_indicator",
            TransportEvent::Message { .. } => "message",
        }
    }
}

/// A locally captured track (microphone, camera, screen, system audio).
pub trait LocalTrack: Send + Sync {
    /// Media kind of this track.
    fn kind(&self) -> MediaKind;

    /// Mute/unmute without unpublishing.
    fn set_enabled(&self, enabled: bool) -> Result<(), TransportError>;

    /// Stop capturing.
    fn stop(&self);

    /// Release the underlying device.
    fn close(&self);
}

/// A subscribed remote track.
pub trait RemoteTrack: Send + Sync {
    /// Media kind of this track.
    fn kind(&self) -> MediaKind;

    /// Start local playback (audio tracks).
    fn play(&self) -> Result<(), TransportError>;

    /// Stop local playback/rendering.
    fn stop(&self);

    /// The `displaySurface` setting of the underlying media stream, if the
    /// platform declares one (`"monitor"`, `"window"`, `"browser"`).
    fn display_surface(&self) -> Result<Option<String>, TransportError>;

    /// Descriptive label of the track, if any.
    fn label(&self) -> Result<Option<String>, TransportError>;
}

/// Shared handle to a local track.
pub type LocalTrackHandle = Arc<dyn LocalTrack>;

/// Shared handle to a remote track.
pub type RemoteTrackHandle = Arc<dyn RemoteTrack>;

/// System audio capture policy for screen sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemAudio {
    /// Capture system audio when the platform supports it.
    #[default]
    Auto,
    /// Never capture system audio.
    Disabled,
}

/// Options for screen capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenCaptureOptions {
    pub system_audio: SystemAudio,
}

/// Result of a screen capture request: the video track plus an optional
/// paired system audio track.
#[derive(Clone)]
pub struct ScreenCapture {
    pub video: LocalTrackHandle,
    pub audio: Option<LocalTrackHandle>,
}

impl ScreenCapture {
    /// All tracks of this capture, video first.
    #[must_use]
    pub fn tracks(&self) -> Vec<LocalTrackHandle> {
        let mut tracks = vec![Arc::clone(&self.video)];
        if let Some(audio) = &self.audio {
            tracks.push(Arc::clone(audio));
        }
        tracks
    }
}

impl fmt::Debug for ScreenCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScreenCapture")
            .field("has_audio", &self.audio.is_some())
            .finish()
    }
}

/// One transport session (primary or auxiliary).
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Join `channel` with `credential`. `identity` requests a specific
    /// identity; the transport may assign one. Returns the resolved identity.
    async fn connect(
        &self,
        channel: &ChannelId,
        credential: &SecretString,
        identity: Option<&ParticipantId>,
    ) -> Result<ParticipantId, TransportError>;

    /// Leave the channel.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Publish local tracks.
    async fn publish(&self, tracks: &[LocalTrackHandle]) -> Result<(), TransportError>;

    /// Unpublish local tracks.
    async fn unpublish(&self, tracks: &[LocalTrackHandle]) -> Result<(), TransportError>;

    /// Subscribe to a remote participant's track of the given kind.
    async fn subscribe(
        &self,
        participant_id: &ParticipantId,
        kind: MediaKind,
    ) -> Result<RemoteTrackHandle, TransportError>;

    /// Broadcast raw bytes on the session's data channel.
    async fn send_message(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Take the lifecycle event receiver. Returns `None` once taken.
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>>;
}

/// Local capture device factory.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open the microphone. May suspend until the user grants permission.
    async fn create_microphone_track(&self) -> Result<LocalTrackHandle, TransportError>;

    /// Open the camera. May suspend until the user grants permission.
    async fn create_camera_track(&self) -> Result<LocalTrackHandle, TransportError>;

    /// Start a screen capture. May suspend until the user picks a surface.
    async fn create_screen_track(
        &self,
        options: ScreenCaptureOptions,
    ) -> Result<ScreenCapture, TransportError>;
}
