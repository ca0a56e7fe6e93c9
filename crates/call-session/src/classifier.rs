//! Camera vs. screen-share classification for remote video tracks.
//!
//! Both kinds of video arrive as the same transport media kind, so the source
//! is inferred from what the track exposes. The heuristic is best-effort: a
//! wrong answer only puts the stream in the wrong slot of the participant's
//! registry entry.

use crate::transport::{RemoteTrack, TransportError};

/// Label fragments that indicate a captured screen, window or display.
const SCREEN_LABEL_HINTS: [&str; 3] = ["screen", "display", "window"];

/// Logical source of a remote video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSource {
    Camera,
    Screen,
}

impl VideoSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            VideoSource::Camera => "camera",
            VideoSource::Screen => "screen",
        }
    }
}

/// Classify a remote video track.
///
/// Order: declared display surface, then label hints, then camera. Any
/// inspection failure yields [`VideoSource::Camera`].
pub fn classify_video(track: &dyn RemoteTrack) -> VideoSource {
    inspect(track).unwrap_or(VideoSource::Camera)
}

fn inspect(track: &dyn RemoteTrack) -> Result<VideoSource, TransportError> {
    if track
        .display_surface()?
        .is_some_and(|surface| !surface.trim().is_empty())
    {
        return Ok(VideoSource::Screen);
    }

    if let Some(label) = track.label()? {
        let label = label.to_lowercase();
        if SCREEN_LABEL_HINTS.iter().any(|hint| label.contains(hint)) {
            return Ok(VideoSource::Screen);
        }
    }

    Ok(VideoSource::Camera)
}
