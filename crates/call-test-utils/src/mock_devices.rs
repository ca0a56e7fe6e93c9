//! Mock capture devices.
//!
//! Hands out [`MockLocalTrack`]s and keeps every one it created, so tests
//! can check that a track was disabled, stopped or closed.

use async_trait::async_trait;
use call_session::transport::{
    LocalTrackHandle, MediaDevices, MediaKind, ScreenCapture, ScreenCaptureOptions, SystemAudio,
    TransportError,
};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::mock_tracks::MockLocalTrack;

/// Mock device factory.
#[derive(Debug)]
pub struct MockMediaDevices {
    microphone_error: Option<TransportError>,
    camera_error: Option<TransportError>,
    screen_error: Option<TransportError>,
    system_audio: bool,
    camera_pending: bool,
    screen_gate: Option<Notify>,

    microphones: Mutex<Vec<Arc<MockLocalTrack>>>,
    cameras: Mutex<Vec<Arc<MockLocalTrack>>>,
    screens: Mutex<Vec<Arc<MockLocalTrack>>>,
    screen_audio: Mutex<Vec<Arc<MockLocalTrack>>>,
    screen_requests: Mutex<Vec<ScreenCaptureOptions>>,
}

impl MockMediaDevices {
    #[must_use]
    pub fn builder() -> MockMediaDevicesBuilder {
        MockMediaDevicesBuilder::default()
    }

    /// Devices that grant everything, with system audio support.
    #[must_use]
    pub fn granting() -> Arc<Self> {
        Self::builder().build()
    }

    /// Let a held screen capture complete.
    pub fn release_screen(&self) {
        if let Some(gate) = &self.screen_gate {
            gate.notify_one();
        }
    }

    /// The most recently created microphone.
    #[must_use]
    pub fn microphone(&self) -> Option<Arc<MockLocalTrack>> {
        self.microphones.lock().unwrap().last().cloned()
    }

    /// The most recently created camera.
    #[must_use]
    pub fn camera(&self) -> Option<Arc<MockLocalTrack>> {
        self.cameras.lock().unwrap().last().cloned()
    }

    /// The most recently created screen video track.
    #[must_use]
    pub fn screen(&self) -> Option<Arc<MockLocalTrack>> {
        self.screens.lock().unwrap().last().cloned()
    }

    /// The most recently created system audio track.
    #[must_use]
    pub fn screen_audio(&self) -> Option<Arc<MockLocalTrack>> {
        self.screen_audio.lock().unwrap().last().cloned()
    }

    #[must_use]
    pub fn microphones_created(&self) -> usize {
        self.microphones.lock().unwrap().len()
    }

    #[must_use]
    pub fn cameras_created(&self) -> usize {
        self.cameras.lock().unwrap().len()
    }

    /// Options of every screen capture request, in order.
    #[must_use]
    pub fn screen_requests(&self) -> Vec<ScreenCaptureOptions> {
        self.screen_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for MockMediaDevices {
    async fn create_microphone_track(&self) -> Result<LocalTrackHandle, TransportError> {
        if let Some(err) = &self.microphone_error {
            return Err(err.clone());
        }
        let track = MockLocalTrack::new(MediaKind::Audio);
        self.microphones.lock().unwrap().push(Arc::clone(&track));
        Ok(track)
    }

    async fn create_camera_track(&self) -> Result<LocalTrackHandle, TransportError> {
        if self.camera_pending {
            std::future::pending::<()>().await;
        }
        if let Some(err) = &self.camera_error {
            return Err(err.clone());
        }
        let track = MockLocalTrack::new(MediaKind::Video);
        self.cameras.lock().unwrap().push(Arc::clone(&track));
        Ok(track)
    }

    async fn create_screen_track(
        &self,
        options: ScreenCaptureOptions,
    ) -> Result<ScreenCapture, TransportError> {
        self.screen_requests.lock().unwrap().push(options);

        if let Some(gate) = &self.screen_gate {
            gate.notified().await;
        }
        if let Some(err) = &self.screen_error {
            return Err(err.clone());
        }

        let with_audio = match options.system_audio {
            SystemAudio::Auto if !self.system_audio => {
                return Err(TransportError::Unsupported(
                    "system audio capture".to_string(),
                ));
            }
            SystemAudio::Auto => true,
            SystemAudio::Disabled => false,
        };

        let video = MockLocalTrack::new(MediaKind::Video);
        self.screens.lock().unwrap().push(Arc::clone(&video));

        let audio = if with_audio {
            let audio = MockLocalTrack::new(MediaKind::Audio);
            self.screen_audio.lock().unwrap().push(Arc::clone(&audio));
            Some(audio as LocalTrackHandle)
        } else {
            None
        };

        Ok(ScreenCapture { video, audio })
    }
}

/// Builder for `MockMediaDevices`.
#[derive(Debug)]
pub struct MockMediaDevicesBuilder {
    microphone_error: Option<TransportError>,
    camera_error: Option<TransportError>,
    screen_error: Option<TransportError>,
    system_audio: bool,
    camera_pending: bool,
    hold_screen: bool,
}

impl Default for MockMediaDevicesBuilder {
    fn default() -> Self {
        Self {
            microphone_error: None,
            camera_error: None,
            screen_error: None,
            system_audio: true,
            camera_pending: false,
            hold_screen: false,
        }
    }
}

impl MockMediaDevicesBuilder {
    #[must_use]
    pub fn fail_microphone(mut self, err: TransportError) -> Self {
        self.microphone_error = Some(err);
        self
    }

    #[must_use]
    pub fn fail_camera(mut self, err: TransportError) -> Self {
        self.camera_error = Some(err);
        self
    }

    #[must_use]
    pub fn fail_screen(mut self, err: TransportError) -> Self {
        self.screen_error = Some(err);
        self
    }

    /// Reject system audio capture with `Unsupported`.
    #[must_use]
    pub fn without_system_audio(mut self) -> Self {
        self.system_audio = false;
        self
    }

    /// Never answer the camera request, like an ignored permission prompt.
    #[must_use]
    pub fn never_grant_camera(mut self) -> Self {
        self.camera_pending = true;
        self
    }

    /// Block screen capture until [`MockMediaDevices::release_screen`].
    #[must_use]
    pub fn hold_screen(mut self) -> Self {
        self.hold_screen = true;
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<MockMediaDevices> {
        Arc::new(MockMediaDevices {
            microphone_error: self.microphone_error,
            camera_error: self.camera_error,
            screen_error: self.screen_error,
            system_audio: self.system_audio,
            camera_pending: self.camera_pending,
            screen_gate: self.hold_screen.then(Notify::new),
            microphones: Mutex::new(Vec::new()),
            cameras: Mutex::new(Vec::new()),
            screens: Mutex::new(Vec::new()),
            screen_audio: Mutex::new(Vec::new()),
            screen_requests: Mutex::new(Vec::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tracks_are_recorded() {
        let devices = MockMediaDevices::granting();
        devices.create_microphone_track().await.unwrap();
        devices.create_camera_track().await.unwrap();

        assert_eq!(devices.microphones_created(), 1);
        assert_eq!(devices.cameras_created(), 1);
        assert!(devices.microphone().unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_screen_without_system_audio_support() {
        let devices = MockMediaDevices::builder().without_system_audio().build();

        let auto = devices
            .create_screen_track(ScreenCaptureOptions::default())
            .await;
        assert!(matches!(auto, Err(TransportError::Unsupported(_))));

        let capture = devices
            .create_screen_track(ScreenCaptureOptions {
                system_audio: SystemAudio::Disabled,
            })
            .await
            .unwrap();
        assert!(capture.audio.is_none());
        assert_eq!(devices.screen_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_screen_with_system_audio() {
        let devices = MockMediaDevices::granting();
        let capture = devices
            .create_screen_track(ScreenCaptureOptions::default())
            .await
            .unwrap();

        assert!(capture.audio.is_some());
        assert!(devices.screen_audio().is_some());
    }
}
