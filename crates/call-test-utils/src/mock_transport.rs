//! Mock transport session.
//!
//! A scriptable [`TransportSession`] for coordinator tests. It can be
//! configured to:
//! - Assign a specific identity on connect
//! - Fail any operation with a given `TransportError`
//! - Hold `connect` until the test releases it (join in flight)
//! - Hand out specific remote tracks on subscribe
//!
//! Every call is counted, and events can be injected into the stream the
//! coordinator consumes.
//!
//! # Example
//!
//! ```rust,ignore
//! use call_test_utils::MockTransport;
//!
//! let primary = MockTransport::builder()
//!     .identity("1001")
//!     .fail_disconnect(TransportError::Network("reset".into()))
//!     .build();
//!
//! primary.emit_joined("alice").await;
//! assert_eq!(primary.connect_calls(), 0);
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use call_session::transport::{
    LocalTrackHandle, MediaKind, RemoteTrackHandle, TransportError, TransportEvent,
    TransportSession, VolumeSample,
};
use common::secret::{ExposeSecret, SecretString};
use common::types::{ChannelId, ParticipantId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

use crate::mock_tracks::MockRemoteTrack;

/// Capacity of the injected event stream.
const EVENT_BUFFER: usize = 64;

/// Mock transport session.
pub struct MockTransport {
    identity: ParticipantId,
    connect_error: Option<TransportError>,
    disconnect_error: Option<TransportError>,
    publish_error: Option<TransportError>,
    unpublish_error: Option<TransportError>,
    subscribe_error: Option<TransportError>,
    send_error: Option<TransportError>,
    connect_gate: Option<Notify>,

    remote_tracks: Mutex<HashMap<(ParticipantId, MediaKind), Arc<MockRemoteTrack>>>,
    published: Mutex<Vec<LocalTrackHandle>>,
    sent: Mutex<Vec<Bytes>>,
    last_connect: Mutex<Option<ConnectRecord>>,

    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    publish_calls: AtomicUsize,
    unpublish_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,

    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

/// Arguments of the last `connect` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRecord {
    pub channel: ChannelId,
    pub credential: String,
    pub identity: Option<ParticipantId>,
}

impl MockTransport {
    /// Create a new `MockTransport` builder.
    #[must_use]
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder::default()
    }

    /// A session that succeeds at everything and assigns `identity`.
    #[must_use]
    pub fn with_identity(identity: &str) -> Arc<Self> {
        Self::builder().identity(identity).build()
    }

    /// Let a held `connect` complete.
    pub fn release_connect(&self) {
        if let Some(gate) = &self.connect_gate {
            gate.notify_one();
        }
    }

    /// Inject a lifecycle event.
    pub async fn emit(&self, event: TransportEvent) {
        self.events_tx
            .send(event)
            .await
            .expect("event stream receiver dropped");
    }

    pub async fn emit_joined(&self, participant_id: &str) {
        self.emit(TransportEvent::ParticipantJoined {
            participant_id: ParticipantId::from(participant_id),
        })
        .await;
    }

    pub async fn emit_left(&self, participant_id: &str) {
        self.emit(TransportEvent::ParticipantLeft {
            participant_id: ParticipantId::from(participant_id),
        })
        .await;
    }

    pub async fn emit_published(&self, participant_id: &str, kind: MediaKind) {
        self.emit(TransportEvent::MediaPublished {
            participant_id: ParticipantId::from(participant_id),
            kind,
        })
        .await;
    }

    pub async fn emit_unpublished(&self, participant_id: &str, kind: MediaKind) {
        self.emit(TransportEvent::MediaUnpublished {
            participant_id: ParticipantId::from(participant_id),
            kind,
        })
        .await;
    }

    pub async fn emit_volume(&self, samples: &[(&str, u32)]) {
        self.emit(TransportEvent::VolumeIndicator {
            samples: samples
                .iter()
                .map(|(id, level)| VolumeSample::new(*id, *level))
                .collect(),
        })
        .await;
    }

    pub async fn emit_message(&self, sender: &str, payload: impl Into<Bytes>) {
        self.emit(TransportEvent::Message {
            sender: ParticipantId::from(sender),
            payload: payload.into(),
        })
        .await;
    }

    /// Register the track handed out when `participant_id` publishes `kind`.
    pub fn set_remote_track(
        &self,
        participant_id: &str,
        kind: MediaKind,
        track: Arc<MockRemoteTrack>,
    ) {
        self.remote_tracks
            .lock()
            .unwrap()
            .insert((ParticipantId::from(participant_id), kind), track);
    }

    /// The track last handed out for `participant_id` and `kind`.
    #[must_use]
    pub fn remote_track(
        &self,
        participant_id: &str,
        kind: MediaKind,
    ) -> Option<Arc<MockRemoteTrack>> {
        self.remote_tracks
            .lock()
            .unwrap()
            .get(&(ParticipantId::from(participant_id), kind))
            .cloned()
    }

    /// Tracks currently published on this session.
    #[must_use]
    pub fn published(&self) -> Vec<LocalTrackHandle> {
        self.published.lock().unwrap().clone()
    }

    /// Payloads sent on the data channel.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent payloads decoded as JSON.
    #[must_use]
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent_messages()
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).expect("sent payload is JSON"))
            .collect()
    }

    #[must_use]
    pub fn last_connect(&self) -> Option<ConnectRecord> {
        self.last_connect.lock().unwrap().clone()
    }

    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn unpublish_calls(&self) -> usize {
        self.unpublish_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("identity", &self.identity)
            .field("connect_calls", &self.connect_calls)
            .field("published", &self.published.lock().unwrap().len())
            .field("sent", &self.sent.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransportSession for MockTransport {
    async fn connect(
        &self,
        channel: &ChannelId,
        credential: &SecretString,
        identity: Option<&ParticipantId>,
    ) -> Result<ParticipantId, TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_connect.lock().unwrap() = Some(ConnectRecord {
            channel: channel.clone(),
            credential: credential.expose_secret().to_string(),
            identity: identity.cloned(),
        });

        if let Some(gate) = &self.connect_gate {
            gate.notified().await;
        }
        if let Some(err) = &self.connect_error {
            return Err(err.clone());
        }
        Ok(identity.cloned().unwrap_or_else(|| self.identity.clone()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.published.lock().unwrap().clear();
        match &self.disconnect_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn publish(&self, tracks: &[LocalTrackHandle]) -> Result<(), TransportError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.publish_error {
            return Err(err.clone());
        }
        self.published.lock().unwrap().extend(tracks.iter().cloned());
        Ok(())
    }

    async fn unpublish(&self, tracks: &[LocalTrackHandle]) -> Result<(), TransportError> {
        self.unpublish_calls.fetch_add(1, Ordering::SeqCst);
        self.published
            .lock()
            .unwrap()
            .retain(|published| !tracks.iter().any(|t| Arc::ptr_eq(t, published)));
        match &self.unpublish_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn subscribe(
        &self,
        participant_id: &ParticipantId,
        kind: MediaKind,
    ) -> Result<RemoteTrackHandle, TransportError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.subscribe_error {
            return Err(err.clone());
        }

        let mut tracks = self.remote_tracks.lock().unwrap();
        let track = tracks
            .entry((participant_id.clone(), kind))
            .or_insert_with(|| match kind {
                MediaKind::Audio => MockRemoteTrack::audio(),
                MediaKind::Video => MockRemoteTrack::camera(),
            });
        Ok(Arc::clone(track) as RemoteTrackHandle)
    }

    async fn send_message(&self, payload: Bytes) -> Result<(), TransportError> {
        if let Some(err) = &self.send_error {
            return Err(err.clone());
        }
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.lock().unwrap().take()
    }
}

/// Builder for `MockTransport` configuration.
#[derive(Debug, Default)]
pub struct MockTransportBuilder {
    identity: Option<String>,
    connect_error: Option<TransportError>,
    disconnect_error: Option<TransportError>,
    publish_error: Option<TransportError>,
    unpublish_error: Option<TransportError>,
    subscribe_error: Option<TransportError>,
    send_error: Option<TransportError>,
    hold_connect: bool,
}

impl MockTransportBuilder {
    /// Identity assigned when `connect` is not asked for a specific one.
    #[must_use]
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    #[must_use]
    pub fn fail_connect(mut self, err: TransportError) -> Self {
        self.connect_error = Some(err);
        self
    }

    #[must_use]
    pub fn fail_disconnect(mut self, err: TransportError) -> Self {
        self.disconnect_error = Some(err);
        self
    }

    #[must_use]
    pub fn fail_publish(mut self, err: TransportError) -> Self {
        self.publish_error = Some(err);
        self
    }

    #[must_use]
    pub fn fail_unpublish(mut self, err: TransportError) -> Self {
        self.unpublish_error = Some(err);
        self
    }

    #[must_use]
    pub fn fail_subscribe(mut self, err: TransportError) -> Self {
        self.subscribe_error = Some(err);
        self
    }

    #[must_use]
    pub fn fail_send(mut self, err: TransportError) -> Self {
        self.send_error = Some(err);
        self
    }

    /// Block `connect` until [`MockTransport::release_connect`] is called.
    #[must_use]
    pub fn hold_connect(mut self) -> Self {
        self.hold_connect = true;
        self
    }

    /// Build the `MockTransport`.
    #[must_use]
    pub fn build(self) -> Arc<MockTransport> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Arc::new(MockTransport {
            identity: ParticipantId::new(
                self.identity
                    .unwrap_or_else(|| "mock-identity".to_string()),
            ),
            connect_error: self.connect_error,
            disconnect_error: self.disconnect_error,
            publish_error: self.publish_error,
            unpublish_error: self.unpublish_error,
            subscribe_error: self.subscribe_error,
            send_error: self.send_error,
            connect_gate: self.hold_connect.then(Notify::new),
            remote_tracks: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            last_connect: Mutex::new(None),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            publish_calls: AtomicUsize::new(0),
            unpublish_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }
}
