//! `CallActor` - owns all state of one call.
//!
//! The actor is the only writer of the session links, local media, participant
//! registry, moderation sets and speaking detector. Its loop selects over:
//!
//! - the cancellation token
//! - completions of spawned join / screen-share tasks
//! - lifecycle events from the primary transport session
//! - speaking decay timers
//! - the `CallHandle` mailbox
//!
//! Join and screen-share start may suspend for a long time (permission
//! prompts), so they run as spawned tasks and report back; everything else
//! runs inline. The loop ends on cancellation or when every handle is dropped,
//! and then tears the call down exactly once.

use super::messages::{
    CallMessage, CallSnapshot, CallUpdate, ConnectionState, ModerationAction,
};
use crate::classifier::classify_video;
use crate::config::CallConfig;
use crate::errors::CallError;
use crate::local_media::{self, LocalMedia, ScreenShareStart, ScreenShareState};
use crate::moderation::{self, ControlEffect, ControlMessage, ModerationSet, ModerationState};
use crate::observability::metrics;
use crate::registry::{ParticipantRegistry, RemoteParticipantInfo};
use crate::session::{self, JoinOutcome, JoinRequest, SessionLinks};
use crate::speaking::SpeakingDetector;
use crate::transport::{MediaDevices, MediaKind, TransportEvent, VolumeSample};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::types::ParticipantId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Buffer for completions of spawned tasks. At most one join and one
/// screen-share start are in flight.
const TASK_CHANNEL_BUFFER: usize = 4;

/// How long teardown waits for an in-flight task before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Handle to a `CallActor`.
///
/// Cloneable; the call is torn down when the last clone is dropped or
/// [`CallHandle::cancel`] is called.
#[derive(Clone)]
pub struct CallHandle {
    sender: mpsc::Sender<CallMessage>,
    updates: broadcast::Sender<CallUpdate>,
    cancel_token: CancellationToken,
}

impl CallHandle {
    /// Join the call.
    ///
    /// Resolves once the join settles. Returns the resulting state; a join
    /// while already connecting or connected is a no-op that returns the
    /// current state.
    pub async fn join(&self) -> Result<ConnectionState, CallError> {
        self.request(|respond_to| CallMessage::Join { respond_to })
            .await?
    }

    /// Leave the call. No-op unless connected.
    ///
    /// Every cleanup step runs; the first failure is returned afterwards.
    pub async fn leave(&self) -> Result<(), CallError> {
        self.request(|respond_to| CallMessage::Leave { respond_to })
            .await?
    }

    /// Flip the local microphone. Returns the new `enabled` value, or `None`
    /// when there is no microphone track yet.
    pub async fn toggle_microphone(&self) -> Result<Option<bool>, CallError> {
        self.request(|respond_to| CallMessage::ToggleMicrophone { respond_to })
            .await?
    }

    /// Flip the local camera. Returns the new `enabled` value, or `None`
    /// when there is no camera track yet.
    pub async fn toggle_camera(&self) -> Result<Option<bool>, CallError> {
        self.request(|respond_to| CallMessage::ToggleCamera { respond_to })
            .await?
    }

    /// Start or stop sharing the screen on the auxiliary session.
    ///
    /// A start resolves once the capture is published. A toggle while a
    /// start is in flight returns [`ScreenShareState::Starting`] and does
    /// nothing.
    pub async fn toggle_screen_share(&self) -> Result<ScreenShareState, CallError> {
        self.request(|respond_to| CallMessage::ToggleScreenShare { respond_to })
            .await?
    }

    /// Mute a remote participant locally. Returns `true` if newly muted.
    pub async fn mute_participant(&self, participant_id: ParticipantId) -> Result<bool, CallError> {
        self.moderate(participant_id, ModerationAction::Mute).await
    }

    /// Undo a local mute.
    pub async fn unmute_participant(
        &self,
        participant_id: ParticipantId,
    ) -> Result<bool, CallError> {
        self.moderate(participant_id, ModerationAction::Unmute).await
    }

    /// Hide a remote participant's video locally.
    pub async fn disable_participant_video(
        &self,
        participant_id: ParticipantId,
    ) -> Result<bool, CallError> {
        self.moderate(participant_id, ModerationAction::DisableVideo)
            .await
    }

    /// Show a remote participant's video again.
    pub async fn enable_participant_video(
        &self,
        participant_id: ParticipantId,
    ) -> Result<bool, CallError> {
        self.moderate(participant_id, ModerationAction::EnableVideo)
            .await
    }

    /// Block a remote participant locally. Returns `true` if newly blocked.
    pub async fn block_participant(
        &self,
        participant_id: ParticipantId,
    ) -> Result<bool, CallError> {
        self.moderate(participant_id, ModerationAction::Block).await
    }

    /// Undo a local block.
    pub async fn unblock_participant(
        &self,
        participant_id: ParticipantId,
    ) -> Result<bool, CallError> {
        self.moderate(participant_id, ModerationAction::Unblock).await
    }

    /// Apply a local moderation action. Returns `true` if the moderation
    /// sets changed. Local only; nothing is sent to peers.
    pub async fn moderate(
        &self,
        participant_id: ParticipantId,
        action: ModerationAction,
    ) -> Result<bool, CallError> {
        self.request(|respond_to| CallMessage::Moderate {
            participant_id,
            action,
            respond_to,
        })
        .await
    }

    /// Send a control message on the primary session's data channel.
    pub async fn send_control(&self, message: ControlMessage) -> Result<(), CallError> {
        self.request(|respond_to| CallMessage::SendControl {
            message,
            respond_to,
        })
        .await?
    }

    /// Get the current call state.
    pub async fn snapshot(&self) -> Result<CallSnapshot, CallError> {
        self.request(|respond_to| CallMessage::GetSnapshot { respond_to })
            .await
    }

    /// Get one remote participant.
    pub async fn participant(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Option<RemoteParticipantInfo>, CallError> {
        self.request(|respond_to| CallMessage::GetParticipant {
            participant_id,
            respond_to,
        })
        .await
    }

    /// Subscribe to call updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CallUpdate> {
        self.updates.subscribe()
    }

    /// Cancel the call actor. The call is torn down.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> CallMessage,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }
}

/// Completion of a spawned task.
enum TaskOutcome {
    Join {
        result: Result<JoinOutcome, CallError>,
        started: Instant,
    },
    ScreenShare(Result<ScreenShareStart, CallError>),
}

/// The `CallActor` implementation.
pub struct CallActor {
    config: CallConfig,
    links: SessionLinks,
    devices: Arc<dyn MediaDevices>,
    /// Message receiver.
    receiver: mpsc::Receiver<CallMessage>,
    cancel_token: CancellationToken,
    updates: broadcast::Sender<CallUpdate>,
    task_tx: mpsc::Sender<TaskOutcome>,
    task_rx: mpsc::Receiver<TaskOutcome>,
    /// Primary session lifecycle events; `None` once the stream ended.
    events: Option<mpsc::Receiver<TransportEvent>>,
    state: ConnectionState,
    local_identity: Option<ParticipantId>,
    screen_identity: Option<ParticipantId>,
    media: LocalMedia,
    registry: ParticipantRegistry,
    moderation: ModerationState,
    speaking: SpeakingDetector,
    join_task: Option<JoinHandle<()>>,
    join_waiter: Option<oneshot::Sender<Result<ConnectionState, CallError>>>,
    screen_task: Option<JoinHandle<()>>,
    screen_waiter: Option<oneshot::Sender<Result<ScreenShareState, CallError>>>,
    last_error: Option<String>,
    joined_at: Option<DateTime<Utc>>,
}

impl CallActor {
    /// Spawn a new call actor.
    ///
    /// Returns a handle and the task join handle.
    ///
    /// # Arguments
    ///
    /// * `config` - Channel, credentials and tuning
    /// * `links` - Primary and auxiliary transport sessions
    /// * `devices` - Local capture device factory
    /// * `cancel_token` - Cancelling it tears the call down
    ///
    /// # Errors
    ///
    /// `CallError::Config` if a channel capacity is zero or the primary
    /// session's event stream was already taken.
    pub fn spawn(
        config: CallConfig,
        links: SessionLinks,
        devices: Arc<dyn MediaDevices>,
        cancel_token: CancellationToken,
    ) -> Result<(CallHandle, JoinHandle<()>), CallError> {
        if config.mailbox_capacity == 0 || config.update_capacity == 0 {
            return Err(CallError::Config(
                "channel capacities must be greater than zero".to_string(),
            ));
        }

        let events = links.primary.take_events().ok_or_else(|| {
            CallError::Config("primary session events already taken".to_string())
        })?;

        let (sender, receiver) = mpsc::channel(config.mailbox_capacity);
        let (updates, _) = broadcast::channel(config.update_capacity);
        let (task_tx, task_rx) = mpsc::channel(TASK_CHANNEL_BUFFER);

        let actor = Self {
            speaking: SpeakingDetector::new(config.speaking_threshold, config.speaking_decay),
            local_identity: config.local_identity.clone(),
            screen_identity: config.screen_identity.clone(),
            config,
            links,
            devices,
            receiver,
            cancel_token: cancel_token.clone(),
            updates: updates.clone(),
            task_tx,
            task_rx,
            events: Some(events),
            state: ConnectionState::Idle,
            media: LocalMedia::new(),
            registry: ParticipantRegistry::new(),
            moderation: ModerationState::new(),
            join_task: None,
            join_waiter: None,
            screen_task: None,
            screen_waiter: None,
            last_error: None,
            joined_at: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CallHandle {
            sender,
            updates,
            cancel_token,
        };

        Ok((handle, task_handle))
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "call.actor", fields(channel_id = %self.config.channel_id))]
    async fn run(mut self) {
        info!(
            target: "call.actor",
            channel_id = %self.config.channel_id,
            "CallActor started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "call.actor",
                        channel_id = %self.config.channel_id,
                        "CallActor received cancellation signal"
                    );
                    break;
                }

                Some(outcome) = self.task_rx.recv() => {
                    self.handle_task_outcome(outcome).await;
                }

                event = next_event(&mut self.events) => {
                    if let Some(event) = event {
                        self.handle_event(event).await;
                    } else {
                        warn!(
                            target: "call.actor",
                            channel_id = %self.config.channel_id,
                            "Primary session event stream closed"
                        );
                        self.events = None;
                    }
                }

                Some(participant_id) = self.speaking.next_expired(), if !self.speaking.is_idle() => {
                    self.emit(CallUpdate::SpeakingStopped(participant_id));
                    metrics::set_speaking_active(self.speaking.len());
                }

                msg = self.receiver.recv() => {
                    if let Some(message) = msg {
                        self.handle_message(message).await;
                    } else {
                        info!(
                            target: "call.actor",
                            channel_id = %self.config.channel_id,
                            "CallActor channel closed, exiting"
                        );
                        break;
                    }
                }
            }
        }

        self.teardown().await;

        info!(
            target: "call.actor",
            channel_id = %self.config.channel_id,
            "CallActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: CallMessage) {
        match message {
            CallMessage::Join { respond_to } => self.handle_join(respond_to),

            CallMessage::Leave { respond_to } => {
                let result = self.handle_leave().await;
                let _ = respond_to.send(result);
            }

            CallMessage::ToggleMicrophone { respond_to } => {
                let result = self.media.toggle_microphone();
                if let Ok(Some(_)) = result {
                    self.local_media_changed().await;
                }
                let _ = respond_to.send(result);
            }

            CallMessage::ToggleCamera { respond_to } => {
                let result = self.media.toggle_camera();
                if let Ok(Some(_)) = result {
                    self.local_media_changed().await;
                }
                let _ = respond_to.send(result);
            }

            CallMessage::ToggleScreenShare { respond_to } => {
                self.handle_toggle_screen_share(respond_to).await;
            }

            CallMessage::Moderate {
                participant_id,
                action,
                respond_to,
            } => {
                let changed = self.handle_moderate(participant_id, action);
                let _ = respond_to.send(changed);
            }

            CallMessage::SendControl {
                message,
                respond_to,
            } => {
                let result = self.send_control(&message).await;
                let _ = respond_to.send(result);
            }

            CallMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            CallMessage::GetParticipant {
                participant_id,
                respond_to,
            } => {
                let info = self.registry.get(&participant_id).map(|p| p.info());
                let _ = respond_to.send(info);
            }
        }
    }

    // ------------------------------------------------------------------
    // Join / leave
    // ------------------------------------------------------------------

    fn handle_join(&mut self, respond_to: oneshot::Sender<Result<ConnectionState, CallError>>) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            debug!(
                target: "call.actor",
                state = self.state.as_str(),
                "Join ignored, call already active"
            );
            let _ = respond_to.send(Ok(self.state));
            return;
        }

        self.set_state(ConnectionState::Connecting);
        self.join_waiter = Some(respond_to);

        let links = self.links.clone();
        let devices = Arc::clone(&self.devices);
        let request = JoinRequest {
            channel_id: self.config.channel_id.clone(),
            token: self.config.token.clone(),
            screen_token: self.config.screen_credential().clone(),
            local_identity: self.config.local_identity.clone(),
            screen_identity: self.config.screen_identity.clone(),
        };
        let task_tx = self.task_tx.clone();
        let started = Instant::now();

        self.join_task = Some(tokio::spawn(async move {
            let result = session::run_join(&links, devices.as_ref(), &request).await;
            let _ = task_tx.send(TaskOutcome::Join { result, started }).await;
        }));
    }

    fn handle_join_settled(&mut self, result: Result<JoinOutcome, CallError>, started: Instant) {
        self.join_task = None;
        let waiter = self.join_waiter.take();

        let reply = match result {
            Ok(outcome) => {
                metrics::record_join(outcome.status.as_str(), started.elapsed());

                self.local_identity = outcome.local_identity;
                self.screen_identity = outcome.screen_identity;
                self.forget_local_entries();
                self.media.install(outcome.microphone, outcome.camera);
                self.joined_at = Some(Utc::now());
                self.last_error = None;
                self.set_state(ConnectionState::Connected);
                self.emit(CallUpdate::LocalMediaChanged(self.media.snapshot()));

                info!(
                    target: "call.actor",
                    channel_id = %self.config.channel_id,
                    local_identity = ?self.local_identity,
                    status = outcome.status.as_str(),
                    "Call connected"
                );
                Ok(ConnectionState::Connected)
            }
            Err(e) => {
                metrics::record_join(session::join_failure_status(&e), started.elapsed());
                warn!(
                    target: "call.actor",
                    channel_id = %self.config.channel_id,
                    error = %e,
                    "Join failed"
                );

                self.clear_remote_state();
                self.record_error(&e);
                self.set_state(ConnectionState::Idle);
                Err(e)
            }
        };

        if let Some(waiter) = waiter {
            let _ = waiter.send(reply);
        }
    }

    async fn handle_leave(&mut self) -> Result<(), CallError> {
        if self.state != ConnectionState::Connected {
            debug!(
                target: "call.actor",
                state = self.state.as_str(),
                "Leave ignored, call not connected"
            );
            return Ok(());
        }

        self.set_state(ConnectionState::Leaving);
        let result = self.release_call().await;

        info!(
            target: "call.actor",
            channel_id = %self.config.channel_id,
            success = result.is_ok(),
            "Call left"
        );
        result
    }

    /// Release local tracks, leave both sessions and reset all per-call
    /// state. Ends in `Idle` regardless of failures.
    async fn release_call(&mut self) -> Result<(), CallError> {
        self.cancel_screen_start().await;
        let tracks = self.media.take_all();
        let result = session::run_leave(&self.links, &tracks).await;

        self.clear_remote_state();
        self.local_identity = self.config.local_identity.clone();
        self.screen_identity = self.config.screen_identity.clone();
        self.joined_at = None;
        self.set_state(ConnectionState::Idle);
        self.emit(CallUpdate::LocalMediaChanged(self.media.snapshot()));
        result
    }

    fn clear_remote_state(&mut self) {
        for participant in self.registry.clear() {
            participant.stop_tracks();
        }
        self.speaking.clear();
        metrics::set_participants_active(0);
        metrics::set_speaking_active(0);
    }

    // ------------------------------------------------------------------
    // Local media
    // ------------------------------------------------------------------

    /// Publish the new local flags and, if enabled, tell peers.
    async fn local_media_changed(&mut self) {
        self.emit(CallUpdate::LocalMediaChanged(self.media.snapshot()));

        if !self.config.broadcast_status_updates || self.state != ConnectionState::Connected {
            return;
        }
        let Some(uid) = self.local_identity.clone() else {
            return;
        };

        let message = ControlMessage::StatusUpdate {
            uid,
            audio_enabled: Some(self.media.microphone_enabled()),
            video_enabled: Some(self.media.camera_enabled()),
        };
        if let Err(e) = self.send_control(&message).await {
            warn!(
                target: "call.moderation",
                error = %e,
                "Failed to broadcast local status update"
            );
        }
    }

    async fn handle_toggle_screen_share(
        &mut self,
        respond_to: oneshot::Sender<Result<ScreenShareState, CallError>>,
    ) {
        match self.media.screen_state() {
            ScreenShareState::Starting => {
                debug!(target: "call.media", "Screen share start in flight, toggle ignored");
                let _ = respond_to.send(Ok(ScreenShareState::Starting));
            }

            ScreenShareState::Sharing => {
                let result = match self.media.take_screen_share() {
                    Some(capture) => {
                        local_media::stop_screen_share(capture, self.links.auxiliary.as_ref())
                            .await
                    }
                    None => Ok(()),
                };
                self.emit(CallUpdate::LocalMediaChanged(self.media.snapshot()));
                let _ = respond_to.send(result.map(|()| ScreenShareState::Idle));
            }

            ScreenShareState::Idle => {
                if self.state != ConnectionState::Connected {
                    let _ = respond_to.send(Err(CallError::NotConnected));
                    return;
                }

                self.media.begin_screen_share();
                self.screen_waiter = Some(respond_to);
                self.emit(CallUpdate::LocalMediaChanged(self.media.snapshot()));

                let devices = Arc::clone(&self.devices);
                let auxiliary = Arc::clone(&self.links.auxiliary);
                let task_tx = self.task_tx.clone();
                self.screen_task = Some(tokio::spawn(async move {
                    let result =
                        local_media::start_screen_share(devices.as_ref(), auxiliary.as_ref()).await;
                    let _ = task_tx.send(TaskOutcome::ScreenShare(result)).await;
                }));
            }
        }
    }

    /// Abort an in-flight screen-share start. Its waiter gets `NotConnected`
    /// and anything it captured is closed by the task's track guard.
    async fn cancel_screen_start(&mut self) {
        let Some(task) = self.screen_task.take() else {
            return;
        };
        task.abort();
        let _ = task.await;

        // A start that finished before the abort already queued its outcome;
        // it settles as a capture for an ended call.
        self.media.abort_screen_share();
        if let Some(waiter) = self.screen_waiter.take() {
            let _ = waiter.send(Err(CallError::NotConnected));
        }
        debug!(target: "call.media", "In-flight screen share start cancelled");
    }

    async fn handle_screen_share_settled(&mut self, result: Result<ScreenShareStart, CallError>) {
        self.screen_task = None;
        let waiter = self.screen_waiter.take();

        let reply = match result {
            Ok(start) if self.state == ConnectionState::Connected => {
                let fell_back = start.fell_back;
                match self.media.complete_screen_share(start.capture) {
                    Ok(()) => {
                        metrics::record_screen_share(if fell_back {
                            "no_system_audio"
                        } else {
                            "success"
                        });
                        self.last_error = None;
                        Ok(ScreenShareState::Sharing)
                    }
                    Err(capture) => {
                        self.discard_capture(capture.tracks()).await;
                        Ok(self.media.screen_state())
                    }
                }
            }
            Ok(start) => {
                // The call ended while the capture was starting.
                self.media.abort_screen_share();
                self.discard_capture(start.capture.tracks()).await;
                Err(CallError::NotConnected)
            }
            Err(e) => {
                metrics::record_screen_share("error");
                warn!(target: "call.media", error = %e, "Screen share failed to start");
                self.media.abort_screen_share();
                self.record_error(&e);
                Err(e)
            }
        };

        self.emit(CallUpdate::LocalMediaChanged(self.media.snapshot()));
        if let Some(waiter) = waiter {
            let _ = waiter.send(reply);
        }
    }

    async fn discard_capture(&self, tracks: Vec<crate::transport::LocalTrackHandle>) {
        local_media::release_tracks(&tracks);
        if let Err(e) = self.links.auxiliary.unpublish(&tracks).await {
            debug!(target: "call.media", error = %e, "Unpublish of discarded capture failed");
        }
    }

    async fn handle_task_outcome(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Join { result, started } => self.handle_join_settled(result, started),
            TaskOutcome::ScreenShare(result) => self.handle_screen_share_settled(result).await,
        }
    }

    // ------------------------------------------------------------------
    // Moderation
    // ------------------------------------------------------------------

    fn handle_moderate(&mut self, participant_id: ParticipantId, action: ModerationAction) -> bool {
        let (set, add) = match action {
            ModerationAction::Mute => (ModerationSet::Muted, true),
            ModerationAction::Unmute => (ModerationSet::Muted, false),
            ModerationAction::DisableVideo => (ModerationSet::VideoDisabled, true),
            ModerationAction::EnableVideo => (ModerationSet::VideoDisabled, false),
            ModerationAction::Block => (ModerationSet::Blocked, true),
            ModerationAction::Unblock => (ModerationSet::Blocked, false),
        };
        let changed = if add {
            self.moderation.insert(set, participant_id.clone())
        } else {
            self.moderation.remove(set, &participant_id)
        };

        debug!(
            target: "call.moderation",
            participant_id = %participant_id,
            action = action.as_str(),
            changed,
            "Local moderation action"
        );
        if changed {
            self.emit(CallUpdate::ModerationChanged(self.moderation.snapshot()));
        }
        changed
    }

    async fn send_control(&self, message: &ControlMessage) -> Result<(), CallError> {
        if self.state != ConnectionState::Connected {
            return Err(CallError::NotConnected);
        }

        let payload: Bytes = message
            .encode()
            .map_err(|e| CallError::Internal(format!("control message encode failed: {e}")))?;
        self.links.primary.send_message(payload).await?;

        metrics::record_control_message("outbound", message.type_name());
        debug!(
            target: "call.moderation",
            message_type = message.type_name(),
            "Control message sent"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    async fn handle_event(&mut self, event: TransportEvent) {
        if matches!(self.state, ConnectionState::Idle | ConnectionState::Leaving) {
            debug!(
                target: "call.registry",
                event = event.name(),
                "Event outside an active call, ignoring"
            );
            return;
        }

        match event {
            TransportEvent::ParticipantJoined { participant_id } => {
                if self.is_local(&participant_id) {
                    return;
                }
                if self.registry.observe_presence(&participant_id) {
                    debug!(
                        target: "call.registry",
                        participant_id = %participant_id,
                        "Participant present"
                    );
                    self.emit(CallUpdate::ParticipantJoined(participant_id));
                    metrics::set_participants_active(self.registry.len());
                }
            }

            TransportEvent::ParticipantLeft { participant_id } => {
                self.handle_participant_left(participant_id);
            }

            TransportEvent::MediaPublished {
                participant_id,
                kind,
            } => {
                if self.is_local(&participant_id) {
                    return;
                }
                self.handle_media_published(participant_id, kind).await;
            }

            TransportEvent::MediaUnpublished {
                participant_id,
                kind,
            } => {
                if let Some(track) = self.registry.detach(&participant_id, kind) {
                    track.stop();
                }
                if let Some(participant) = self.registry.get(&participant_id) {
                    debug!(
                        target: "call.registry",
                        participant_id = %participant_id,
                        kind = kind.as_str(),
                        "Remote track unpublished"
                    );
                    self.emit(CallUpdate::ParticipantUpdated(participant.info()));
                }
            }

            TransportEvent::VolumeIndicator { samples } => self.handle_volume(&samples),

            TransportEvent::Message { sender, payload } => {
                self.handle_control_payload(&sender, &payload);
            }
        }
    }

    /// Drop entries created under our own identities before the transport
    /// assigned them, e.g. the screen session seen by the primary one while
    /// the join was still settling.
    fn forget_local_entries(&mut self) {
        for participant_id in [self.local_identity.clone(), self.screen_identity.clone()]
            .into_iter()
            .flatten()
        {
            if self.registry.get(&participant_id).is_some() {
                debug!(
                    target: "call.registry",
                    participant_id = %participant_id,
                    "Removing entry for own identity"
                );
                self.handle_participant_left(participant_id);
            }
        }
    }

    fn handle_participant_left(&mut self, participant_id: ParticipantId) {
        let Some(participant) = self.registry.remove(&participant_id) else {
            return;
        };
        participant.stop_tracks();

        if self.speaking.forget(&participant_id) {
            self.emit(CallUpdate::SpeakingStopped(participant_id.clone()));
            metrics::set_speaking_active(self.speaking.len());
        }

        debug!(
            target: "call.registry",
            participant_id = %participant_id,
            "Participant left"
        );
        self.emit(CallUpdate::ParticipantLeft(participant_id));
        metrics::set_participants_active(self.registry.len());
    }

    async fn handle_media_published(&mut self, participant_id: ParticipantId, kind: MediaKind) {
        let track = match self.links.primary.subscribe(&participant_id, kind).await {
            Ok(track) => track,
            Err(e) => {
                warn!(
                    target: "call.registry",
                    participant_id = %participant_id,
                    kind = kind.as_str(),
                    error = %e,
                    "Subscribe failed"
                );
                metrics::record_event_handler_error("media_published");
                return;
            }
        };

        let info = match kind {
            MediaKind::Audio => {
                if let Err(e) = track.play() {
                    warn!(
                        target: "call.registry",
                        participant_id = %participant_id,
                        error = %e,
                        "Remote audio playback failed"
                    );
                    metrics::record_event_handler_error("media_published");
                    track.stop();
                    return;
                }
                self.registry.attach_audio(&participant_id, track)
            }
            MediaKind::Video => {
                let source = classify_video(track.as_ref());
                metrics::record_video_classification(source.as_str());
                self.registry.attach_video(&participant_id, track, source)
            }
        };

        debug!(
            target: "call.registry",
            participant_id = %participant_id,
            kind = kind.as_str(),
            "Remote track attached"
        );
        self.emit(CallUpdate::ParticipantUpdated(info));
        metrics::set_participants_active(self.registry.len());
    }

    fn handle_volume(&mut self, samples: &[VolumeSample]) {
        let started = self.speaking.observe(samples);
        if started.is_empty() {
            return;
        }
        for participant_id in started {
            self.emit(CallUpdate::SpeakingStarted(participant_id));
        }
        metrics::set_speaking_active(self.speaking.len());
    }

    fn handle_control_payload(&mut self, sender: &ParticipantId, payload: &[u8]) {
        let message = match moderation::decode(payload) {
            Ok(message) => message,
            Err(reason) => {
                debug!(
                    target: "call.moderation",
                    sender = %sender,
                    reason = reason.as_str(),
                    "Dropping undecodable control payload"
                );
                metrics::record_control_dropped(reason.as_str());
                return;
            }
        };

        if let ControlMessage::StatusUpdate { uid, .. } = &message {
            if self.is_local(uid) {
                debug!(
                    target: "call.moderation",
                    sender = %sender,
                    uid = %uid,
                    "Dropping status update about own identity"
                );
                metrics::record_control_dropped("own_identity");
                return;
            }
        }

        let message_type = message.type_name();
        metrics::record_control_message("inbound", message_type);

        match moderation::apply_control(message, &mut self.moderation, &mut self.registry) {
            ControlEffect::Moderation => {
                debug!(
                    target: "call.moderation",
                    sender = %sender,
                    message_type,
                    "Moderation set updated by peer"
                );
                self.emit(CallUpdate::ModerationChanged(self.moderation.snapshot()));
            }
            ControlEffect::Participant(info) => {
                self.emit(CallUpdate::ParticipantUpdated(info));
                metrics::set_participants_active(self.registry.len());
            }
            ControlEffect::Unchanged => {}
        }
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    /// Whether `participant_id` is one of our own two session identities.
    fn is_local(&self, participant_id: &ParticipantId) -> bool {
        self.local_identity.as_ref() == Some(participant_id)
            || self.screen_identity.as_ref() == Some(participant_id)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(
                target: "call.actor",
                from = self.state.as_str(),
                to = state.as_str(),
                "Connection state changed"
            );
            self.state = state;
            self.emit(CallUpdate::ConnectionChanged(state));
        }
    }

    fn record_error(&mut self, err: &CallError) {
        let message = err.client_message();
        self.last_error = Some(message.clone());
        self.emit(CallUpdate::Error(message));
    }

    fn emit(&self, update: CallUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }

    fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            channel_id: self.config.channel_id.clone(),
            connection_state: self.state,
            local_identity: self.local_identity.clone(),
            screen_identity: self.screen_identity.clone(),
            local_media: self.media.snapshot(),
            participants: self.registry.infos(),
            moderation: self.moderation.snapshot(),
            speaking: self.speaking.speaking(),
            last_error: self.last_error.clone(),
            joined_at: self.joined_at,
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Tear the call down after the loop exits.
    ///
    /// In-flight tasks get a grace period to settle so whatever they acquired
    /// is released below; tasks that do not settle are aborted.
    async fn teardown(&mut self) {
        info!(
            target: "call.actor",
            channel_id = %self.config.channel_id,
            state = self.state.as_str(),
            participants = self.registry.len(),
            "Tearing down call"
        );

        for mut task in [self.join_task.take(), self.screen_task.take()]
            .into_iter()
            .flatten()
        {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!(
                    target: "call.actor",
                    channel_id = %self.config.channel_id,
                    "In-flight task did not settle, aborting"
                );
                task.abort();
                // Wait for the task to drop so guarded tracks are closed.
                let _ = task.await;
            }
        }
        while let Ok(outcome) = self.task_rx.try_recv() {
            self.handle_task_outcome(outcome).await;
        }

        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            self.set_state(ConnectionState::Leaving);
            if let Err(e) = self.release_call().await {
                warn!(
                    target: "call.actor",
                    channel_id = %self.config.channel_id,
                    error = %e,
                    "Teardown leave failed"
                );
            }
        }

        if let Some(waiter) = self.join_waiter.take() {
            let _ = waiter.send(Err(CallError::Internal("call shut down".to_string())));
        }
        if let Some(waiter) = self.screen_waiter.take() {
            let _ = waiter.send(Err(CallError::Internal("call shut down".to_string())));
        }

        info!(
            target: "call.actor",
            channel_id = %self.config.channel_id,
            "Teardown complete"
        );
    }
}

/// Next primary session event, or never once the stream has ended.
async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
