//! Join and leave across the primary and auxiliary transport sessions.
//!
//! The two sessions never share state: each gets its own credential and
//! identity, and both are connected concurrently. These routines hold no call
//! state of their own; the actor hands them what they need and folds the
//! result back in.
//!
//! # Join
//!
//! 1. Connect primary and auxiliary concurrently
//! 2. Create microphone, then camera
//! 3. Publish both on primary
//! 4. Disable both
//!
//! `AlreadyConnected` from a connect or publish step means another party
//! already holds the session: the join stops there and counts as joined with
//! whatever was established. Any other failure rolls back (created tracks
//! closed, connected sessions disconnected) and is returned.

use crate::errors::CallError;
use crate::local_media::{release_tracks, TrackGuard};
use crate::transport::{LocalTrackHandle, MediaDevices, TransportError, TransportSession};
use common::secret::SecretString;
use common::types::{ChannelId, ParticipantId};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// The two transport sessions behind one call.
#[derive(Clone)]
pub struct SessionLinks {
    pub primary: Arc<dyn TransportSession>,
    pub auxiliary: Arc<dyn TransportSession>,
}

/// Inputs of a join attempt.
#[derive(Clone)]
pub struct JoinRequest {
    pub channel_id: ChannelId,
    pub token: SecretString,
    pub screen_token: SecretString,
    pub local_identity: Option<ParticipantId>,
    pub screen_identity: Option<ParticipantId>,
}

/// How a successful join settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    /// Every step completed.
    Joined,
    /// A session reported `AlreadyConnected`; later steps were skipped.
    Reconciled,
}

impl JoinStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinStatus::Joined => "success",
            JoinStatus::Reconciled => "already_connected",
        }
    }
}

/// Result of a successful join.
pub struct JoinOutcome {
    pub status: JoinStatus,
    pub local_identity: Option<ParticipantId>,
    pub screen_identity: Option<ParticipantId>,
    pub microphone: Option<LocalTrackHandle>,
    pub camera: Option<LocalTrackHandle>,
}

impl std::fmt::Debug for JoinOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinOutcome")
            .field("status", &self.status)
            .field("local_identity", &self.local_identity)
            .field("screen_identity", &self.screen_identity)
            .field("has_microphone", &self.microphone.is_some())
            .field("has_camera", &self.camera.is_some())
            .finish()
    }
}

/// Metric label for a failed join.
#[must_use]
pub fn join_failure_status(err: &CallError) -> &'static str {
    match err {
        CallError::TrackCreation(_) => "track_error",
        _ => "transport_error",
    }
}

/// What has been acquired so far, for rollback.
///
/// Created tracks sit in a [`TrackGuard`] so an aborted join still closes
/// them. Connected sessions are left to the caller's teardown in that case.
#[derive(Default)]
struct Acquired {
    primary: bool,
    auxiliary: bool,
    tracks: TrackGuard,
}

impl Acquired {
    async fn roll_back(mut self, links: &SessionLinks) {
        let released = self.tracks.len();
        self.tracks.release();
        if self.primary {
            if let Err(e) = links.primary.disconnect().await {
                warn!(target: "call.session", error = %e, "Rollback: primary disconnect failed");
            }
        }
        if self.auxiliary {
            if let Err(e) = links.auxiliary.disconnect().await {
                warn!(target: "call.session", error = %e, "Rollback: auxiliary disconnect failed");
            }
        }
        debug!(
            target: "call.session",
            tracks = released,
            primary = self.primary,
            auxiliary = self.auxiliary,
            "Join rolled back"
        );
    }
}

/// Run a join. See the module docs for the step order.
#[instrument(skip_all, name = "call.session.join", fields(channel_id = %request.channel_id))]
pub async fn run_join(
    links: &SessionLinks,
    devices: &dyn MediaDevices,
    request: &JoinRequest,
) -> Result<JoinOutcome, CallError> {
    let mut acquired = Acquired::default();
    let mut outcome = JoinOutcome {
        status: JoinStatus::Joined,
        local_identity: request.local_identity.clone(),
        screen_identity: request.screen_identity.clone(),
        microphone: None,
        camera: None,
    };

    let (primary, auxiliary) = tokio::join!(
        links.primary.connect(
            &request.channel_id,
            &request.token,
            request.local_identity.as_ref()
        ),
        links.auxiliary.connect(
            &request.channel_id,
            &request.screen_token,
            request.screen_identity.as_ref()
        ),
    );

    let mut reconciled = false;
    let mut failure = None;
    match primary {
        Ok(identity) => {
            acquired.primary = true;
            outcome.local_identity = Some(identity);
        }
        Err(TransportError::AlreadyConnected) => reconciled = true,
        Err(e) => failure = Some(e),
    }
    match auxiliary {
        Ok(identity) => {
            acquired.auxiliary = true;
            outcome.screen_identity = Some(identity);
        }
        Err(TransportError::AlreadyConnected) => reconciled = true,
        Err(e) => {
            failure.get_or_insert(e);
        }
    }

    if reconciled {
        if let Some(e) = failure {
            warn!(
                target: "call.session",
                error = %e,
                "Session already active; ignoring failure of the other session"
            );
        }
        info!(target: "call.session", "Session already active, reconciling to connected");
        outcome.status = JoinStatus::Reconciled;
        return Ok(outcome);
    }
    if let Some(e) = failure {
        warn!(target: "call.session", error = %e, "Connect failed");
        acquired.roll_back(links).await;
        return Err(CallError::Transport(e));
    }

    debug!(
        target: "call.session",
        local_identity = ?outcome.local_identity,
        screen_identity = ?outcome.screen_identity,
        "Both sessions connected"
    );

    let microphone = match devices.create_microphone_track().await {
        Ok(track) => track,
        Err(e) => {
            warn!(target: "call.session", error = %e, "Microphone creation failed");
            acquired.roll_back(links).await;
            return Err(CallError::TrackCreation(e));
        }
    };
    acquired.tracks.push(Arc::clone(&microphone));

    let camera = match devices.create_camera_track().await {
        Ok(track) => track,
        Err(e) => {
            warn!(target: "call.session", error = %e, "Camera creation failed");
            acquired.roll_back(links).await;
            return Err(CallError::TrackCreation(e));
        }
    };
    acquired.tracks.push(Arc::clone(&camera));

    let tracks = [Arc::clone(&microphone), Arc::clone(&camera)];
    match links.primary.publish(&tracks).await {
        Ok(()) => {}
        Err(TransportError::AlreadyConnected) => {
            info!(target: "call.session", "Publish reported session already active");
            outcome.status = JoinStatus::Reconciled;
        }
        Err(e) => {
            warn!(target: "call.session", error = %e, "Publish failed");
            acquired.roll_back(links).await;
            return Err(CallError::Transport(e));
        }
    }

    for track in &tracks {
        if let Err(e) = track.set_enabled(false) {
            warn!(target: "call.session", error = %e, "Could not disable published track");
            acquired.roll_back(links).await;
            return Err(CallError::Transport(e));
        }
    }

    acquired.tracks.disarm();
    outcome.microphone = Some(microphone);
    outcome.camera = Some(camera);

    info!(
        target: "call.session",
        status = outcome.status.as_str(),
        "Join complete, microphone and camera published disabled"
    );
    Ok(outcome)
}

/// Leave the call: release `tracks`, then disconnect both sessions.
///
/// Every step runs even if an earlier one failed; the first failure is
/// returned. Disconnecting a session that is not connected is not a failure.
#[instrument(skip_all, name = "call.session.leave", fields(tracks = tracks.len()))]
pub async fn run_leave(links: &SessionLinks, tracks: &[LocalTrackHandle]) -> Result<(), CallError> {
    release_tracks(tracks);

    let mut first_error = None;
    for (name, session) in [("primary", &links.primary), ("auxiliary", &links.auxiliary)] {
        match session.disconnect().await {
            Ok(()) | Err(TransportError::NotConnected) => {
                debug!(target: "call.session", session = name, "Session left");
            }
            Err(e) => {
                warn!(target: "call.session", session = name, error = %e, "Disconnect failed");
                first_error.get_or_insert(CallError::Transport(e));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
