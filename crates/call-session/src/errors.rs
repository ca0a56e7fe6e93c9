//! Call session error types.
//!
//! Errors returned from [`CallHandle`](crate::actors::CallHandle) operations.
//! Event handlers (lifecycle, telemetry, control messages) never produce these;
//! they log and swallow their own failures.

use crate::transport::TransportError;
use thiserror::Error;

/// Call session error type.
///
/// Categories:
/// - `TrackCreation`: user-actionable (permission denied, device missing)
/// - `Transport`: connect/publish/leave failure, not retried
/// - `NotConnected`: operation needs a connected call
/// - `Config`, `Internal`: setup and actor plumbing failures
#[derive(Debug, Error)]
pub enum CallError {
    /// Transport operation failed (connect, publish, unpublish, leave, send).
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// Creating a local capture track failed.
    #[error("Failed to create local track: {0}")]
    TrackCreation(TransportError),

    /// Operation requires a connected call.
    #[error("Call is not connected")]
    NotConnected,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Actor mailbox or task plumbing failed.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// Whether the user can fix this by acting (granting permission,
    /// plugging in a device) and retrying.
    #[must_use]
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            CallError::TrackCreation(
                TransportError::PermissionDenied(_) | TransportError::DeviceUnavailable(_)
            )
        )
    }

    /// Returns a UI-safe error message (no transport internals).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CallError::TrackCreation(TransportError::PermissionDenied(_)) => {
                "Permission to use the device was denied".to_string()
            }
            CallError::TrackCreation(TransportError::DeviceUnavailable(_)) => {
                "The device is unavailable".to_string()
            }
            CallError::TrackCreation(_) => "Could not start the device".to_string(),
            CallError::Transport(TransportError::Network(_)) => {
                "Connection problem, please try again".to_string()
            }
            CallError::Transport(_) => "The call could not be updated".to_string(),
            CallError::NotConnected => "Join the call first".to_string(),
            CallError::Config(_) | CallError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        CallError::Transport(err)
    }
}
