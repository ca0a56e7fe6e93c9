//! Call session configuration.
//!
//! Configuration is loaded from environment variables or built directly by an
//! embedding application. Credentials are redacted in Debug output.

use common::secret::{is_blank, SecretString};
use common::types::{ChannelId, ParticipantId};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Volume level at or above which a participant counts as speaking.
pub const DEFAULT_SPEAKING_THRESHOLD: u32 = 5;

/// Time without a qualifying volume sample before a speaker is cleared.
pub const DEFAULT_SPEAKING_DECAY_MS: u64 = 1200;

/// Default actor mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default broadcast buffer for call updates.
pub const DEFAULT_UPDATE_CAPACITY: usize = 256;

/// Call session configuration.
#[derive(Clone)]
pub struct CallConfig {
    /// Channel both transport sessions join.
    pub channel_id: ChannelId,

    /// Credential for the primary (camera + microphone) session.
    pub token: SecretString,

    /// Credential for the auxiliary (screen) session. Falls back to `token`.
    pub screen_token: Option<SecretString>,

    /// Identity requested for the primary session. The transport assigns one
    /// when unset.
    pub local_identity: Option<ParticipantId>,

    /// Identity requested for the auxiliary session, independent of
    /// `local_identity`.
    pub screen_identity: Option<ParticipantId>,

    /// Speaking detector threshold (default: 5).
    pub speaking_threshold: u32,

    /// Speaking detector decay (default: 1.2s).
    pub speaking_decay: Duration,

    /// Broadcast a `status_update` control message when the local microphone
    /// or camera is toggled (default: true).
    pub broadcast_status_updates: bool,

    /// Capacity of the actor mailbox.
    pub mailbox_capacity: usize,

    /// Capacity of the call update broadcast channel.
    pub update_capacity: usize,
}

/// Custom Debug implementation that redacts credentials.
impl fmt::Debug for CallConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallConfig")
            .field("channel_id", &self.channel_id)
            .field("token", &"[REDACTED]")
            .field(
                "screen_token",
                &self.screen_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("local_identity", &self.local_identity)
            .field("screen_identity", &self.screen_identity)
            .field("speaking_threshold", &self.speaking_threshold)
            .field("speaking_decay", &self.speaking_decay)
            .field("broadcast_status_updates", &self.broadcast_status_updates)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("update_capacity", &self.update_capacity)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl CallConfig {
    /// Build a configuration with defaults for everything but the channel and
    /// primary credential.
    #[must_use]
    pub fn new(channel_id: impl Into<ChannelId>, token: SecretString) -> Self {
        Self {
            channel_id: channel_id.into(),
            token,
            screen_token: None,
            local_identity: None,
            screen_identity: None,
            speaking_threshold: DEFAULT_SPEAKING_THRESHOLD,
            speaking_decay: Duration::from_millis(DEFAULT_SPEAKING_DECAY_MS),
            broadcast_status_updates: true,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            update_capacity: DEFAULT_UPDATE_CAPACITY,
        }
    }

    /// Use a dedicated credential for the screen session.
    #[must_use]
    pub fn with_screen_token(mut self, token: SecretString) -> Self {
        self.screen_token = Some(token);
        self
    }

    /// Request specific identities for the two sessions.
    #[must_use]
    pub fn with_identities(
        mut self,
        local: Option<ParticipantId>,
        screen: Option<ParticipantId>,
    ) -> Self {
        self.local_identity = local;
        self.screen_identity = screen;
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let channel_id = vars
            .get("CALL_CHANNEL_ID")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("CALL_CHANNEL_ID".to_string()))?;

        let token = SecretString::from(
            vars.get("CALL_TOKEN")
                .ok_or_else(|| ConfigError::MissingEnvVar("CALL_TOKEN".to_string()))?
                .clone(),
        );
        if is_blank(&token) {
            return Err(ConfigError::InvalidValue(
                "CALL_TOKEN must not be blank".to_string(),
            ));
        }

        let screen_token = vars
            .get("CALL_SCREEN_TOKEN")
            .map(|s| SecretString::from(s.clone()))
            .filter(|s| !is_blank(s));

        let local_identity = vars
            .get("CALL_LOCAL_IDENTITY")
            .filter(|s| !s.trim().is_empty())
            .map(|s| ParticipantId::new(s.trim()));

        let screen_identity = vars
            .get("CALL_SCREEN_IDENTITY")
            .filter(|s| !s.trim().is_empty())
            .map(|s| ParticipantId::new(s.trim()));

        let speaking_threshold =
            parse_var(vars, "CALL_SPEAKING_THRESHOLD", DEFAULT_SPEAKING_THRESHOLD)?;

        let decay_ms = parse_var(vars, "CALL_SPEAKING_DECAY_MS", DEFAULT_SPEAKING_DECAY_MS)?;
        if decay_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "CALL_SPEAKING_DECAY_MS must be greater than zero".to_string(),
            ));
        }

        let broadcast_status_updates = parse_var(vars, "CALL_BROADCAST_STATUS_UPDATES", true)?;

        let mailbox_capacity = parse_var(vars, "CALL_MAILBOX_CAPACITY", DEFAULT_MAILBOX_CAPACITY)?;
        let update_capacity = parse_var(vars, "CALL_UPDATE_CAPACITY", DEFAULT_UPDATE_CAPACITY)?;
        if mailbox_capacity == 0 || update_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "channel capacities must be greater than zero".to_string(),
            ));
        }

        Ok(CallConfig {
            channel_id: ChannelId::new(channel_id.trim()),
            token,
            screen_token,
            local_identity,
            screen_identity,
            speaking_threshold,
            speaking_decay: Duration::from_millis(decay_ms),
            broadcast_status_updates,
            mailbox_capacity,
            update_capacity,
        })
    }

    /// Credential for the auxiliary session.
    #[must_use]
    pub fn screen_credential(&self) -> &SecretString {
        self.screen_token.as_ref().unwrap_or(&self.token)
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
    }
}
