//! Credential wrappers.
//!
//! Channel tokens handed to the transport are bearer credentials. They are held
//! as [`SecretString`] from the moment configuration is loaded until the single
//! point where the transport receives them, so `Debug` output and tracing
//! fields can never carry the raw value.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct JoinCredentials {
//!     channel: String,
//!     token: SecretString,
//! }
//!
//! let creds = JoinCredentials {
//!     channel: "standup".to_string(),
//!     token: SecretString::from("007eJxTYBB"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("007eJxTYBB"));
//! assert_eq!(creds.token.expose_secret(), "007eJxTYBB");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Returns `true` when the credential is empty or only whitespace.
///
/// Transports reject blank tokens with an opaque error; checking up front lets
/// configuration report the actual problem.
#[must_use]
pub fn is_blank(secret: &SecretString) -> bool {
    secret.expose_secret().trim().is_empty()
}
