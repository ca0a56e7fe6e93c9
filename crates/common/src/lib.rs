//! Common types shared across the call session crates.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes (participants, channels)
pub mod types;

/// Module for secret types that prevent accidental logging of credentials
pub mod secret;
