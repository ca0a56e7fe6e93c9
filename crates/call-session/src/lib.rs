//! Call Session Library
//!
//! Client-side coordinator for a real-time multi-party audio/video call. It
//! drives two transport sessions (primary for camera and microphone,
//! auxiliary for screen share), owns the local tracks, and keeps a local
//! mirror of every remote participant, the moderation sets and who is
//! speaking.
//!
//! # Architecture
//!
//! A single `CallActor` task owns all call state. The presentation layer talks
//! to it through cloneable [`CallHandle`]s and reads state through
//! [`CallSnapshot`] or a stream of [`CallUpdate`]s.
//!
//! ```text
//!            CallHandle ──► CallActor ◄── primary session events
//!                              │
//!        ┌──────────┬──────────┼────────────┬─────────────┐
//!        ▼          ▼          ▼            ▼             ▼
//!   LocalMedia  Registry  Classifier   Moderation   SpeakingDetector
//! ```
//!
//! The media engine itself is out of scope; it is reached through the traits
//! in [`transport`].
//!
//! # Modules
//!
//! - [`actors`] - Coordinator actor, handle, messages
//! - [`classifier`] - Camera vs. screen classification of remote video
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types
//! - [`local_media`] - Local tracks and screen share
//! - [`moderation`] - Control channel codec and moderation sets
//! - [`observability`] - Metrics
//! - [`registry`] - Remote participant registry
//! - [`session`] - Join/leave across the two transport sessions
//! - [`speaking`] - Speaking activity detector
//! - [`transport`] - Transport collaborator traits

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod actors;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod local_media;
pub mod moderation;
pub mod observability;
pub mod registry;
pub mod session;
pub mod speaking;
pub mod transport;

pub use actors::{
    CallActor, CallHandle, CallSnapshot, CallUpdate, ConnectionState, ModerationAction,
};
pub use config::CallConfig;
pub use errors::CallError;
pub use local_media::{LocalMediaSnapshot, ScreenShareState};
pub use moderation::{ControlMessage, ModerationSnapshot};
pub use registry::RemoteParticipantInfo;
pub use session::SessionLinks;
