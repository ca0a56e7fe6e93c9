//! # Call Test Utilities
//!
//! Shared test utilities for the call session coordinator.
//!
//! This crate provides mock implementations of the transport collaborator and
//! test fixtures, so the coordinator can be exercised without a media engine.
//!
//! ## Modules
//!
//! - `mock_transport` - Scriptable transport session with call counts and an
//!   event injector
//! - `mock_devices` - Capture device factory with configurable failures
//! - `mock_tracks` - Local and remote tracks that record what was done to them
//! - `fixtures` - Configurations, identities and a spawned test call
//!
//! ## Usage
//!
//! ```rust,ignore
//! use call_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let call = TestCall::start();
//!
//!     call.handle.join().await.unwrap();
//!     call.primary.emit_joined("alice").await;
//!
//!     let snapshot = call.handle.snapshot().await.unwrap();
//!     assert_eq!(snapshot.participants.len(), 1);
//! }
//! ```

pub mod fixtures;
pub mod mock_devices;
pub mod mock_tracks;
pub mod mock_transport;

pub use fixtures::{
    pid, random_channel, test_config, wait_until, TestCall, TEST_LOCAL_IDENTITY,
    TEST_SCREEN_IDENTITY,
};
pub use mock_devices::MockMediaDevices;
pub use mock_tracks::{MockLocalTrack, MockRemoteTrack};
pub use mock_transport::MockTransport;

use tracing_subscriber::EnvFilter;

/// Install a test-friendly tracing subscriber once per test binary.
///
/// Honors `RUST_LOG`; defaults to `call=debug`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("call=debug")),
        )
        .with_test_writer()
        .try_init();
}
