//! Test fixtures for call coordinator tests.

use call_session::actors::CallActor;
use call_session::transport::{MediaDevices, TransportSession};
use call_session::{CallConfig, CallHandle, SessionLinks};
use common::secret::SecretString;
use common::types::{ChannelId, ParticipantId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::mock_devices::MockMediaDevices;
use crate::mock_transport::MockTransport;

/// Identity the mock primary session assigns.
pub const TEST_LOCAL_IDENTITY: &str = "1001";

/// Identity the mock auxiliary session assigns.
pub const TEST_SCREEN_IDENTITY: &str = "2001";

/// Shorthand for a participant ID.
#[must_use]
pub fn pid(id: &str) -> ParticipantId {
    ParticipantId::from(id)
}

/// A channel name unique to one test.
#[must_use]
pub fn random_channel() -> ChannelId {
    ChannelId::new(format!("test-channel-{}", uuid::Uuid::new_v4()))
}

/// Default configuration on a fresh channel.
#[must_use]
pub fn test_config() -> CallConfig {
    CallConfig::new(random_channel(), SecretString::from("test-token"))
}

/// A running call actor wired to mocks.
pub struct TestCall {
    pub handle: CallHandle,
    pub task: JoinHandle<()>,
    pub primary: Arc<MockTransport>,
    pub auxiliary: Arc<MockTransport>,
    pub devices: Arc<MockMediaDevices>,
    pub cancel_token: CancellationToken,
}

impl TestCall {
    /// Start a call with the default config and mocks that succeed.
    #[must_use]
    pub fn start() -> Self {
        Self::spawn(
            test_config(),
            MockTransport::with_identity(TEST_LOCAL_IDENTITY),
            MockTransport::with_identity(TEST_SCREEN_IDENTITY),
            MockMediaDevices::granting(),
        )
    }

    /// Start a call on the given config and mocks.
    ///
    /// # Panics
    ///
    /// If the actor refuses the configuration.
    #[must_use]
    pub fn spawn(
        config: CallConfig,
        primary: Arc<MockTransport>,
        auxiliary: Arc<MockTransport>,
        devices: Arc<MockMediaDevices>,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let links = SessionLinks {
            primary: Arc::clone(&primary) as Arc<dyn TransportSession>,
            auxiliary: Arc::clone(&auxiliary) as Arc<dyn TransportSession>,
        };
        let (handle, task) = CallActor::spawn(
            config,
            links,
            Arc::clone(&devices) as Arc<dyn MediaDevices>,
            cancel_token.clone(),
        )
        .expect("call actor should spawn");

        Self {
            handle,
            task,
            primary,
            auxiliary,
            devices,
            cancel_token,
        }
    }

    /// Start a call and join it.
    ///
    /// # Panics
    ///
    /// If the join fails.
    pub async fn joined() -> Self {
        let call = Self::start();
        call.handle.join().await.expect("join should succeed");
        call
    }

    /// Cancel the actor and wait for teardown to finish.
    ///
    /// # Panics
    ///
    /// If the actor task panicked.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        self.task.await.expect("call actor should not panic");
    }
}

/// Poll `condition` until it holds, yielding to other tasks in between.
///
/// # Panics
///
/// If the condition does not hold within five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}
