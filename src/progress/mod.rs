//! Live task progress over server-sent events
//!
//! A [`ProgressStreamClient`] opens one long-lived SSE subscription per task.
//! Every stream is driven by its own spawned task that decodes frames into
//! [`ProgressMessage`]s, closes the connection once the task reaches a
//! terminal state and reconnects with capped exponential backoff when the
//! transport fails.
//!
//! ```text
//! ProgressStreamClient::open(task_id, on_message, on_error)
//!   └─ spawns driver ──► CONNECTING ─► STREAMING ─┬─► CLOSED (terminal / close())
//!        │                   ▲                     │
//!        │                   └── RECONNECTING ◄────┘  (transport error, backoff)
//!        └─ StreamHandle: state(), retry_count(), close(), closed().await
//! ```

mod backoff;
mod driver;
mod error;
mod handle;
mod message;
mod transport;

pub use backoff::ReconnectPolicy;
pub use error::{StreamError, TransportError};
pub use handle::{StreamHandle, StreamState};
pub use message::ProgressMessage;
pub use transport::{FrameStream, ProgressEndpoint, ProgressTransport, SseFrame, SseTransport};

use crate::config::Settings;
use driver::StreamDriver;
use std::sync::Arc;
use tracing::warn;

/// Opens progress streams for download tasks.
///
/// The client is cheap to clone and may open any number of independent
/// streams; each returned [`StreamHandle`] owns its own connection and retry
/// counter.
#[derive(Clone)]
pub struct ProgressStreamClient {
    transport: Arc<dyn ProgressTransport>,
    policy: ReconnectPolicy,
}

impl ProgressStreamClient {
    /// Create a client over an arbitrary transport.
    #[must_use]
    pub fn new(transport: Arc<dyn ProgressTransport>, policy: ReconnectPolicy) -> Self {
        Self { transport, policy }
    }

    /// Create a client that talks SSE to the configured download service.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidUrl` if the base URL or progress path is
    /// unusable, or `TransportError::Connect` if the HTTP client cannot be built.
    pub fn from_settings(settings: &Settings) -> Result<Self, TransportError> {
        let transport = SseTransport::from_settings(settings)?;
        Ok(Self::new(Arc::new(transport), settings.reconnect_policy()))
    }

    /// Reconnect policy applied to every stream opened by this client.
    #[must_use]
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Start streaming progress for `task_id`.
    ///
    /// `on_message` receives every decoded frame in arrival order. `on_error`
    /// receives malformed-frame reports, reconnect notices and fatal errors.
    /// Both run on the stream's driver task, one at a time, and may call
    /// [`StreamHandle::close`] on a clone of the returned handle.
    ///
    /// Never fails directly: a missing async runtime or an empty task id is
    /// reported through `on_error` and yields a handle that is already closed.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use download_tracker::config::Settings;
    /// use download_tracker::progress::ProgressStreamClient;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = ProgressStreamClient::from_settings(&Settings::default())?;
    /// let handle = client.open(
    ///     "abc123",
    ///     |message| println!("progress: {message:?}"),
    ///     |error| eprintln!("{error}"),
    /// );
    /// handle.closed().await;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<M, E>(
        &self,
        task_id: impl Into<String>,
        on_message: M,
        mut on_error: E,
    ) -> StreamHandle
    where
        M: FnMut(ProgressMessage) + Send + 'static,
        E: FnMut(StreamError) + Send + 'static,
    {
        let task_id = task_id.into();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(task_id = %task_id, "No async runtime available, progress stream not opened");
            on_error(StreamError::Unsupported(
                "no tokio runtime is running on this thread".to_string(),
            ));
            return StreamHandle::new_closed(task_id);
        };

        if task_id.trim().is_empty() {
            warn!("Refusing to open progress stream for an empty task id");
            on_error(StreamError::InvalidTaskId);
            return StreamHandle::new_closed(task_id);
        }

        let handle = StreamHandle::new(task_id);
        let driver = StreamDriver::new(
            handle.clone(),
            Arc::clone(&self.transport),
            self.policy,
            Box::new(on_message),
            Box::new(on_error),
        );
        runtime.spawn(driver.run());

        handle
    }
}
