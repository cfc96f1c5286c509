use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle of a progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Opening a connection
    Connecting,
    /// Receiving frames
    Streaming,
    /// Waiting out the backoff delay before the next connection
    Reconnecting,
    /// Finished; nothing else will be delivered
    Closed,
}

impl StreamState {
    /// Whether this is the terminal state.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Handle to one progress stream.
///
/// Clones share the same stream. Dropping every handle does not stop the
/// stream; call [`close`](Self::close) for that.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    task_id: String,
    cancel: CancellationToken,
    state: watch::Sender<StreamState>,
    retry_count: AtomicU32,
    /// Held while a callback runs, so `close` can wait it out.
    delivery: Mutex<()>,
}

thread_local! {
    /// Address of the `Inner` whose callback runs on this thread, or 0.
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

/// Marks this thread as running a callback of one stream until dropped.
struct DeliveryScope {
    previous: usize,
}

impl DeliveryScope {
    fn enter(key: usize) -> Self {
        Self {
            previous: DELIVERING.with(|current| current.replace(key)),
        }
    }

    fn is_active(key: usize) -> bool {
        DELIVERING.with(|current| current.get() == key)
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERING.with(|current| current.set(self.previous));
    }
}

impl StreamHandle {
    pub(crate) fn new(task_id: String) -> Self {
        Self::with_state(task_id, StreamState::Connecting)
    }

    /// A handle that never had a connection.
    pub(crate) fn new_closed(task_id: String) -> Self {
        let handle = Self::with_state(task_id, StreamState::Closed);
        handle.inner.cancel.cancel();
        handle
    }

    fn with_state(task_id: String, state: StreamState) -> Self {
        Self {
            inner: Arc::new(Inner {
                task_id,
                cancel: CancellationToken::new(),
                state: watch::Sender::new(state),
                retry_count: AtomicU32::new(0),
                delivery: Mutex::new(()),
            }),
        }
    }

    /// Task this stream follows.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.inner.state.borrow()
    }

    /// Whether the stream is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Consecutive transport failures since the last decoded message.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::SeqCst)
    }

    /// Close the stream.
    ///
    /// Drops the live connection and cancels any pending reconnect. Safe to
    /// call at any time, from any callback, any number of times.
    ///
    /// Once `close` returns no callback of this stream is running and none
    /// will start. Called from another thread while a callback runs, it
    /// blocks until that callback returns.
    pub fn close(&self) {
        let mut closed_now = false;
        self.inner.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            *state = StreamState::Closed;
            closed_now = true;
            true
        });

        if !closed_now {
            return;
        }
        debug!(task_id = %self.inner.task_id, "Progress stream closed by caller");

        if DeliveryScope::is_active(self.key()) {
            // Inside one of our own callbacks; the delivery lock is ours already.
            self.inner.cancel.cancel();
        } else {
            let _delivery = self.lock_delivery();
            self.inner.cancel.cancel();
        }
    }

    /// Wait until the stream is closed, whatever the reason.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        // The sender lives in `self`, so the channel cannot close underneath us.
        let _ = state.wait_for(|state| state.is_closed()).await;
    }

    /// Run a callback unless the stream is closed. Returns `false` if it
    /// was skipped.
    pub(crate) fn deliver(&self, callback: impl FnOnce()) -> bool {
        if self.is_closed() {
            return false;
        }
        let _delivery = self.lock_delivery();
        if self.is_closed() {
            return false;
        }
        let _scope = DeliveryScope::enter(self.key());
        callback();
        true
    }

    fn lock_delivery(&self) -> MutexGuard<'_, ()> {
        // A panicking callback poisons the lock; the unit value inside is still fine.
        self.inner
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Move to `next` unless already closed. Returns `false` if closed.
    pub(crate) fn transition(&self, next: StreamState) -> bool {
        let mut open = true;
        self.inner.state.send_if_modified(|state| {
            if state.is_closed() {
                open = false;
                return false;
            }
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        open
    }

    /// Close from the driver side once it stops for good.
    pub(crate) fn finish(&self) {
        self.inner.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            *state = StreamState::Closed;
            true
        });
        self.inner.cancel.cancel();
    }

    pub(crate) fn reset_retries(&self) {
        self.inner.retry_count.store(0, Ordering::SeqCst);
    }

    /// Record a transport failure; returns the updated count.
    pub(crate) fn record_failure(&self) -> u32 {
        self.inner.retry_count.fetch_add(1, Ordering::SeqCst) + 1
    }
}
