use super::backoff::ReconnectPolicy;
use super::error::{StreamError, TransportError};
use super::handle::{StreamHandle, StreamState};
use super::message::ProgressMessage;
use super::transport::{ProgressTransport, SseFrame};
use crate::utils::truncate_str;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub(crate) type MessageCallback = Box<dyn FnMut(ProgressMessage) + Send>;
pub(crate) type ErrorCallback = Box<dyn FnMut(StreamError) + Send>;

/// Raw payload characters kept in logs for undecodable frames
const LOGGED_PAYLOAD_CHARS: usize = 200;

/// How one connection ended.
enum Outcome {
    /// A terminal message arrived
    Terminal,
    /// The handle was closed
    Closed,
    /// The transport failed
    Disconnected(TransportError),
}

/// Runs the connect / stream / reconnect loop of one handle.
pub(crate) struct StreamDriver {
    handle: StreamHandle,
    transport: Arc<dyn ProgressTransport>,
    policy: ReconnectPolicy,
    on_message: MessageCallback,
    on_error: ErrorCallback,
}

impl StreamDriver {
    pub(crate) fn new(
        handle: StreamHandle,
        transport: Arc<dyn ProgressTransport>,
        policy: ReconnectPolicy,
        on_message: MessageCallback,
        on_error: ErrorCallback,
    ) -> Self {
        Self {
            handle,
            transport,
            policy,
            on_message,
            on_error,
        }
    }

    pub(crate) async fn run(mut self) {
        let task_id = self.handle.task_id().to_string();
        info!(task_id = %task_id, "Opening progress stream");

        loop {
            match self.connect_and_stream().await {
                Outcome::Terminal => {
                    info!(task_id = %task_id, "Task reached a terminal state, closing progress stream");
                    break;
                }
                Outcome::Closed => {
                    debug!(task_id = %task_id, "Progress stream driver stopping after close");
                    break;
                }
                Outcome::Disconnected(cause) => {
                    if !self.wait_for_reconnect(cause).await {
                        break;
                    }
                }
            }
        }

        self.handle.finish();
    }

    /// One connection, from opening it until it ends. The frame stream is
    /// dropped on return, so a reconnect never overlaps with it.
    async fn connect_and_stream(&mut self) -> Outcome {
        let cancel = self.handle.cancellation().clone();
        if !self.handle.transition(StreamState::Connecting) {
            return Outcome::Closed;
        }

        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => return Outcome::Closed,
            result = self.transport.connect(self.handle.task_id()) => result,
        };

        let mut frames = match connected {
            Ok(frames) => frames,
            Err(e) => return Outcome::Disconnected(e),
        };

        if !self.handle.transition(StreamState::Streaming) {
            return Outcome::Closed;
        }
        debug!(task_id = %self.handle.task_id(), "Progress stream connected");

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Outcome::Closed,
                frame = frames.next() => frame,
            };

            match next {
                Some(Ok(frame)) => {
                    if let Some(outcome) = self.dispatch(frame) {
                        return outcome;
                    }
                }
                Some(Err(e)) => return Outcome::Disconnected(e),
                None => return Outcome::Disconnected(TransportError::Ended),
            }
        }
    }

    /// Deliver one frame. Returns an outcome when the connection must end.
    fn dispatch(&mut self, frame: SseFrame) -> Option<Outcome> {
        if !frame.is_message() {
            debug!(
                task_id = %self.handle.task_id(),
                event = %frame.event,
                "Skipping non-message frame"
            );
            return None;
        }

        let cancel = self.handle.cancellation();
        if cancel.is_cancelled() {
            return Some(Outcome::Closed);
        }

        match ProgressMessage::parse(&frame.data) {
            Ok(message) => {
                let terminal = message.is_terminal();
                let on_message = &mut self.on_message;
                if !self.handle.deliver(|| on_message(message)) {
                    return Some(Outcome::Closed);
                }
                self.handle.reset_retries();
                if terminal {
                    return Some(Outcome::Terminal);
                }
            }
            Err(e) => {
                warn!(
                    task_id = %self.handle.task_id(),
                    error = %e,
                    payload = %truncate_str(&frame.data, LOGGED_PAYLOAD_CHARS),
                    "Failed to parse progress message"
                );
                let on_error = &mut self.on_error;
                let error = StreamError::MalformedFrame {
                    reason: e.to_string(),
                    data: frame.data,
                };
                if !self.handle.deliver(|| on_error(error)) {
                    return Some(Outcome::Closed);
                }
            }
        }

        cancel.is_cancelled().then_some(Outcome::Closed)
    }

    /// Apply the backoff schedule after a transport failure. Returns `true`
    /// when a new connection should be opened.
    async fn wait_for_reconnect(&mut self, cause: TransportError) -> bool {
        let task_id = self.handle.task_id().to_string();
        let delay = self.policy.delay_for(self.handle.retry_count());
        let attempt = self.handle.record_failure();
        let max_retries = self.policy.max_retries;

        if !self.policy.allows(attempt) {
            error!(
                task_id = %task_id,
                max_retries = max_retries,
                error = %cause,
                "Progress stream reconnect limit reached, giving up"
            );
            let on_error = &mut self.on_error;
            self.handle
                .deliver(|| on_error(StreamError::RetryLimitExceeded { max_retries, cause }));
            return false;
        }

        if !self.handle.transition(StreamState::Reconnecting) {
            return false;
        }

        warn!(
            task_id = %task_id,
            attempt = attempt,
            max_attempts = max_retries,
            delay_ms = delay.as_millis(),
            error = %cause,
            "Progress stream disconnected, scheduling reconnect"
        );
        let on_error = &mut self.on_error;
        let notice = StreamError::Reconnecting {
            cause,
            delay,
            attempt,
            max_retries,
        };
        if !self.handle.deliver(|| on_error(notice)) {
            return false;
        }

        let cancel = self.handle.cancellation().clone();
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}
