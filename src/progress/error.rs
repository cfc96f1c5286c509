use std::time::Duration;
use thiserror::Error;

/// Failures of the underlying SSE connection.
///
/// Every variant is recoverable from the stream's point of view: it moves the
/// stream into the reconnect schedule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The progress endpoint URL could not be built
    #[error("invalid progress endpoint: {0}")]
    InvalidUrl(String),
    /// The connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),
    /// The server answered with a non-success status
    #[error("server responded with HTTP {0}")]
    Status(u16),
    /// The server answered with something other than an event stream
    #[error("unexpected content type {0:?}, expected text/event-stream")]
    ContentType(String),
    /// The event stream broke while reading
    #[error("event stream error: {0}")]
    Stream(String),
    /// The server closed the event stream
    #[error("server closed the event stream")]
    Ended,
}

/// Errors reported to a progress stream's `on_error` callback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Streaming is not possible in the calling environment
    #[error("progress streaming is not supported here: {0}")]
    Unsupported(String),
    /// The task id was empty
    #[error("task id must not be empty")]
    InvalidTaskId,
    /// One frame could not be decoded; the stream keeps running
    #[error("malformed progress message: {reason}")]
    MalformedFrame {
        /// Decoder error
        reason: String,
        /// Raw frame payload
        data: String,
    },
    /// The connection dropped and a reconnect has been scheduled
    #[error(
        "progress stream disconnected ({cause}), retrying in {}s ({attempt}/{max_retries})",
        .delay.as_secs_f64()
    )]
    Reconnecting {
        /// What broke the connection
        cause: TransportError,
        /// Wait before the next connection attempt
        delay: Duration,
        /// 1-based reconnect attempt number
        attempt: u32,
        /// Attempts allowed in total
        max_retries: u32,
    },
    /// Reconnects are exhausted; the stream is closed
    #[error("progress stream gave up after {max_retries} reconnects ({cause}), refresh manually")]
    RetryLimitExceeded {
        /// Attempts that were allowed
        max_retries: u32,
        /// The last transport failure
        cause: TransportError,
    },
}

impl StreamError {
    /// Whether the stream is closed after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unsupported(_) | Self::InvalidTaskId | Self::RetryLimitExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnecting_message() {
        let err = StreamError::Reconnecting {
            cause: TransportError::Status(502),
            delay: Duration::from_millis(2000),
            attempt: 2,
            max_retries: 5,
        };
        assert_eq!(
            err.to_string(),
            "progress stream disconnected (server responded with HTTP 502), retrying in 2s (2/5)"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(StreamError::InvalidTaskId.is_fatal());
        assert!(StreamError::Unsupported("x".to_string()).is_fatal());
        assert!(StreamError::RetryLimitExceeded {
            max_retries: 5,
            cause: TransportError::Ended,
        }
        .is_fatal());
        assert!(!StreamError::MalformedFrame {
            reason: "bad".to_string(),
            data: "not-json".to_string(),
        }
        .is_fatal());
    }
}
