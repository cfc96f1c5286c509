#![deny(missing_docs)]
//! Download tracker client library.
//!
//! Talks to a remote file-download service: submits multi-file tasks, queries
//! their state and follows their progress over server-sent events with
//! bounded exponential-backoff reconnection.

/// REST client for the download service.
pub mod api;
/// Configuration management.
pub mod config;
/// Live task progress over SSE.
pub mod progress;
/// One-line progress summaries.
pub mod render;
/// Utility functions.
pub mod utils;

pub use api::{ApiError, DownloadApi};
pub use config::Settings;
pub use progress::{
    ProgressMessage, ProgressStreamClient, ReconnectPolicy, StreamError, StreamHandle, StreamState,
};
