//! REST client for the download service
//!
//! Submits and cancels multi-file tasks, looks up task state and downloads
//! single files with resume support. Status lookups go through a short-lived
//! [`StatusCache`].

pub mod http_utils;
mod status_cache;
mod types;

pub use status_cache::StatusCache;
pub use types::{ApiReply, TaskSnapshot, TaskStage, OK_CODE};

use crate::config::Settings;
use crate::utils::{join_path, new_request_id};
use futures_util::StreamExt;
use http_utils::{create_http_client, ensure_success};
use reqwest::header::{HeaderName, CONTENT_RANGE, RANGE};
use reqwest::{Client as HttpClient, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// Header carrying a random per-request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Errors returned by [`DownloadApi`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// The base URL or a request URL could not be built
    #[error("Invalid service URL: {0}")]
    InvalidUrl(String),
    /// The request was rejected before sending
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Error during network communication
    #[error("Network error: {0}")]
    Network(String),
    /// The service answered with an error status
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message extracted from the reply
        message: String,
    },
    /// The task (or file) does not exist
    #[error("Not found")]
    NotFound,
    /// The reply body could not be decoded
    #[error("JSON error: {0}")]
    Json(String),
    /// Writing the downloaded file failed
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client for the download service REST API.
#[derive(Clone)]
pub struct DownloadApi {
    client: HttpClient,
    base: Url,
    status_cache: StatusCache,
}

impl DownloadApi {
    /// Create a client from application settings.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidUrl` for an unusable base URL and
    /// `ApiError::Network` if the HTTP client cannot be built.
    pub fn new(settings: &Settings) -> Result<Self, ApiError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {e}", settings.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(format!(
                "{}: not a hierarchical URL",
                settings.base_url
            )));
        }

        Ok(Self {
            client: create_http_client(settings)?,
            base,
            status_cache: StatusCache::new(
                settings.status_cache_ttl(),
                settings.status_cache_max_size,
            ),
        })
    }

    /// Base URL every endpoint is resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// The status cache used by [`task_status`](Self::task_status).
    #[must_use]
    pub const fn status_cache(&self) -> &StatusCache {
        &self.status_cache
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        join_path(&self.base, segments.iter().copied())
            .ok_or_else(|| ApiError::InvalidUrl(self.base.to_string()))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(HeaderName::from_static(REQUEST_ID_HEADER), new_request_id())
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        ensure_success(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::GET, url)).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Json(e.to_string()))
    }

    /// Submit a multi-file task for `user_id`; returns the new task id.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidRequest` for an empty path list, or any
    /// transport or service error.
    #[instrument(skip(self, file_paths), fields(files = file_paths.len()))]
    pub async fn submit_multi_file_task(
        &self,
        file_paths: &[String],
        user_id: &str,
    ) -> Result<String, ApiError> {
        if file_paths.is_empty() {
            return Err(ApiError::InvalidRequest(
                "at least one file path is required".to_string(),
            ));
        }

        let mut url = self.url(&["multi", "local", "submit"])?;
        url.query_pairs_mut().append_pair("userId", user_id);

        let response = self
            .send(self.request(Method::POST, url).json(file_paths))
            .await?;
        let task_id = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?
            .trim()
            .to_string();

        if task_id.is_empty() {
            return Err(ApiError::Json("empty task id in submit reply".to_string()));
        }

        info!(task_id = %task_id, "Submitted multi-file task");
        Ok(task_id)
    }

    /// Cancel a task. The cached status of the task is dropped.
    ///
    /// # Errors
    ///
    /// Returns any transport or service error, or `ApiError::Json` for an
    /// undecodable reply.
    #[instrument(skip(self))]
    pub async fn cancel_task(&self, task_id: &str) -> Result<ApiReply, ApiError> {
        let task_id = require_task_id(task_id)?;
        let url = self.url(&["multi", "cancel", task_id])?;

        let result = self.send(self.request(Method::POST, url)).await;
        self.status_cache.invalidate(task_id).await;

        let body = result?
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let reply: ApiReply =
            serde_json::from_str(&body).map_err(|e| ApiError::Json(e.to_string()))?;

        info!(task_id = %task_id, code = reply.code, msg = %reply.msg, "Cancel request answered");
        Ok(reply)
    }

    /// Current state of a task, served from the cache while fresh.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::NotFound` for unknown tasks (never cached), or any
    /// transport or service error.
    #[instrument(skip(self))]
    pub async fn task_status(&self, task_id: &str) -> Result<TaskSnapshot, ApiError> {
        let task_id = require_task_id(task_id)?;
        if let Some(snapshot) = self.status_cache.get(task_id).await {
            return Ok(snapshot);
        }

        let url = self.url(&["task", "status", task_id])?;
        let snapshot: TaskSnapshot = self.get_json(url).await?;
        self.status_cache.insert(task_id, snapshot.clone()).await;

        debug!(task_id = %task_id, progress = snapshot.progress, "Fetched task status");
        Ok(snapshot)
    }

    /// State of every task known to the service. Never cached.
    ///
    /// # Errors
    ///
    /// Returns any transport or service error.
    #[instrument(skip(self))]
    pub async fn all_tasks(&self) -> Result<Vec<TaskSnapshot>, ApiError> {
        let url = self.url(&["task", "all"])?;
        self.get_json(url).await
    }

    /// Forget every cached status reply.
    pub fn clear_cache(&self) {
        self.status_cache.clear();
        debug!("Task status cache cleared");
    }

    /// Download one server file to `dest`; returns the number of bytes written.
    ///
    /// With `range_start > 0` the download resumes: the service is asked for
    /// the remaining bytes and they are appended to `dest`. Otherwise `dest`
    /// is truncated first. A resume against a file the service reports as no
    /// longer than `range_start` writes nothing and returns 0, since the
    /// service then sends the whole file instead of the tail.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::NotFound` if the service cannot serve the file,
    /// `ApiError::Io` if `dest` cannot be written, `ApiError::InvalidRequest`
    /// if the reply does not continue at `range_start`, or any transport error.
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    pub async fn download_single_file(
        &self,
        file_path: &str,
        dest: &Path,
        range_start: u64,
    ) -> Result<u64, ApiError> {
        if file_path.trim().is_empty() {
            return Err(ApiError::InvalidRequest("file path must not be empty".to_string()));
        }

        let mut url = self.url(&["single", "local"])?;
        url.query_pairs_mut()
            .append_pair("filePath", file_path)
            .append_pair("rangeStart", &range_start.to_string());

        let mut request = self.request(Method::POST, url);
        if range_start > 0 {
            request = request.header(RANGE, format!("bytes={range_start}-"));
        }
        let response = self.send(request).await?;

        if range_start > 0 && !continues_at(&response, range_start)? {
            info!(file_path = %file_path, range_start, "Local file is already complete");
            return Ok(0);
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if range_start > 0 {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let mut file = options.open(dest).await?;

        let mut written: u64 = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ApiError::Network(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!(file_path = %file_path, range_start, written, "Downloaded file");
        Ok(written)
    }
}

/// Whether a resumed reply carries the bytes after `range_start`.
///
/// A `Content-Range` must start exactly at `range_start`. Without one, the
/// service reports the full file size in `Content-Length` and only skips
/// ahead when the file is longer than `range_start`.
fn continues_at(response: &Response, range_start: u64) -> Result<bool, ApiError> {
    if let Some(value) = response.headers().get(CONTENT_RANGE) {
        let start = value
            .to_str()
            .ok()
            .and_then(|range| range.strip_prefix("bytes "))
            .and_then(|range| range.split('-').next())
            .and_then(|start| start.trim().parse::<u64>().ok());
        return match start {
            Some(start) if start == range_start => Ok(true),
            _ => Err(ApiError::InvalidRequest(format!(
                "reply does not continue at byte {range_start}: {value:?}"
            ))),
        };
    }

    match response.content_length() {
        Some(total) if total == range_start => Ok(false),
        Some(total) if total < range_start => Err(ApiError::InvalidRequest(format!(
            "local file is {range_start} bytes but the remote file is only {total}"
        ))),
        _ => Ok(true),
    }
}

fn require_task_id(task_id: &str) -> Result<&str, ApiError> {
    if task_id.trim().is_empty() {
        Err(ApiError::InvalidRequest("task id must not be empty".to_string()))
    } else {
        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_base_url() {
        let settings = Settings {
            base_url: "not a url".to_string(),
            ..Settings::default()
        };
        assert!(matches!(DownloadApi::new(&settings), Err(ApiError::InvalidUrl(_))));
    }

    #[test]
    fn test_endpoint_urls() -> Result<(), ApiError> {
        let api = DownloadApi::new(&Settings::default())?;
        assert_eq!(
            api.url(&["task", "status", "abc123"])?.as_str(),
            "http://localhost:8080/api/download/task/status/abc123"
        );
        assert_eq!(
            api.url(&["multi", "cancel", "a/b"])?.as_str(),
            "http://localhost:8080/api/download/multi/cancel/a%2Fb"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_local_validation() -> Result<(), ApiError> {
        let api = DownloadApi::new(&Settings::default())?;

        assert!(matches!(
            api.submit_multi_file_task(&[], "u-1").await,
            Err(ApiError::InvalidRequest(_))
        ));
        assert!(matches!(
            api.task_status(" ").await,
            Err(ApiError::InvalidRequest(_))
        ));
        assert!(matches!(
            api.cancel_task("").await,
            Err(ApiError::InvalidRequest(_))
        ));
        Ok(())
    }
}
