use super::error::TransportError;
use crate::config::{Settings, TASK_ID_PLACEHOLDER};
use crate::utils::join_path;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client as HttpClient, Url};
use std::time::Duration;
use tracing::{debug, instrument};

const EVENT_STREAM_MIME: &str = "text/event-stream";
const DEFAULT_EVENT_TYPE: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event type; empty or `message` for plain data frames
    pub event: String,
    /// Event payload
    pub data: String,
    /// Last event id, if the server set one
    pub id: Option<String>,
}

impl SseFrame {
    /// A plain `message` frame carrying `data`.
    #[must_use]
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: DEFAULT_EVENT_TYPE.to_string(),
            data: data.into(),
            id: None,
        }
    }

    /// Whether the frame is a data-carrying `message` event.
    #[must_use]
    pub fn is_message(&self) -> bool {
        (self.event.is_empty() || self.event == DEFAULT_EVENT_TYPE) && !self.data.is_empty()
    }
}

impl From<eventsource_stream::Event> for SseFrame {
    fn from(event: eventsource_stream::Event) -> Self {
        Self {
            event: event.event,
            data: event.data,
            id: (!event.id.is_empty()).then_some(event.id),
        }
    }
}

/// Frames of one live connection. Dropping the stream closes the connection.
pub type FrameStream = BoxStream<'static, Result<SseFrame, TransportError>>;

/// Opens event-stream connections for a task.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgressTransport: Send + Sync {
    /// Open a new connection to the progress endpoint of `task_id`.
    async fn connect(&self, task_id: &str) -> Result<FrameStream, TransportError>;
}

/// Progress endpoint URL builder.
///
/// The path template is relative to the base URL and must contain a
/// `{task_id}` segment, e.g. `task/progress/{task_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEndpoint {
    base: Url,
    path_template: String,
}

impl ProgressEndpoint {
    /// Validate the base URL and path template.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidUrl` for an unparsable or non-hierarchical
    /// base URL, or a template without a `{task_id}` segment.
    pub fn new(base_url: &str, path_template: &str) -> Result<Self, TransportError> {
        let base = Url::parse(base_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(format!(
                "{base_url}: not a hierarchical URL"
            )));
        }
        if !path_template
            .split('/')
            .any(|segment| segment == TASK_ID_PLACEHOLDER)
        {
            return Err(TransportError::InvalidUrl(format!(
                "{path_template}: missing {TASK_ID_PLACEHOLDER} segment"
            )));
        }

        Ok(Self {
            base,
            path_template: path_template.to_string(),
        })
    }

    /// Endpoint URL for `task_id`, with the id percent-encoded as one segment.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidUrl` if the URL cannot be assembled.
    pub fn url_for(&self, task_id: &str) -> Result<Url, TransportError> {
        let segments = self
            .path_template
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                if segment == TASK_ID_PLACEHOLDER {
                    task_id
                } else {
                    segment
                }
            });

        join_path(&self.base, segments)
            .ok_or_else(|| TransportError::InvalidUrl(self.base.to_string()))
    }
}

/// SSE transport over HTTP.
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: HttpClient,
    endpoint: ProgressEndpoint,
}

impl SseTransport {
    /// Create a transport for `endpoint`.
    ///
    /// Only a connect timeout is applied; the response itself is long-lived.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connect` if the HTTP client cannot be built.
    pub fn new(endpoint: ProgressEndpoint, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self { client, endpoint })
    }

    /// Create a transport from application settings.
    ///
    /// # Errors
    ///
    /// See [`ProgressEndpoint::new`] and [`SseTransport::new`].
    pub fn from_settings(settings: &Settings) -> Result<Self, TransportError> {
        let endpoint = ProgressEndpoint::new(&settings.base_url, &settings.progress_path)?;
        Self::new(endpoint, settings.connect_timeout())
    }

    /// The endpoint this transport connects to.
    #[must_use]
    pub const fn endpoint(&self) -> &ProgressEndpoint {
        &self.endpoint
    }
}

fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(EVENT_STREAM_MIME))
}

#[async_trait]
impl ProgressTransport for SseTransport {
    #[instrument(skip(self))]
    async fn connect(&self, task_id: &str) -> Result<FrameStream, TransportError> {
        let url = self.endpoint.url_for(task_id)?;
        debug!(url = %url, "Connecting to progress stream");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, EVENT_STREAM_MIME)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_event_stream(&content_type) {
            return Err(TransportError::ContentType(content_type));
        }

        let frames = response.bytes_stream().eventsource().map(|item| {
            item.map(SseFrame::from)
                .map_err(|e| TransportError::Stream(e.to_string()))
        });

        Ok(frames.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_default_template() -> Result<(), TransportError> {
        let endpoint =
            ProgressEndpoint::new("http://localhost:8080/api/download", "task/progress/{task_id}")?;
        assert_eq!(
            endpoint.url_for("abc123")?.as_str(),
            "http://localhost:8080/api/download/task/progress/abc123"
        );
        Ok(())
    }

    #[test]
    fn test_url_for_encodes_task_id() -> Result<(), TransportError> {
        let endpoint = ProgressEndpoint::new("http://localhost:8080/api/download/", "/progress/{task_id}")?;
        assert_eq!(
            endpoint.url_for("a b/c")?.as_str(),
            "http://localhost:8080/api/download/progress/a%20b%2Fc"
        );
        Ok(())
    }

    #[test]
    fn test_rejects_bad_endpoints() {
        assert!(matches!(
            ProgressEndpoint::new("not a url", "task/progress/{task_id}"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            ProgressEndpoint::new("mailto:ops@example.com", "task/progress/{task_id}"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            ProgressEndpoint::new("http://localhost:8080", "task/progress"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_frame_classification() {
        assert!(SseFrame::message("{}").is_message());
        assert!(!SseFrame::message("").is_message());

        let named = SseFrame {
            event: "heartbeat".to_string(),
            data: "{}".to_string(),
            id: None,
        };
        assert!(!named.is_message());

        let unnamed = SseFrame {
            event: String::new(),
            data: "{}".to_string(),
            id: Some("7".to_string()),
        };
        assert!(unnamed.is_message());
    }

    #[test]
    fn test_event_stream_content_type() {
        assert!(is_event_stream("text/event-stream"));
        assert!(is_event_stream("text/event-stream;charset=UTF-8"));
        assert!(is_event_stream("Text/Event-Stream"));
        assert!(!is_event_stream("application/json"));
        assert!(!is_event_stream(""));
    }
}
