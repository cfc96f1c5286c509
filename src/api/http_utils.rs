//! HTTP utilities for the REST client
//!
//! Client construction and uniform handling of error replies.

use super::ApiError;
use crate::config::Settings;
use crate::utils::truncate_str;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde_json::Value;

/// Longest error body kept in an error message
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Creates an HTTP client with the configured request and connect timeouts.
///
/// JSON is the default request content type, as the service expects.
///
/// # Errors
///
/// Returns `ApiError::Network` if the client cannot be built.
pub fn create_http_client(settings: &Settings) -> Result<HttpClient, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json;charset=UTF-8"),
    );

    HttpClient::builder()
        .timeout(settings.request_timeout())
        .connect_timeout(settings.connect_timeout())
        .default_headers(headers)
        .build()
        .map_err(|e| ApiError::Network(e.to_string()))
}

/// Passes successful responses through and turns the rest into `ApiError`.
///
/// # Errors
///
/// Returns `ApiError::NotFound` for 404 and `ApiError::Api` for any other
/// non-success status.
pub async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Api {
        status: status.as_u16(),
        message: error_message(status, &body),
    })
}

/// Readable message for an error body.
///
/// Prefers the service's `msg` field, hides HTML error pages from proxies and
/// truncates anything else.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    let trimmed = body.trim();

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(msg) = map.get("msg").and_then(Value::as_str) {
            return msg.to_string();
        }
    }

    let is_html = ["<!DOCTYPE", "<html", "<HTML"]
        .iter()
        .any(|prefix| trimmed.starts_with(prefix));
    if is_html {
        return format!("{status} (server returned an HTML error page)");
    }

    if trimmed.is_empty() {
        return status.to_string();
    }

    if trimmed.chars().count() > MAX_ERROR_BODY_CHARS {
        format!("{}... (truncated)", truncate_str(trimmed, MAX_ERROR_BODY_CHARS))
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_msg_field() {
        let message = error_message(
            StatusCode::BAD_REQUEST,
            r#"{"code":400,"msg":"task already finished"}"#,
        );
        assert_eq!(message, "task already finished");
    }

    #[test]
    fn test_error_message_hides_html() {
        let message = error_message(
            StatusCode::BAD_GATEWAY,
            "<!DOCTYPE html><html><body>nginx</body></html>",
        );
        assert_eq!(message, "502 Bad Gateway (server returned an HTML error page)");
    }

    #[test]
    fn test_error_message_plain_text() {
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, "submit failed: disk full\n"),
            "submit failed: disk full"
        );
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, ""),
            "500 Internal Server Error"
        );
    }

    #[test]
    fn test_error_message_truncates_long_bodies() {
        let body = "x".repeat(2000);
        let message = error_message(StatusCode::BAD_REQUEST, &body);
        assert!(message.ends_with("... (truncated)"));
        assert_eq!(message.chars().count(), MAX_ERROR_BODY_CHARS + 15);
    }

    #[test]
    fn test_create_http_client() {
        assert!(create_http_client(&Settings::default()).is_ok());
    }
}
