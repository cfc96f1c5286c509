//! Small helpers shared by the REST client, the progress stream and the CLI.

use reqwest::Url;
use uuid::Uuid;

const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const BYTE_STEP: f64 = 1024.0;

/// Length of the generated request ids
const REQUEST_ID_LEN: usize = 9;

/// Safely truncates a string to a maximum character length (not bytes).
///
/// This is UTF-8 safe and will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use download_tracker::utils::truncate_str;
/// let s = "任务不存在";
/// assert_eq!(truncate_str(s, 2), "任务");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Human-readable size using binary steps, e.g. `1536` → `"1.5 KB"`.
///
/// The value is rounded to `decimals` places and trailing zeros are dropped.
/// Sizes past terabytes stay in `TB`.
///
/// # Examples
///
/// ```
/// use download_tracker::utils::format_bytes;
/// assert_eq!(format_bytes(0, 2), "0 B");
/// assert_eq!(format_bytes(1024, 2), "1 KB");
/// assert_eq!(format_bytes(5_500_000, 1), "5.2 MB");
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64, decimals: usize) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= BYTE_STEP && unit < BYTE_UNITS.len() - 1 {
        value /= BYTE_STEP;
        unit += 1;
    }

    let rounded = format!("{value:.decimals$}");
    let trimmed = rounded.parse::<f64>().unwrap_or(value);
    format!("{trimmed} {}", BYTE_UNITS[unit])
}

/// Append path segments to `base`, percent-encoding each one.
///
/// A trailing slash on `base` is ignored, so `http://h/api` and `http://h/api/`
/// give the same result. Returns `None` if `base` cannot carry a path.
pub fn join_path<'a, I>(base: &Url, segments: I) -> Option<Url>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(segments);
    Some(url)
}

/// Short random id for the `X-Request-Id` header.
#[must_use]
pub fn new_request_id() -> String {
    let mut id = Uuid::new_v4().as_simple().to_string();
    id.truncate(REQUEST_ID_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_unicode() {
        let s = "Привет, мир!";
        assert_eq!(truncate_str(s, 6), "Привет");
        assert_eq!(truncate_str(s, 50), "Привет, мир!");
        assert_eq!(truncate_str("", 3), "");
    }

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(0, 2), "0 B");
        assert_eq!(format_bytes(512, 2), "512 B");
        assert_eq!(format_bytes(1023, 2), "1023 B");
        assert_eq!(format_bytes(1024, 2), "1 KB");
        assert_eq!(format_bytes(1536, 2), "1.5 KB");
        assert_eq!(format_bytes(1_048_576, 2), "1 MB");
        assert_eq!(format_bytes(3_221_225_472, 2), "3 GB");
        assert_eq!(format_bytes(1_099_511_627_776, 2), "1 TB");
    }

    #[test]
    fn test_format_bytes_rounding() {
        assert_eq!(format_bytes(1_234_567, 2), "1.18 MB");
        assert_eq!(format_bytes(1_234_567, 0), "1 MB");
        assert_eq!(format_bytes(1_126, 3), "1.1 KB");
    }

    #[test]
    fn test_format_bytes_clamps_at_terabytes() {
        assert_eq!(format_bytes(2048 * 1_099_511_627_776, 2), "2048 TB");
    }

    #[test]
    fn test_join_path() -> Result<(), Box<dyn std::error::Error>> {
        let base = Url::parse("http://localhost:8080/api/download")?;
        let url = join_path(&base, ["task", "status", "abc123"]);
        assert_eq!(
            url.map(String::from).as_deref(),
            Some("http://localhost:8080/api/download/task/status/abc123")
        );

        let slashed = Url::parse("http://localhost:8080/api/download/")?;
        let url = join_path(&slashed, ["multi", "cancel", "a b/c"]);
        assert_eq!(
            url.map(String::from).as_deref(),
            Some("http://localhost:8080/api/download/multi/cancel/a%20b%2Fc")
        );

        let opaque = Url::parse("mailto:ops@example.com")?;
        assert!(join_path(&opaque, ["x"]).is_none());
        Ok(())
    }

    #[test]
    fn test_request_id_shape() {
        let id = new_request_id();
        assert_eq!(id.len(), 9);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_request_id());
    }
}
