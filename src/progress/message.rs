use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status code the service sends when the task does not exist.
pub const NOT_FOUND_CODE: i64 = 404;

/// One decoded progress frame.
///
/// Only `code`, `finished` and `cancelled` are interpreted; everything else the
/// service sends (counters, percentages, stage names) is kept verbatim in
/// [`fields`](Self::fields).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    /// Service status code, `404` for unknown tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Task finished
    #[serde(default, alias = "isFinished", skip_serializing_if = "Option::is_none")]
    pub finished: Option<bool>,
    /// Task cancelled
    #[serde(default, alias = "isCancelled", skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
    /// Task-specific progress data
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ProgressMessage {
    /// Decode a frame payload. The payload must be a JSON object.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for invalid JSON, non-object payloads or
    /// wrongly typed `code` / `finished` / `cancelled` values.
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// The task no longer exists on the server.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code == Some(NOT_FOUND_CODE)
    }

    /// The task finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished == Some(true)
    }

    /// The task was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled == Some(true)
    }

    /// No further progress will follow this message.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.is_not_found() || self.is_finished() || self.is_cancelled()
    }

    /// Look up a task-specific field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Decode the whole message, recognised fields included, into a typed view.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the message does not fit `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::to_value(self).and_then(serde_json::from_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_open_ended_fields() -> Result<(), serde_json::Error> {
        let msg = ProgressMessage::parse(r#"{"progress":10,"currentStage":"DOWNLOADING"}"#)?;
        assert_eq!(msg.code, None);
        assert_eq!(msg.get("progress"), Some(&json!(10)));
        assert_eq!(msg.get("currentStage"), Some(&json!("DOWNLOADING")));
        assert!(!msg.is_terminal());
        Ok(())
    }

    #[test]
    fn test_terminal_conditions() -> Result<(), serde_json::Error> {
        for data in [
            r#"{"code":404,"msg":"task not found"}"#,
            r#"{"finished":true}"#,
            r#"{"cancelled":true}"#,
            r#"{"isFinished":true}"#,
            r#"{"isCancelled":true}"#,
        ] {
            assert!(ProgressMessage::parse(data)?.is_terminal(), "{data}");
        }

        for data in [
            r#"{"code":200}"#,
            r#"{"finished":false,"cancelled":false}"#,
            r#"{"finished":null}"#,
        ] {
            assert!(!ProgressMessage::parse(data)?.is_terminal(), "{data}");
        }
        Ok(())
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(ProgressMessage::parse("not-json").is_err());
        assert!(ProgressMessage::parse("42").is_err());
        assert!(ProgressMessage::parse("[1,2]").is_err());
        assert!(ProgressMessage::parse(r#"{"finished":"yes"}"#).is_err());
    }

    #[test]
    fn test_decode_keeps_recognised_fields() -> Result<(), serde_json::Error> {
        #[derive(Deserialize)]
        struct View {
            finished: bool,
            progress: u32,
        }

        let msg = ProgressMessage::parse(r#"{"finished":true,"progress":100}"#)?;
        let view: View = msg.decode()?;
        assert!(view.finished);
        assert_eq!(view.progress, 100);
        Ok(())
    }
}
