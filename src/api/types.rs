//! Wire types of the download service REST API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reply code the service uses for success
pub const OK_CODE: i64 = 200;

/// Processing stage of a multi-file task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStage {
    /// Copying source files
    Downloading,
    /// Building the archive
    Packaging,
    /// Archive ready
    Completed,
    /// A stage this client does not know about
    #[serde(other)]
    Unknown,
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Downloading => "downloading",
            Self::Packaging => "packaging",
            Self::Completed => "completed",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Server-side state of a multi-file download task.
///
/// Every field is optional on the wire; missing values take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskSnapshot {
    /// Task id
    pub task_id: String,
    /// Owner of the task
    pub user_id: Option<String>,
    /// Requested server paths
    pub file_path_list: Vec<String>,
    /// Number of requested files
    pub total_count: u32,
    /// Files copied so far
    pub completed_count: u32,
    /// Files that could not be copied
    pub failed_count: u32,
    /// Total size in bytes
    pub total_bytes: u64,
    /// Bytes copied so far
    pub downloaded_bytes: u64,
    /// Overall progress percentage
    pub progress: f64,
    /// Progress of the current stage
    pub stage_progress: Option<f64>,
    /// Current stage
    pub current_stage: Option<TaskStage>,
    /// Archive path once packaging is done
    pub file_path: Option<String>,
    /// Task finished
    #[serde(alias = "isFinished")]
    pub finished: bool,
    /// Task cancelled
    #[serde(alias = "isCancelled")]
    pub cancelled: bool,
    /// Creation time, milliseconds since the epoch
    pub create_time: Option<i64>,
}

impl TaskSnapshot {
    /// Progress clamped to `0..=100`.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.progress.is_finite() {
            self.progress.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    /// Finished or cancelled.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.finished || self.cancelled
    }

    /// Creation time as a timestamp.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.create_time.and_then(DateTime::from_timestamp_millis)
    }
}

/// `{"code": …, "msg": …}` reply used by command endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiReply {
    /// Result code, `200` on success
    pub code: i64,
    /// Human-readable result
    pub msg: String,
}

impl ApiReply {
    /// Whether the service reported success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.code == OK_CODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_from_service_json() -> Result<(), serde_json::Error> {
        let json = r#"{
            "taskId": "t-1",
            "userId": "u-7",
            "filePathList": ["/data/a.bin", "/data/b.bin"],
            "totalCount": 2,
            "completedCount": 1,
            "failedCount": 0,
            "totalBytes": 2048,
            "downloadedBytes": 1024,
            "progress": 50,
            "currentStage": "DOWNLOADING",
            "finished": false,
            "cancelled": false,
            "createTime": 1700000000000
        }"#;

        let task: TaskSnapshot = serde_json::from_str(json)?;
        assert_eq!(task.task_id, "t-1");
        assert_eq!(task.file_path_list.len(), 2);
        assert_eq!(task.current_stage, Some(TaskStage::Downloading));
        assert!((task.percent() - 50.0).abs() < f64::EPSILON);
        assert!(!task.is_terminal());
        assert_eq!(
            task.created_at().map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
        Ok(())
    }

    #[test]
    fn test_snapshot_accepts_is_prefixed_flags() -> Result<(), serde_json::Error> {
        let task: TaskSnapshot = serde_json::from_str(r#"{"taskId":"t","isCancelled":true}"#)?;
        assert!(task.cancelled);
        assert!(task.is_terminal());
        Ok(())
    }

    #[test]
    fn test_unknown_stage() -> Result<(), serde_json::Error> {
        let task: TaskSnapshot = serde_json::from_str(r#"{"currentStage":"VERIFYING"}"#)?;
        assert_eq!(task.current_stage, Some(TaskStage::Unknown));
        assert_eq!(TaskStage::Packaging.to_string(), "packaging");
        Ok(())
    }

    #[test]
    fn test_percent_is_clamped() {
        let task = TaskSnapshot {
            progress: 140.0,
            ..TaskSnapshot::default()
        };
        assert!((task.percent() - 100.0).abs() < f64::EPSILON);

        let task = TaskSnapshot {
            progress: f64::NAN,
            ..TaskSnapshot::default()
        };
        assert!(task.percent().abs() < f64::EPSILON);
    }

    #[test]
    fn test_api_reply() -> Result<(), serde_json::Error> {
        let reply: ApiReply = serde_json::from_str(r#"{"code":200,"msg":"cancelled"}"#)?;
        assert!(reply.is_ok());
        let reply: ApiReply = serde_json::from_str(r#"{"code":404,"msg":"task not found"}"#)?;
        assert!(!reply.is_ok());
        Ok(())
    }
}
