//! One-line text summaries of task progress for terminal output.

use crate::api::TaskSnapshot;
use crate::progress::ProgressMessage;
use crate::utils::format_bytes;
use serde_json::Value;
use std::fmt::Write;

const BYTE_DECIMALS: usize = 2;

/// Summarise a progress frame.
///
/// Frames shaped like a task snapshot are rendered with
/// [`render_snapshot_line`]; anything else falls back to its raw fields.
#[must_use]
pub fn render_progress_line(message: &ProgressMessage) -> String {
    if message.is_not_found() {
        let reason = message
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("task does not exist");
        return format!("[not found] {reason}");
    }

    match message.decode::<TaskSnapshot>() {
        Ok(task) => render_snapshot_line(&task),
        Err(_) => {
            let status = if message.is_cancelled() {
                "cancelled"
            } else if message.is_finished() {
                "finished"
            } else {
                "progress"
            };
            format!("[{status}] {}", Value::Object(message.fields.clone()))
        }
    }
}

/// Summarise a task snapshot: status, percentage, file counts and bytes.
#[must_use]
pub fn render_snapshot_line(task: &TaskSnapshot) -> String {
    let status = if task.cancelled {
        "cancelled".to_string()
    } else if task.finished {
        "finished".to_string()
    } else {
        task.current_stage
            .map_or_else(|| "running".to_string(), |stage| stage.to_string())
    };

    let mut line = format!("[{status}] {:.1}%", task.percent());

    if task.total_count > 0 {
        let _ = write!(line, "  files {}/{}", task.completed_count, task.total_count);
        if task.failed_count > 0 {
            let _ = write!(line, " ({} failed)", task.failed_count);
        }
    }

    if task.total_bytes > 0 {
        let _ = write!(
            line,
            "  {} / {}",
            format_bytes(task.downloaded_bytes, BYTE_DECIMALS),
            format_bytes(task.total_bytes, BYTE_DECIMALS)
        );
    }

    if task.finished {
        if let Some(path) = task.file_path.as_deref().filter(|p| !p.is_empty()) {
            let _ = write!(line, "  -> {path}");
        }
    }

    line
}

/// One line per task, prefixed with the task id.
#[must_use]
pub fn render_task_list(tasks: &[TaskSnapshot]) -> String {
    if tasks.is_empty() {
        return "no tasks".to_string();
    }

    tasks
        .iter()
        .map(|task| format!("{}  {}", task.task_id, render_snapshot_line(task)))
        .collect::<Vec<_>>()
        .join("\n")
}
