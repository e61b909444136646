//! Per-tool scan task state machine.
//!
//! A task moves pending -> processing -> completed | failed. Terminal
//! states absorb every further transition, so a late progress update or
//! duplicate completion cannot resurrect a finished task. Task state is
//! in-memory only; the durable outcome is the compliance report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanTask {
    pub tool_id: i64,
    pub tool_name: String,
    pub status: ScanStatus,
    /// Fraction of the pipeline completed, in [0, 1]. Never decreases.
    pub progress: Option<f64>,
    pub current_step: Option<String>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanTask {
    pub fn new(tool_id: i64, tool_name: &str) -> Self {
        Self {
            tool_id,
            tool_name: tool_name.to_string(),
            status: ScanStatus::Pending,
            progress: None,
            current_step: None,
            result: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        if self.status.is_terminal() || self.status == ScanStatus::Processing {
            return;
        }
        self.status = ScanStatus::Processing;
        self.started_at = Some(Utc::now());
        self.progress = Some(0.0);
        self.current_step = Some("initializing scan".to_string());
        info!(tool = %self.tool_name, tool_id = self.tool_id, "scan started");
    }

    /// Record a checkpoint. Values are clamped to [0, 1] and a value
    /// below the current progress is raised to it, keeping progress
    /// monotone even if steps report out of order.
    pub fn update_progress(&mut self, progress: f64, step: &str) {
        if self.status.is_terminal() {
            return;
        }
        let clamped = progress.clamp(0.0, 1.0);
        let current = self.progress.unwrap_or(0.0);
        self.progress = Some(clamped.max(current));
        self.current_step = Some(step.to_string());
        debug!(
            tool = %self.tool_name,
            progress = self.progress,
            step = step,
            "scan progress"
        );
    }

    pub fn complete(&mut self, result: Value) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ScanStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.progress = Some(1.0);
        self.result = Some(result);
        info!(tool = %self.tool_name, tool_id = self.tool_id, "scan completed");
    }

    pub fn fail(&mut self, message: &str) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ScanStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message.to_string());
        error!(tool = %self.tool_name, tool_id = self.tool_id, error = message, "scan failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifecycle_pending_to_completed() {
        let mut task = ScanTask::new(1, "docker");
        assert_eq!(task.status, ScanStatus::Pending);
        assert!(task.progress.is_none());

        task.start();
        assert_eq!(task.status, ScanStatus::Processing);
        assert_eq!(task.progress, Some(0.0));
        assert!(task.started_at.is_some());

        task.update_progress(0.5, "merging knowledge");
        assert_eq!(task.progress, Some(0.5));

        task.complete(json!({"report_id": 7}));
        assert_eq!(task.status, ScanStatus::Completed);
        assert_eq!(task.progress, Some(1.0));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn terminal_states_absorb_transitions() {
        let mut task = ScanTask::new(1, "docker");
        task.start();
        task.fail("network down");
        assert_eq!(task.status, ScanStatus::Failed);

        task.start();
        task.update_progress(0.9, "late update");
        task.complete(json!({}));
        assert_eq!(task.status, ScanStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("network down"));
        assert!(task.result.is_none());
    }

    #[test]
    fn progress_is_clamped_and_monotone() {
        let mut task = ScanTask::new(1, "docker");
        task.start();
        task.update_progress(1.7, "overshoot");
        assert_eq!(task.progress, Some(1.0));

        let mut task = ScanTask::new(2, "postman");
        task.start();
        task.update_progress(0.7, "analysis");
        task.update_progress(0.3, "out of order");
        assert_eq!(task.progress, Some(0.7));
        assert_eq!(task.current_step.as_deref(), Some("out of order"));

        task.update_progress(-0.5, "negative");
        assert_eq!(task.progress, Some(0.7));
    }
}
