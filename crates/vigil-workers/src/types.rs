use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Complete,
    Failed,
    Timeout,
    Cancelled,
}

impl WorkerStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Registry snapshot of one worker, safe to hand out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub status: WorkerStatus,
    pub task: String,
    pub working_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub model: String,
    pub error: Option<String>,
}

/// Everything a runner needs to execute one worker session.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub worker_id: String,
    pub task: String,
    pub model: String,
    pub working_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl WorkerContext {
    pub fn result_path(&self) -> PathBuf {
        self.working_dir.join("result.md")
    }

    pub fn steering_path(&self) -> PathBuf {
        self.working_dir.join("steering.md")
    }

    /// Current steering note, if the user steered this worker.
    pub fn read_steering(&self) -> Option<String> {
        std::fs::read_to_string(self.steering_path()).ok()
    }
}

/// Emitted exactly once when a worker reaches a terminal state. The daemon
/// bridge writes `fact_text` into archival memory and runs the trigger
/// matcher over it.
#[derive(Debug, Clone)]
pub struct WorkerCompletion {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub fact_text: String,
    pub result_path: PathBuf,
}
