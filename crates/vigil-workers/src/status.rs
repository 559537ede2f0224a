//! `status.json` — the on-disk lifecycle record inside each worker
//! directory. Written atomically so an observer never reads a torn file.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::datadir::write_atomic;

use crate::error::Result;
use crate::types::WorkerStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusFile {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub model: String,
    pub error: Option<String>,
    pub result_path: String,
}

impl StatusFile {
    pub fn write(&self, worker_dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(&worker_dir.join("status.json"), json.as_bytes())
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(())
    }

    pub fn read(worker_dir: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(worker_dir.join("status.json"))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let status = StatusFile {
            worker_id: "w-1234".into(),
            status: WorkerStatus::Running,
            task: "summarise X".into(),
            started_at: Utc::now(),
            completed_at: None,
            model: "claude-haiku-4-5".into(),
            error: None,
            result_path: dir.path().join("result.md").display().to_string(),
        };
        status.write(dir.path()).unwrap();
        let loaded = StatusFile::read(dir.path()).unwrap();
        assert_eq!(loaded.worker_id, "w-1234");
        assert_eq!(loaded.status, WorkerStatus::Running);
        assert!(loaded.completed_at.is_none());
    }
}
