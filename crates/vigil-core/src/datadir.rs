//! Data directory layout. One process owns this tree; no cross-process
//! locking is attempted.
//!
//! ```text
//! data_dir/
//!   config.yml
//!   core-memory.md
//!   trust-approvals.json
//!   users/<user_id>/memory.db
//!   users/<user_id>/projections.db
//!   history/YYYY-MM-DD.jsonl
//!   logs/YYYY-MM-DD.jsonl
//!   usage/YYYY-MM-DD.jsonl
//!   workers/<worker_id>/
//! ```

use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default location: `~/.vigil`.
    pub fn default_root() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".vigil")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.yml")
    }

    pub fn core_memory_file(&self) -> PathBuf {
        self.root.join("core-memory.md")
    }

    pub fn trust_approvals_file(&self) -> PathBuf {
        self.root.join("trust-approvals.json")
    }

    pub fn user_dir(&self, user_id: &str) -> PathBuf {
        self.root.join("users").join(user_id)
    }

    pub fn memory_db(&self, user_id: &str) -> PathBuf {
        self.user_dir(user_id).join("memory.db")
    }

    pub fn projections_db(&self, user_id: &str) -> PathBuf {
        self.user_dir(user_id).join("projections.db")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join("history")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn usage_dir(&self) -> PathBuf {
        self.root.join("usage")
    }

    pub fn workers_dir(&self) -> PathBuf {
        self.root.join("workers")
    }

    pub fn worker_dir(&self, worker_id: &str) -> PathBuf {
        self.workers_dir().join(worker_id)
    }

    /// Create the directory tree for `user_id`. Idempotent.
    pub fn ensure(&self, user_id: &str) -> Result<()> {
        std::fs::create_dir_all(self.user_dir(user_id))?;
        std::fs::create_dir_all(self.history_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.usage_dir())?;
        std::fs::create_dir_all(self.workers_dir())?;
        Ok(())
    }
}

/// Write `contents` to `path` atomically: full write to a temp file in the
/// same directory, then rename. A crash leaves either the old or the new
/// contents intact, never a partial file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| crate::error::VigilError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let dd = DataDir::new(tmp.path());
        dd.ensure("alice").unwrap();
        assert!(dd.user_dir("alice").is_dir());
        assert!(dd.history_dir().is_dir());
        assert!(dd.workers_dir().is_dir());
        assert!(dd.memory_db("alice").starts_with(tmp.path()));
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("x.txt");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
    }
}
