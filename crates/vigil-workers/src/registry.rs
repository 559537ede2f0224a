use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Result, WorkerError};
use crate::status::StatusFile;
use crate::types::{WorkerCompletion, WorkerContext, WorkerInfo, WorkerStatus};

/// Default wall-clock budget per worker.
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Terminal registry entries linger this long for status queries.
pub const RETENTION: chrono::Duration = chrono::Duration::hours(24);

/// Executes one worker session to completion. Implemented by the agent
/// layer; the registry stays ignorant of LLMs and tools.
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    async fn run(&self, ctx: WorkerContext) -> std::result::Result<(), String>;
}

struct WorkerRecord {
    info: WorkerInfo,
    cancel: CancellationToken,
}

/// Mutable worker table behind a single mutex, plus the spawner.
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, WorkerRecord>>,
    workers_dir: PathBuf,
    max_concurrent: usize,
    timeout: Duration,
    completions_tx: mpsc::Sender<WorkerCompletion>,
}

impl WorkerRegistry {
    pub fn new(
        workers_dir: PathBuf,
        max_concurrent: usize,
        completions_tx: mpsc::Sender<WorkerCompletion>,
    ) -> Arc<Self> {
        Arc::new(Self {
            workers: Mutex::new(HashMap::new()),
            workers_dir,
            max_concurrent,
            timeout: DEFAULT_WORKER_TIMEOUT,
            completions_tx,
        })
    }

    #[cfg(test)]
    fn with_timeout(self: Arc<Self>, timeout: Duration) -> Arc<Self> {
        // Test-only: rebuild with a short timeout.
        Arc::new(Self {
            workers: Mutex::new(HashMap::new()),
            workers_dir: self.workers_dir.clone(),
            max_concurrent: self.max_concurrent,
            timeout,
            completions_tx: self.completions_tx.clone(),
        })
    }

    /// Allocate a worker, create its directory and `status.json`, and
    /// spawn the runner. Returns the worker id immediately.
    pub fn dispatch(
        self: &Arc<Self>,
        task: &str,
        model: &str,
        runner: Arc<dyn WorkerRunner>,
    ) -> Result<String> {
        self.purge_expired();
        let running = self
            .workers
            .lock()
            .unwrap()
            .values()
            .filter(|w| w.info.status == WorkerStatus::Running)
            .count();
        if running >= self.max_concurrent {
            return Err(WorkerError::LimitReached {
                limit: self.max_concurrent,
            });
        }

        let id = format!("w-{}", &vigil_core::types::new_id()[..8]);
        let dir = self.workers_dir.join(&id);
        std::fs::create_dir_all(&dir)?;

        let info = WorkerInfo {
            id: id.clone(),
            status: WorkerStatus::Running,
            task: task.to_string(),
            working_dir: dir.clone(),
            started_at: Utc::now(),
            completed_at: None,
            model: model.to_string(),
            error: None,
        };
        status_file(&info).write(&dir)?;

        let cancel = CancellationToken::new();
        self.workers.lock().unwrap().insert(
            id.clone(),
            WorkerRecord {
                info: info.clone(),
                cancel: cancel.clone(),
            },
        );
        info!(worker = %id, task, model, "worker dispatched");

        let registry = Arc::clone(self);
        let ctx = WorkerContext {
            worker_id: id.clone(),
            task: task.to_string(),
            model: model.to_string(),
            working_dir: dir,
            cancel: cancel.clone(),
        };
        let timeout = self.timeout;
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = runner.run(ctx.clone()) => match result {
                    Ok(()) => (WorkerStatus::Complete, None),
                    Err(reason) => (WorkerStatus::Failed, Some(reason)),
                },
                _ = ctx.cancel.cancelled() => (WorkerStatus::Cancelled, None),
                _ = tokio::time::sleep(timeout) => (WorkerStatus::Timeout, None),
            };
            registry.finish(&ctx.worker_id, outcome.0, outcome.1).await;
        });

        Ok(id)
    }

    /// Replace the worker's steering note. The worker's prompt instructs
    /// it to poll `steering.md` every few tool calls.
    pub fn steer(&self, id: &str, note: &str) -> Result<()> {
        let workers = self.workers.lock().unwrap();
        let record = workers.get(id).ok_or_else(|| WorkerError::NotFound(id.into()))?;
        if record.info.status != WorkerStatus::Running {
            return Err(WorkerError::NotRunning(id.into()));
        }
        let path = record.info.working_dir.join("steering.md");
        drop(workers);
        vigil_core::datadir::write_atomic(&path, note.as_bytes())
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        info!(worker = %id, "steering note updated");
        Ok(())
    }

    /// Abort a running worker. The cancelled status is recorded *before*
    /// the abort propagates, so the spawner's completion path observes the
    /// pre-set terminal state and does not overwrite it.
    pub fn interrupt(&self, id: &str) -> Result<()> {
        let cancel = {
            let mut workers = self.workers.lock().unwrap();
            let record = workers
                .get_mut(id)
                .ok_or_else(|| WorkerError::NotFound(id.into()))?;
            if record.info.status != WorkerStatus::Running {
                return Err(WorkerError::NotRunning(id.into()));
            }
            record.info.status = WorkerStatus::Cancelled;
            record.info.completed_at = Some(Utc::now());
            status_file(&record.info).write(&record.info.working_dir)?;
            record.cancel.clone()
        };
        cancel.cancel();
        info!(worker = %id, "worker interrupted");
        Ok(())
    }

    pub fn status(&self, id: &str) -> Result<WorkerInfo> {
        self.workers
            .lock()
            .unwrap()
            .get(id)
            .map(|r| r.info.clone())
            .ok_or_else(|| WorkerError::NotFound(id.into()))
    }

    pub fn list(&self) -> Vec<WorkerInfo> {
        let mut all: Vec<_> = self
            .workers
            .lock()
            .unwrap()
            .values()
            .map(|r| r.info.clone())
            .collect();
        all.sort_by_key(|w| w.started_at);
        all
    }

    pub fn running_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap()
            .values()
            .filter(|w| w.info.status == WorkerStatus::Running)
            .count()
    }

    /// Drop terminal entries older than 24 h. Files on disk persist.
    pub fn purge_expired(&self) {
        let cutoff = Utc::now() - RETENTION;
        self.workers.lock().unwrap().retain(|_, r| {
            !(r.info.status.is_terminal()
                && r.info.completed_at.map(|t| t < cutoff).unwrap_or(false))
        });
    }

    /// Record a terminal outcome and emit the completion fact. When the
    /// status was already terminal (interrupt won the race), the pre-set
    /// status is kept; the completion event is still emitted exactly once,
    /// from here.
    async fn finish(&self, id: &str, status: WorkerStatus, error: Option<String>) {
        let (info, final_status) = {
            let mut workers = self.workers.lock().unwrap();
            let Some(record) = workers.get_mut(id) else {
                warn!(worker = %id, "finish called for unknown worker");
                return;
            };
            if record.info.status.is_terminal() {
                (record.info.clone(), record.info.status)
            } else {
                record.info.status = status;
                record.info.completed_at = Some(Utc::now());
                record.info.error = error;
                if let Err(e) = status_file(&record.info).write(&record.info.working_dir) {
                    warn!(worker = %id, error = %e, "failed to write terminal status.json");
                }
                (record.info.clone(), status)
            }
        };

        let result_path = info.working_dir.join("result.md");
        let fact_text = completion_fact(&info, final_status, &result_path);
        info!(worker = %id, status = %final_status, "worker finished");

        let completion = WorkerCompletion {
            worker_id: id.to_string(),
            status: final_status,
            fact_text,
            result_path,
        };
        if self.completions_tx.send(completion).await.is_err() {
            warn!(worker = %id, "completion channel closed — fact dropped");
        }
    }
}

fn completion_fact(info: &WorkerInfo, status: WorkerStatus, result_path: &std::path::Path) -> String {
    match status {
        WorkerStatus::Complete => format!(
            "Worker {} complete, results at {}",
            info.id,
            result_path.display()
        ),
        WorkerStatus::Failed => format!(
            "Worker {} failed: {}",
            info.id,
            info.error.as_deref().unwrap_or("unknown error")
        ),
        WorkerStatus::Timeout => format!("Worker {} timed out", info.id),
        WorkerStatus::Cancelled => format!("Worker {} cancelled", info.id),
        WorkerStatus::Running => format!("Worker {} running", info.id),
    }
}

fn status_file(info: &WorkerInfo) -> StatusFile {
    StatusFile {
        worker_id: info.id.clone(),
        status: info.status,
        task: info.task.clone(),
        started_at: info.started_at,
        completed_at: info.completed_at,
        model: info.model.clone(),
        error: info.error.clone(),
        result_path: info.working_dir.join("result.md").display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct InstantRunner;

    #[async_trait]
    impl WorkerRunner for InstantRunner {
        async fn run(&self, ctx: WorkerContext) -> std::result::Result<(), String> {
            std::fs::write(ctx.result_path(), "# Done\n").map_err(|e| e.to_string())?;
            Ok(())
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl WorkerRunner for FailingRunner {
        async fn run(&self, _ctx: WorkerContext) -> std::result::Result<(), String> {
            Err("no network".to_string())
        }
    }

    struct HangingRunner;

    #[async_trait]
    impl WorkerRunner for HangingRunner {
        async fn run(&self, _ctx: WorkerContext) -> std::result::Result<(), String> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn registry(
        dir: &tempfile::TempDir,
    ) -> (Arc<WorkerRegistry>, mpsc::Receiver<WorkerCompletion>) {
        let (tx, rx) = mpsc::channel(8);
        (WorkerRegistry::new(dir.path().to_path_buf(), 3, tx), rx)
    }

    #[tokio::test]
    async fn dispatch_completes_and_emits_fact() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, mut rx) = registry(&dir);
        let id = registry
            .dispatch("summarise X", "claude-haiku-4-5", Arc::new(InstantRunner))
            .unwrap();

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.worker_id, id);
        assert_eq!(completion.status, WorkerStatus::Complete);
        assert!(completion.fact_text.contains(&format!("Worker {id} complete")));
        assert!(completion.fact_text.contains("results at"));

        let status = StatusFile::read(&dir.path().join(&id)).unwrap();
        assert_eq!(status.status, WorkerStatus::Complete);
        assert!(status.completed_at.is_some());
    }

    #[tokio::test]
    async fn failure_reason_enters_the_fact() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, mut rx) = registry(&dir);
        registry
            .dispatch("doomed", "claude-haiku-4-5", Arc::new(FailingRunner))
            .unwrap();
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.status, WorkerStatus::Failed);
        assert!(completion.fact_text.contains("failed: no network"));
    }

    #[tokio::test]
    async fn interrupt_preserves_cancelled_status() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, mut rx) = registry(&dir);
        let id = registry
            .dispatch("long task", "claude-haiku-4-5", Arc::new(HangingRunner))
            .unwrap();

        registry.interrupt(&id).unwrap();
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.status, WorkerStatus::Cancelled);
        assert_eq!(registry.status(&id).unwrap().status, WorkerStatus::Cancelled);
        // status.json carries the pre-set cancelled state, not an overwrite.
        let status = StatusFile::read(&dir.path().join(&id)).unwrap();
        assert_eq!(status.status, WorkerStatus::Cancelled);
        // A second interrupt is an error: not running.
        assert!(matches!(
            registry.interrupt(&id),
            Err(WorkerError::NotRunning(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_marks_worker_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let registry = WorkerRegistry::new(dir.path().to_path_buf(), 3, tx)
            .with_timeout(Duration::from_secs(1));
        let id = registry
            .dispatch("slow", "claude-haiku-4-5", Arc::new(HangingRunner))
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.status, WorkerStatus::Timeout);
        assert!(completion.fact_text.contains(&format!("Worker {id} timed out")));
    }

    #[tokio::test]
    async fn concurrency_limit_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let registry = WorkerRegistry::new(dir.path().to_path_buf(), 2, tx);
        registry.dispatch("a", "m", Arc::new(HangingRunner)).unwrap();
        registry.dispatch("b", "m", Arc::new(HangingRunner)).unwrap();
        assert!(matches!(
            registry.dispatch("c", "m", Arc::new(HangingRunner)),
            Err(WorkerError::LimitReached { limit: 2 })
        ));
    }

    #[tokio::test]
    async fn steer_writes_and_replaces_note() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _rx) = registry(&dir);
        let id = registry
            .dispatch("steerable", "m", Arc::new(HangingRunner))
            .unwrap();
        registry.steer(&id, "focus on recent sources").unwrap();
        registry.steer(&id, "actually, only 2025 data").unwrap();
        let note = std::fs::read_to_string(dir.path().join(&id).join("steering.md")).unwrap();
        assert_eq!(note, "actually, only 2025 data");
    }

    #[tokio::test]
    async fn purge_drops_old_terminal_entries_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, mut rx) = registry(&dir);
        let id = registry
            .dispatch("quick", "m", Arc::new(InstantRunner))
            .unwrap();
        rx.recv().await.unwrap();

        // Backdate completion beyond the retention window.
        {
            let mut workers = registry.workers.lock().unwrap();
            workers.get_mut(&id).unwrap().info.completed_at =
                Some(Utc::now() - chrono::Duration::hours(25));
        }
        registry.purge_expired();
        assert!(matches!(registry.status(&id), Err(WorkerError::NotFound(_))));
        assert!(dir.path().join(&id).join("status.json").exists(), "files persist");
    }
}
