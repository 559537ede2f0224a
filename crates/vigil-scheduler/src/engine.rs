use std::sync::Arc;

use chrono::{DateTime, Utc};
use croner::Cron;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use vigil_core::config::{
    CronEntry, AUTO_EXPIRE_GRACE_HOURS, EXACT_DUE_WINDOW_MINUTES, REVIEW_HORIZON_DAYS,
};
use vigil_core::hours::ActiveHoursGate;
use vigil_core::timefmt::format_utc;
use vigil_projections::{ProjectionStatus, ProjectionStore};

use crate::error::{Result, SchedulerError};
use crate::prompts;

/// Cron lines for the three built-in jobs (UTC).
pub const DAILY_REVIEW_CRON: &str = "0 8 * * *";
pub const EXACT_DUE_CRON: &str = "*/5 * * * *";
pub const REFLECTION_CRON: &str = "*/30 * * * *";

/// What a firing produced. The daemon routes these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Enqueue this text as a synthetic inbound message on the primary
    /// user's channel.
    Synthetic(String),
    /// Run the reflection pass (out-of-loop, not through the queue).
    ReflectionDue,
}

enum JobKind {
    DailyReview,
    ExactDue,
    Reflection,
    Custom(String),
}

struct JobSlot {
    kind: JobKind,
    cron: Cron,
    next: Option<DateTime<Utc>>,
}

/// Drives the wall-clock jobs against the projection store.
pub struct Scheduler {
    projections: Arc<ProjectionStore>,
    gate: ActiveHoursGate,
    events_tx: mpsc::Sender<SchedulerEvent>,
    jobs: Vec<JobSlot>,
}

impl Scheduler {
    pub fn new(
        projections: Arc<ProjectionStore>,
        gate: ActiveHoursGate,
        custom: &[CronEntry],
        events_tx: mpsc::Sender<SchedulerEvent>,
    ) -> Result<Self> {
        let mut jobs = vec![
            job(JobKind::DailyReview, DAILY_REVIEW_CRON)?,
            job(JobKind::ExactDue, EXACT_DUE_CRON)?,
            job(JobKind::Reflection, REFLECTION_CRON)?,
        ];
        for entry in custom {
            jobs.push(job(JobKind::Custom(entry.message.clone()), &entry.schedule)?);
        }
        Ok(Self {
            projections,
            gate,
            events_tx,
            jobs,
        })
    }

    /// Main loop: 1 s polling granularity until `shutdown` flips true.
    /// In-flight job callbacks run to completion; failures are logged and
    /// the next tick proceeds.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(jobs = self.jobs.len(), "scheduler started");
        let now = Utc::now();
        for slot in &mut self.jobs {
            slot.next = next_occurrence(&slot.cron, now);
        }

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&mut self, now: DateTime<Utc>) {
        for i in 0..self.jobs.len() {
            let due = matches!(self.jobs[i].next, Some(next) if next <= now);
            if !due {
                continue;
            }
            self.jobs[i].next = next_occurrence(&self.jobs[i].cron, now);
            let result = match &self.jobs[i].kind {
                JobKind::DailyReview => self.run_daily_review(now).await,
                JobKind::ExactDue => self.run_exact_due(now).await,
                JobKind::Reflection => {
                    self.emit(SchedulerEvent::ReflectionDue).await;
                    Ok(())
                }
                JobKind::Custom(message) => {
                    let message = message.clone();
                    if self.gate.is_active(now) {
                        self.emit(SchedulerEvent::Synthetic(message)).await;
                    }
                    Ok(())
                }
            };
            if let Err(e) = result {
                error!(error = %e, "scheduler job failed; next tick proceeds");
            }
        }
    }

    /// Daily review: expire stale projections, release dependencies, then
    /// surface the 7-day horizon — unless it is empty or outside hours.
    pub async fn run_daily_review(&self, now: DateTime<Utc>) -> Result<()> {
        if !self.gate.is_active(now) {
            debug!("daily review skipped: outside active hours");
            return Ok(());
        }
        self.projections.auto_expire(AUTO_EXPIRE_GRACE_HOURS)?;
        self.projections.evaluate_dependencies()?;
        let upcoming = self.projections.get_upcoming(REVIEW_HORIZON_DAYS)?;
        if upcoming.is_empty() {
            debug!("daily review skipped: nothing upcoming");
            return Ok(());
        }
        info!(count = upcoming.len(), "daily review firing");
        self.emit(SchedulerEvent::Synthetic(prompts::review_prompt(&upcoming)))
            .await;
        Ok(())
    }

    /// Exact-due check: every due projection is settled — rearmed to its
    /// next recurrence or marked passed — *before* the reminder prompt is
    /// emitted, so a crashed or retried turn can never double-fire.
    pub async fn run_exact_due(&self, now: DateTime<Utc>) -> Result<()> {
        if !self.gate.is_active(now) {
            debug!("exact-due check skipped: outside active hours");
            return Ok(());
        }
        self.projections.evaluate_dependencies()?;
        let due = self.projections.get_exact_due(EXACT_DUE_WINDOW_MINUTES)?;
        if due.is_empty() {
            return Ok(());
        }

        for p in &due {
            match &p.recurrence {
                Some(expr) => match recurrence_after(expr, now) {
                    Some(next) => {
                        self.projections.rearm(&p.id, &format_utc(next))?;
                        debug!(projection = %p.id, next = %format_utc(next), "recurring projection rearmed");
                    }
                    None => {
                        warn!(projection = %p.id, cron = %expr, "recurrence yields no future occurrence; marking passed");
                        self.projections.resolve(&p.id, ProjectionStatus::Passed)?;
                    }
                },
                None => {
                    self.projections.resolve(&p.id, ProjectionStatus::Passed)?;
                }
            }
        }

        info!(count = due.len(), "due projections settled, emitting reminder");
        self.emit(SchedulerEvent::Synthetic(prompts::due_prompt(&due)))
            .await;
        Ok(())
    }

    async fn emit(&self, event: SchedulerEvent) {
        if self.events_tx.send(event).await.is_err() {
            warn!("scheduler event channel closed — event dropped");
        }
    }
}

fn job(kind: JobKind, expr: &str) -> Result<JobSlot> {
    let cron = Cron::new(expr)
        .parse()
        .map_err(|e| SchedulerError::InvalidCron(format!("{expr}: {e}")))?;
    Ok(JobSlot {
        kind,
        cron,
        next: None,
    })
}

fn next_occurrence(cron: &Cron, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron.find_next_occurrence(&after, false).ok()
}

/// Next occurrence of a recurrence expression strictly after `now`.
/// `None` when the expression no longer parses or is exhausted.
fn recurrence_after(expr: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cron = Cron::new(expr).parse().ok()?;
    cron.find_next_occurrence(&now, false).ok()
}
