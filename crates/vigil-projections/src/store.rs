use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, warn};

use vigil_core::timefmt::{format_utc, is_valid_when};

use crate::db::init_db;
use crate::error::{ProjectionError, Result};
use crate::types::*;

/// Maximum number of links in any dependency chain.
pub const MAX_CHAIN_DEPTH: usize = 5;

/// Per-user durable projection store backed by `projections.db`.
///
/// All writes go through the connection mutex; multi-row operations run in
/// a transaction so readers never observe a half-inserted projection.
pub struct ProjectionStore {
    db: Mutex<Connection>,
}

impl ProjectionStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Store a new projection, creating any `depends_on` rows in the same
    /// transaction. Returns the stored record.
    pub fn add(&self, new: NewProjection) -> Result<Projection> {
        if let Some(when) = &new.resolved_when {
            if !is_valid_when(when) {
                return Err(ProjectionError::InvalidDatetime(when.clone()));
            }
        }
        let resolution = new.resolution.unwrap_or_else(|| infer_resolution(&new));
        flag_creation_shape(&new, resolution);

        let id = vigil_core::types::new_id();
        let now = format_utc(Utc::now());
        let linked = serde_json::to_string(&new.linked_ids).unwrap_or_else(|_| "[]".into());

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO projections
             (id, summary, raw_when, resolved_when, resolution, recurrence,
              trigger_on_fact, context, linked_ids, status, created_at, resolved_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,'pending',?10,NULL)",
            rusqlite::params![
                id,
                new.summary,
                new.raw_when,
                new.resolved_when,
                resolution.to_string(),
                new.recurrence,
                new.trigger_on_fact,
                new.context,
                linked,
                now,
            ],
        )?;
        for (subject, condition) in &new.depends_on {
            check_link(&tx, &id, subject)?;
            tx.execute(
                "INSERT OR REPLACE INTO projection_deps (observer_id, subject_id, condition)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![id, subject, condition.to_string()],
            )?;
        }
        tx.commit()?;
        debug!(projection = %id, summary = %new.summary, "projection added");
        self.get_locked_id(&db, &id)
    }

    pub fn get(&self, id: &str) -> Result<Projection> {
        let db = self.db.lock().unwrap();
        self.get_locked_id(&db, id)
    }

    fn get_locked_id(&self, db: &Connection, id: &str) -> Result<Projection> {
        db.query_row(
            &format!("SELECT {PROJECTION_COLUMNS} FROM projections WHERE id = ?1"),
            [id],
            row_to_projection,
        )
        .map_err(|_| ProjectionError::NotFound(id.to_string()))
    }

    pub fn list_all(&self) -> Result<Vec<Projection>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {PROJECTION_COLUMNS} FROM projections ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([], row_to_projection)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All pending projections due within the horizon, plus someday items
    /// and items with no resolved time (both always included).
    pub fn get_upcoming(&self, horizon_days: i64) -> Result<Vec<Projection>> {
        let horizon = format_utc(Utc::now() + Duration::days(horizon_days));
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {PROJECTION_COLUMNS} FROM projections
             WHERE status = 'pending'
               AND (resolved_when IS NULL OR resolution = 'someday' OR resolved_when <= ?1)
             ORDER BY resolved_when IS NULL, resolved_when"
        ))?;
        let rows = stmt.query_map([horizon], row_to_projection)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Pending exact projections whose time falls within the next
    /// `window_minutes`. Used by the fine-grained scheduler tick.
    pub fn get_exact_due(&self, window_minutes: i64) -> Result<Vec<Projection>> {
        let now = Utc::now();
        let start = format_utc(now);
        let end = format_utc(now + Duration::minutes(window_minutes));
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {PROJECTION_COLUMNS} FROM projections
             WHERE status = 'pending' AND resolution = 'exact'
               AND resolved_when IS NOT NULL
               AND resolved_when >= ?1 AND resolved_when <= ?2
             ORDER BY resolved_when"
        ))?;
        let rows = stmt.query_map([start, end], row_to_projection)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Transition pending → terminal. Idempotent and non-clobbering:
    /// returns false when the projection is already terminal or missing.
    /// Dependencies whose subject is this projection are evaluated in the
    /// same transaction.
    pub fn resolve(&self, id: &str, outcome: ProjectionStatus) -> Result<bool> {
        if !outcome.is_terminal() {
            return Ok(false);
        }
        let now = format_utc(Utc::now());
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let changed = tx.execute(
            "UPDATE projections SET status = ?1, resolved_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            rusqlite::params![outcome.to_string(), now, id],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        evaluate_deps_inner(&tx, Some(id))?;
        tx.commit()?;
        debug!(projection = %id, outcome = %outcome, "projection resolved");
        Ok(true)
    }

    /// Return a recurring projection to pending with a new time. Only
    /// permitted when `recurrence` is set.
    pub fn rearm(&self, id: &str, new_resolved_when: &str) -> Result<bool> {
        if !is_valid_when(new_resolved_when) {
            return Err(ProjectionError::InvalidDatetime(new_resolved_when.into()));
        }
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE projections
             SET status = 'pending', resolved_when = ?1, resolved_at = NULL
             WHERE id = ?2 AND recurrence IS NOT NULL",
            rusqlite::params![new_resolved_when, id],
        )?;
        Ok(changed == 1)
    }

    /// Mark as passed every pending projection whose time is older than
    /// `now - grace`. Someday projections and projections with no resolved
    /// time are never expired.
    pub fn auto_expire(&self, grace_hours: i64) -> Result<usize> {
        let now = Utc::now();
        let cutoff = format_utc(now - Duration::hours(grace_hours));
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE projections SET status = 'passed', resolved_at = ?1
             WHERE status = 'pending'
               AND resolution <> 'someday'
               AND resolved_when IS NOT NULL
               AND resolved_when < ?2",
            rusqlite::params![format_utc(now), cutoff],
        )?;
        if changed > 0 {
            debug!(count = changed, "projections auto-expired");
        }
        Ok(changed)
    }

    /// Link `observer` to wait on `subject`. Rejects cycles and chains
    /// longer than [`MAX_CHAIN_DEPTH`]; a rejected link leaves the graph
    /// unchanged.
    pub fn link_dependency(
        &self,
        observer_id: &str,
        subject_id: &str,
        condition: DependencyCondition,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        self.get_locked_id(&db, observer_id)?;
        self.get_locked_id(&db, subject_id)?;
        check_link(&db, observer_id, subject_id)?;
        db.execute(
            "INSERT OR REPLACE INTO projection_deps (observer_id, subject_id, condition)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![observer_id, subject_id, condition.to_string()],
        )?;
        Ok(())
    }

    pub fn dependencies(&self) -> Result<Vec<ProjectionDependency>> {
        let db = self.db.lock().unwrap();
        load_deps(&db)
    }

    /// Scan all dependencies; activate every observer whose subject has
    /// reached the condition. Returns the number of activations. Idempotent
    /// because satisfied rows are removed.
    pub fn evaluate_dependencies(&self) -> Result<usize> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let n = evaluate_deps_inner(&tx, None)?;
        tx.commit()?;
        Ok(n)
    }

    /// Pending projections carrying a fact trigger.
    pub fn trigger_candidates(&self) -> Result<Vec<Projection>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {PROJECTION_COLUMNS} FROM projections
             WHERE status = 'pending' AND trigger_on_fact IS NOT NULL"
        ))?;
        let rows = stmt.query_map([], row_to_projection)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Activate a triggered projection: clear the trigger, pin the time to
    /// now, leave the status pending. Returns false when the projection was
    /// already activated or resolved (idempotent).
    pub fn activate_trigger(&self, id: &str) -> Result<bool> {
        let now = format_utc(Utc::now());
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE projections
             SET trigger_on_fact = NULL, resolution = 'exact', resolved_when = ?1
             WHERE id = ?2 AND status = 'pending' AND trigger_on_fact IS NOT NULL",
            rusqlite::params![now, id],
        )?;
        Ok(changed == 1)
    }
}

const PROJECTION_COLUMNS: &str = "id, summary, raw_when, resolved_when, resolution, recurrence, \
     trigger_on_fact, context, linked_ids, status, created_at, resolved_at";

fn row_to_projection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Projection> {
    let resolution: String = row.get(4)?;
    let status: String = row.get(9)?;
    let linked: String = row.get(8)?;
    Ok(Projection {
        id: row.get(0)?,
        summary: row.get(1)?,
        raw_when: row.get(2)?,
        resolved_when: row.get(3)?,
        resolution: resolution.parse().unwrap_or(Resolution::Someday),
        recurrence: row.get(5)?,
        trigger_on_fact: row.get(6)?,
        context: row.get(7)?,
        linked_ids: serde_json::from_str(&linked).unwrap_or_default(),
        status: status.parse().unwrap_or(ProjectionStatus::Pending),
        created_at: row.get(10)?,
        resolved_at: row.get(11)?,
    })
}

fn infer_resolution(new: &NewProjection) -> Resolution {
    match &new.resolved_when {
        Some(when) if when.len() > 10 => Resolution::Exact,
        Some(_) => Resolution::Day,
        None if new.trigger_on_fact.is_some() => Resolution::Exact,
        None => Resolution::Someday,
    }
}

/// Creation-shape invariant: exactly one of a resolved time, a fact
/// trigger, or someday resolution. Violations are accepted but logged.
fn flag_creation_shape(new: &NewProjection, resolution: Resolution) {
    let shapes = [
        new.resolved_when.is_some(),
        new.trigger_on_fact.is_some(),
        resolution == Resolution::Someday,
    ];
    let count = shapes.iter().filter(|s| **s).count();
    if count != 1 {
        warn!(
            summary = %new.summary,
            has_when = shapes[0],
            has_trigger = shapes[1],
            someday = shapes[2],
            "projection created with unusual shape"
        );
    }
}

fn load_deps(conn: &Connection) -> Result<Vec<ProjectionDependency>> {
    let mut stmt =
        conn.prepare("SELECT observer_id, subject_id, condition FROM projection_deps")?;
    let rows = stmt.query_map([], |row| {
        let cond: String = row.get(2)?;
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, cond))
    })?;
    Ok(rows
        .filter_map(|r| r.ok())
        .filter_map(|(o, s, c)| {
            Some(ProjectionDependency {
                observer_id: o,
                subject_id: s,
                condition: c.parse().ok()?,
            })
        })
        .collect())
}

/// Reject the candidate edge when it would close a cycle or stretch a
/// chain beyond [`MAX_CHAIN_DEPTH`] links.
fn check_link(conn: &Connection, observer_id: &str, subject_id: &str) -> Result<()> {
    if observer_id == subject_id {
        return Err(ProjectionError::DependencyCycle {
            observer: observer_id.into(),
            subject: subject_id.into(),
        });
    }
    let deps = load_deps(conn)?;
    let mut forward: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
    for d in &deps {
        forward.entry(&d.observer_id).or_default().push(&d.subject_id);
        reverse.entry(&d.subject_id).or_default().push(&d.observer_id);
    }

    // Cycle: the subject already (transitively) waits on the observer.
    if reaches(&forward, subject_id, observer_id) {
        return Err(ProjectionError::DependencyCycle {
            observer: observer_id.into(),
            subject: subject_id.into(),
        });
    }

    // Depth: longest chain through the new edge, counted in links.
    let up = longest_path(&reverse, observer_id);
    let down = longest_path(&forward, subject_id);
    if up + 1 + down > MAX_CHAIN_DEPTH {
        return Err(ProjectionError::ChainTooDeep {
            observer: observer_id.into(),
            subject: subject_id.into(),
            max: MAX_CHAIN_DEPTH,
        });
    }
    Ok(())
}

fn reaches(edges: &HashMap<&str, Vec<&str>>, from: &str, to: &str) -> bool {
    let mut stack = vec![from];
    let mut seen = std::collections::HashSet::new();
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !seen.insert(node.to_string()) {
            continue;
        }
        if let Some(next) = edges.get(node) {
            stack.extend(next.iter().copied());
        }
    }
    false
}

fn longest_path(edges: &HashMap<&str, Vec<&str>>, from: &str) -> usize {
    // The graph is acyclic (enforced on every insert), so plain DFS is safe.
    edges
        .get(from)
        .map(|next| {
            1 + next
                .iter()
                .map(|n| longest_path(edges, n))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0)
}

/// Activate observers whose subject has reached its condition; remove the
/// satisfied rows. `subject_filter` restricts the scan to one subject.
fn evaluate_deps_inner(conn: &Connection, subject_filter: Option<&str>) -> Result<usize> {
    let now = format_utc(Utc::now());
    let deps = load_deps(conn)?;
    let mut activated = 0;
    for dep in deps {
        if let Some(filter) = subject_filter {
            if dep.subject_id != filter {
                continue;
            }
        }
        let subject_status: Option<String> = conn
            .query_row(
                "SELECT status FROM projections WHERE id = ?1",
                [&dep.subject_id],
                |row| row.get(0),
            )
            .ok();
        let Some(status) = subject_status.and_then(|s| s.parse::<ProjectionStatus>().ok()) else {
            // Subject vanished; the row can never fire.
            conn.execute(
                "DELETE FROM projection_deps WHERE observer_id = ?1 AND subject_id = ?2",
                rusqlite::params![dep.observer_id, dep.subject_id],
            )?;
            continue;
        };
        if !dep.condition.matches(status) {
            continue;
        }
        let changed = conn.execute(
            "UPDATE projections
             SET resolution = 'exact', resolved_when = ?1
             WHERE id = ?2 AND status = 'pending'",
            rusqlite::params![now, dep.observer_id],
        )?;
        conn.execute(
            "DELETE FROM projection_deps WHERE observer_id = ?1 AND subject_id = ?2",
            rusqlite::params![dep.observer_id, dep.subject_id],
        )?;
        if changed == 1 {
            debug!(observer = %dep.observer_id, subject = %dep.subject_id, "dependency activated");
            activated += 1;
        }
    }
    Ok(activated)
}
