use rusqlite::{Connection, Result};

/// Initialise projection tables. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS projections (
            id              TEXT PRIMARY KEY,
            summary         TEXT NOT NULL,
            raw_when        TEXT,
            resolved_when   TEXT,
            resolution      TEXT NOT NULL,
            recurrence      TEXT,
            trigger_on_fact TEXT,
            context         TEXT,
            linked_ids      TEXT NOT NULL DEFAULT '[]',
            status          TEXT NOT NULL DEFAULT 'pending',
            created_at      TEXT NOT NULL,
            resolved_at     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_proj_status
            ON projections(status, resolved_when);
        CREATE TABLE IF NOT EXISTS projection_deps (
            observer_id TEXT NOT NULL,
            subject_id  TEXT NOT NULL,
            condition   TEXT NOT NULL,
            PRIMARY KEY (observer_id, subject_id)
        );",
    )
}
