use rusqlite::{Connection, Result};

/// Initialise archival memory tables. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_facts_table(conn)?;
    create_fts_index(conn)?;
    Ok(())
}

fn create_facts_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS facts (
            rowid        INTEGER PRIMARY KEY AUTOINCREMENT,
            id           TEXT NOT NULL UNIQUE,
            content      TEXT NOT NULL,
            source       TEXT NOT NULL,
            created_at   INTEGER NOT NULL,
            content_hash TEXT NOT NULL UNIQUE,
            embedding    BLOB
        );
        CREATE INDEX IF NOT EXISTS idx_facts_hash ON facts(content_hash);",
    )
}

/// FTS5 virtual table over fact content. content='' external-content form —
/// synced manually on insert/delete so the rowids stay aligned.
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS facts_fts
            USING fts5(content, content='facts', content_rowid='rowid');",
    )
}
