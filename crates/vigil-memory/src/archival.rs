use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::db::init_db;
use crate::error::{MemoryError, Result};
use crate::types::{Fact, FactSource, MatchedBy, SearchResult};

/// Weight of each subsystem when both keyword and vector search ran.
const HYBRID_WEIGHT: f64 = 0.5;

/// Per-user persistent fact store: content-hash dedup, FTS5 keyword
/// search, and cosine similarity over stored embeddings.
///
/// Thread-safe: the SQLite connection sits behind a Mutex; all writes are
/// serialised through it.
pub struct ArchivalStore {
    db: Mutex<Connection>,
}

impl ArchivalStore {
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

    /// Insert a fact. Idempotent by content hash: a second insert with the
    /// same content returns the existing id without touching the store.
    pub fn add(
        &self,
        content: &str,
        source: FactSource,
        embedding: Option<&[f32]>,
    ) -> Result<String> {
        let hash = content_hash(content);
        let db = self.db.lock().unwrap();

        let existing: Option<String> = db
            .query_row(
                "SELECT id FROM facts WHERE content_hash = ?1",
                [&hash],
                |row| row.get(0),
            )
            .ok();
        if let Some(id) = existing {
            debug!(%id, "archival add: duplicate content, returning existing fact");
            return Ok(id);
        }

        let id = vigil_core::types::new_id();
        let now_ms = chrono::Utc::now().timestamp_millis();
        db.execute(
            "INSERT INTO facts (id, content, source, created_at, content_hash, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                id,
                content,
                source.to_string(),
                now_ms,
                hash,
                embedding.map(embedding_to_blob),
            ],
        )?;
        let rowid = db.last_insert_rowid();
        db.execute(
            "INSERT INTO facts_fts(rowid, content) VALUES (?1, ?2)",
            rusqlite::params![rowid, content],
        )?;
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Fact> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, content, source, created_at, content_hash, embedding
             FROM facts WHERE id = ?1",
            [id],
            row_to_fact,
        )
        .map_err(|_| MemoryError::FactNotFound(id.to_string()))
    }

    /// Remove a fact from the table and the FTS index.
    pub fn remove(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let row: Option<(i64, String)> = db
            .query_row(
                "SELECT rowid, content FROM facts WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();
        let (rowid, content) = row.ok_or_else(|| MemoryError::FactNotFound(id.to_string()))?;
        db.execute(
            "INSERT INTO facts_fts(facts_fts, rowid, content) VALUES('delete', ?1, ?2)",
            rusqlite::params![rowid, content],
        )?;
        db.execute("DELETE FROM facts WHERE rowid = ?1", [rowid])?;
        Ok(())
    }

    /// BM25 keyword search. Empty queries return nothing; the query is
    /// sanitised so FTS operators cannot inject; if FTS still rejects it,
    /// falls back to a plain substring match.
    pub fn search_keyword(&self, query: &str, limit: usize) -> Result<Vec<(Fact, f64)>> {
        let sanitised = sanitise_fts_query(query);
        if sanitised.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.db.lock().unwrap();
        match keyword_query(&db, &sanitised, limit) {
            Ok(rows) => Ok(rows),
            Err(MemoryError::Database(e)) => {
                warn!(error = %e, "FTS query failed, falling back to substring match");
                substring_query(&db, query, limit)
            }
            Err(e) => Err(e),
        }
    }

    /// Cosine similarity over stored embeddings. Returns nothing when the
    /// query embedding is absent (embedder unavailable).
    pub fn search_vector(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<(Fact, f64)>> {
        if query_embedding.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, content, source, created_at, content_hash, embedding
             FROM facts WHERE embedding IS NOT NULL",
        )?;
        let mut scored: Vec<(Fact, f64)> = stmt
            .query_map([], row_to_fact)?
            .filter_map(|r| r.ok())
            .filter_map(|fact| {
                let emb = fact.embedding.as_deref()?;
                let score = cosine(query_embedding, emb);
                Some((fact, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Run keyword and vector search, combine scores, and de-duplicate.
    ///
    /// Combined = max-normalised keyword × 0.5 + cosine × 0.5 when both
    /// subsystems ran; otherwise whichever ran contributes alone.
    pub fn hybrid_search(
        &self,
        query: &str,
        query_embedding: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let keyword_hits = self.search_keyword(query, limit)?;
        let vector_hits = match query_embedding {
            Some(emb) => self.search_vector(emb, limit)?,
            None => Vec::new(),
        };
        let both = !keyword_hits.is_empty() && !vector_hits.is_empty();

        let max_kw = keyword_hits
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::MIN, f64::max)
            .max(f64::EPSILON);

        let mut merged: Vec<SearchResult> = Vec::new();
        for (fact, raw) in keyword_hits {
            let norm = (raw / max_kw).clamp(0.0, 1.0);
            merged.push(SearchResult {
                id: fact.id,
                content: fact.content,
                source: fact.source,
                timestamp: fact.timestamp,
                keyword_score: norm,
                vector_score: 0.0,
                combined_score: if both { norm * HYBRID_WEIGHT } else { norm },
                matched_by: MatchedBy { keyword: true, vector: false },
            });
        }
        for (fact, cos) in vector_hits {
            if let Some(existing) = merged.iter_mut().find(|r| r.id == fact.id) {
                existing.vector_score = cos;
                existing.matched_by.vector = true;
                existing.combined_score =
                    existing.keyword_score * HYBRID_WEIGHT + cos * HYBRID_WEIGHT;
            } else {
                merged.push(SearchResult {
                    id: fact.id,
                    content: fact.content,
                    source: fact.source,
                    timestamp: fact.timestamp,
                    keyword_score: 0.0,
                    vector_score: cos,
                    combined_score: if both { cos * HYBRID_WEIGHT } else { cos },
                    matched_by: MatchedBy { keyword: false, vector: true },
                });
            }
        }

        merged.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(limit);
        Ok(merged)
    }

    /// Most recent facts, newest first. Used by the CLI memory view.
    pub fn recent(&self, limit: usize) -> Result<Vec<Fact>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, content, source, created_at, content_hash, embedding
             FROM facts ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count(&self) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row("SELECT COUNT(*) FROM facts", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

/// First 16 hex chars of SHA-256(content).
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Cosine similarity; inputs need not be pre-normalised.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        na += (*x as f64).powi(2);
        nb += (*y as f64).powi(2);
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Quote every whitespace token so FTS5 operators (`AND`, `NEAR`, `*`,
/// quotes, parens) are treated as literal text.
fn sanitise_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "")))
        .filter(|tok| tok.len() > 2)
        .collect::<Vec<_>>()
        .join(" ")
}

fn keyword_query(db: &Connection, fts_query: &str, limit: usize) -> Result<Vec<(Fact, f64)>> {
    let mut stmt = db.prepare(
        "SELECT f.id, f.content, f.source, f.created_at, f.content_hash, f.embedding,
                bm25(facts_fts) AS score
         FROM facts f
         JOIN facts_fts ON f.rowid = facts_fts.rowid
         WHERE facts_fts MATCH ?1
         ORDER BY rank
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![fts_query, limit], |row| {
        let fact = row_to_fact(row)?;
        // bm25() is better-is-lower (negative); flip so higher wins.
        let score: f64 = row.get(6)?;
        Ok((fact, -score))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn substring_query(db: &Connection, query: &str, limit: usize) -> Result<Vec<(Fact, f64)>> {
    let pattern = format!("%{}%", query.replace('%', "").replace('_', ""));
    let mut stmt = db.prepare(
        "SELECT id, content, source, created_at, content_hash, embedding
         FROM facts WHERE content LIKE ?1 ORDER BY created_at DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![pattern, limit], row_to_fact)?;
    Ok(rows.filter_map(|r| r.ok()).map(|f| (f, 1.0)).collect())
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
    let source_str: String = row.get(2)?;
    let blob: Option<Vec<u8>> = row.get(5)?;
    Ok(Fact {
        id: row.get(0)?,
        content: row.get(1)?,
        source: source_str.parse().unwrap_or(FactSource::Archival),
        timestamp: row.get(3)?,
        content_hash: row.get(4)?,
        embedding: blob.as_deref().map(blob_to_embedding),
    })
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent_by_content() {
        let store = ArchivalStore::open_in_memory().unwrap();
        let a = store.add("the dentist confirmed", FactSource::Archival, None).unwrap();
        let b = store.add("the dentist confirmed", FactSource::Conversation, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn keyword_search_finds_and_ranks() {
        let store = ArchivalStore::open_in_memory().unwrap();
        store.add("dentist appointment on thursday", FactSource::Archival, None).unwrap();
        store.add("grocery list: milk and eggs", FactSource::Archival, None).unwrap();
        let hits = store.search_keyword("dentist thursday", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].0.content.contains("dentist"));
        assert!(hits[0].1 > 0.0);
    }

    #[test]
    fn empty_query_returns_empty() {
        let store = ArchivalStore::open_in_memory().unwrap();
        store.add("something", FactSource::Archival, None).unwrap();
        assert!(store.search_keyword("", 10).unwrap().is_empty());
        assert!(store.search_keyword("  \t ", 10).unwrap().is_empty());
    }

    #[test]
    fn fts_operators_do_not_inject() {
        let store = ArchivalStore::open_in_memory().unwrap();
        store.add("weird AND query content", FactSource::Archival, None).unwrap();
        // Unbalanced quotes and operators must not error out.
        let hits = store.search_keyword("\"weird AND (content", 10);
        assert!(hits.is_ok());
    }

    #[test]
    fn vector_search_orders_by_cosine() {
        let store = ArchivalStore::open_in_memory().unwrap();
        store.add("close", FactSource::Archival, Some(&[1.0, 0.0])).unwrap();
        store.add("far", FactSource::Archival, Some(&[0.0, 1.0])).unwrap();
        store.add("no embedding", FactSource::Archival, None).unwrap();
        let hits = store.search_vector(&[1.0, 0.1], 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.content, "close");
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn hybrid_merges_and_dedupes() {
        let store = ArchivalStore::open_in_memory().unwrap();
        store.add("dentist visit", FactSource::Archival, Some(&[1.0, 0.0])).unwrap();
        store.add("unrelated note", FactSource::Archival, Some(&[0.9, 0.1])).unwrap();
        let results = store.hybrid_search("dentist visit", Some(&[1.0, 0.0]), 10).unwrap();
        // "dentist visit" matched both ways and must appear exactly once, first.
        assert_eq!(results.iter().filter(|r| r.content == "dentist visit").count(), 1);
        let top = &results[0];
        assert_eq!(top.content, "dentist visit");
        assert!(top.matched_by.keyword && top.matched_by.vector);
    }

    #[test]
    fn hybrid_without_embeddings_is_keyword_only() {
        let store = ArchivalStore::open_in_memory().unwrap();
        store.add("dentist visit", FactSource::Archival, None).unwrap();
        let results = store.hybrid_search("dentist", None, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].matched_by.keyword);
        assert!(!results[0].matched_by.vector);
        // Keyword ran alone, so its normalised score carries full weight.
        assert!((results[0].combined_score - results[0].keyword_score).abs() < 1e-9);
    }

    #[test]
    fn remove_clears_indexes() {
        let store = ArchivalStore::open_in_memory().unwrap();
        let id = store.add("to be removed", FactSource::Archival, None).unwrap();
        store.remove(&id).unwrap();
        assert!(store.get(&id).is_err());
        assert!(store.search_keyword("removed", 10).unwrap().is_empty());
    }

    #[test]
    fn embedding_blob_round_trip() {
        let emb = vec![0.25f32, -1.5, 3.75];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&emb)), emb);
    }

    #[test]
    fn content_hash_is_16_hex_chars() {
        let h = content_hash("hello");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
