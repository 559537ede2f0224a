use serde::{Deserialize, Serialize};

/// Where a fact entered archival memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactSource {
    Archival,
    Conversation,
    Worker,
    Import,
    Cli,
}

impl std::fmt::Display for FactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Archival => write!(f, "archival"),
            Self::Conversation => write!(f, "conversation"),
            Self::Worker => write!(f, "worker"),
            Self::Import => write!(f, "import"),
            Self::Cli => write!(f, "cli"),
        }
    }
}

impl std::str::FromStr for FactSource {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "archival" => Ok(Self::Archival),
            "conversation" => Ok(Self::Conversation),
            "worker" => Ok(Self::Worker),
            "import" => Ok(Self::Import),
            "cli" => Ok(Self::Cli),
            other => Err(format!("unknown fact source: {other}")),
        }
    }
}

/// An immutable, content-addressed archival memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub content: String,
    pub source: FactSource,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    /// First 16 hex chars of SHA-256(content) — the dedup key.
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Which search subsystem(s) surfaced a hybrid result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedBy {
    pub keyword: bool,
    pub vector: bool,
}

/// One hybrid search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub source: FactSource,
    pub timestamp: i64,
    /// Max-normalised BM25 contribution (0..1), 0 when keyword missed.
    pub keyword_score: f64,
    /// Cosine similarity (0..1), 0 when vector missed.
    pub vector_score: f64,
    pub combined_score: f64,
    pub matched_by: MatchedBy,
}
