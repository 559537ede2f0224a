//! Layered memory for the principal user: the content-addressed archival
//! fact store (BM25 + vector + hybrid search) and the small always-visible
//! core memory document.

pub mod archival;
pub mod core_memory;
pub mod db;
pub mod embed;
pub mod error;
pub mod types;

pub use archival::ArchivalStore;
pub use core_memory::CoreMemory;
pub use embed::{Embedder, NullEmbedder};
pub use error::{MemoryError, Result};
