//! Shared foundation for the vigil workspace: configuration, data-dir
//! layout, common ids and message types, datetime canonicalisation, the
//! active-hours window, and the JSONL journals.

pub mod config;
pub mod datadir;
pub mod error;
pub mod hours;
pub mod journal;
pub mod timefmt;
pub mod types;

pub use error::{Result, VigilError};
