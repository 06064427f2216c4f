//! Bibliographic records resolved from academic metadata APIs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A bibliographic work, keyed by canonical id (`doi:...`, `pmid:...`).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Work {
    pub canonical_id: String,
    pub doi: Option<String>,
    pub year: Option<i64>,
    pub venue: Option<String>,
}

/// One author of a work; `position` preserves byline order.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Author {
    pub work_id: String,
    pub position: i64,
    pub name: String,
    pub orcid: Option<String>,
}

/// A work plus its ordered authors and optional abstract, as returned by
/// the academic lookup backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRecord {
    pub work: Work,
    pub authors: Vec<Author>,
    pub abstract_text: Option<String>,
    pub title: Option<String>,
}
