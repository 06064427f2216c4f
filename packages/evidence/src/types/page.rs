//! Fetched pages and their citable fragments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One fetched document. Pages are globally deduplicated by
/// `(canonical_id, content_hash)` and never rewritten; re-fetching a URL
/// whose body changed produces a new row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,
    pub url: String,
    /// DOI/PMID/PMCID when known, else the normalized URL.
    pub canonical_id: String,
    pub domain: String,
    pub title: Option<String>,
    pub fetched_at: DateTime<Utc>,
    /// Hex sha256 of the raw body; also keys the blob store.
    pub content_hash: String,
    /// Canonical id of the bibliographic work, when resolved.
    pub work_id: Option<String>,
    /// Set when extraction failed terminally so re-fetch is not retried
    /// uselessly. Failed pages have no fragments.
    pub fetch_failed: bool,
    pub failure_reason: Option<String>,
}

/// Insert form for a page, produced by the extractor.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub url: String,
    pub canonical_id: String,
    pub domain: String,
    pub title: Option<String>,
    pub content_hash: String,
    pub work_id: Option<String>,
}

/// A contiguous span of page text, the smallest citable unit.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Fragment {
    pub id: Uuid,
    pub page_id: Uuid,
    pub heading_context: Option<String>,
    /// At most [`FRAGMENT_MAX_CHARS`] characters.
    pub text: String,
    pub position: i64,
}

/// Upper bound on fragment text length, in characters.
pub const FRAGMENT_MAX_CHARS: usize = 500;

/// A fragment before it has been committed to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDraft {
    pub heading_context: Option<String>,
    pub text: String,
    pub position: i64,
}

impl FragmentDraft {
    pub fn new(heading_context: Option<String>, text: impl Into<String>, position: i64) -> Self {
        Self {
            heading_context,
            text: text.into(),
            position,
        }
    }
}
