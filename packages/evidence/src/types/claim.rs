//! Extracted claims and their adoption lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdoptionStatus {
    #[default]
    Pending,
    Adopted,
    NotAdopted,
}

/// An atomic assertion extracted from a fragment, scoped to a task: the same
/// text under a different hypothesis is a different claim.
///
/// `bayesian_truth_confidence` is a navigation signal, not a probability of
/// truth; it aggregates cross-source NLI evidence and sits at the 0.5 prior
/// until any exists.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub task_id: Uuid,
    pub text: String,
    /// Case-folded, whitespace-collapsed dedup key.
    pub normalized_text: String,
    pub adoption_status: AdoptionStatus,
    pub bayesian_truth_confidence: f64,
    pub exploration_score: f64,
    /// Set when NLI selection has run against the then-current fragment set.
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Normalize claim text for within-task deduplication.
pub fn normalize_claim_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
