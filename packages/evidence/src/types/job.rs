//! Job records for the phase-structured scheduler.
//!
//! Each job is an effect `(Store, Payload) -> (Store', [NewJobs])` executed
//! by a worker. Phases form a directed graph: extraction feeds verification
//! and citation parsing; nothing feeds back without user gating.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::target::TargetReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Exploration,
    Verification,
    Citation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    SerpFetch,
    UrlFetch,
    DoiFetch,
    VerifyClaim,
    ParseCitations,
}

impl JobKind {
    pub fn phase(&self) -> JobPhase {
        match self {
            JobKind::SerpFetch | JobKind::UrlFetch | JobKind::DoiFetch => JobPhase::Exploration,
            JobKind::VerifyClaim => JobPhase::Verification,
            JobKind::ParseCitations => JobPhase::Citation,
        }
    }

    /// Exploration fetches consume budget; downstream phases never do.
    pub fn consumes_budget(&self) -> bool {
        self.phase() == JobPhase::Exploration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
}

/// Typed job payload, serialized to JSON in the `jobs.payload` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    SerpFetch {
        query: String,
    },
    UrlFetch {
        url: String,
        reason: TargetReason,
        /// The originating free-text query, when this fetch came off a SERP.
        /// Threads through so per-query harvest metrics can attribute pages.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
    },
    DoiFetch {
        doi: String,
        reason: TargetReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
    },
    VerifyClaim {
        claim_id: Uuid,
    },
    ParseCitations {
        page_id: Uuid,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::SerpFetch { .. } => JobKind::SerpFetch,
            JobPayload::UrlFetch { .. } => JobKind::UrlFetch,
            JobPayload::DoiFetch { .. } => JobKind::DoiFetch,
            JobPayload::VerifyClaim { .. } => JobKind::VerifyClaim,
            JobPayload::ParseCitations { .. } => JobKind::ParseCitations,
        }
    }

    /// Dedupe key so re-queueing the same work while it is still queued or
    /// running collapses to one attempt.
    pub fn dedupe_key(&self, task_id: Uuid) -> String {
        match self {
            JobPayload::SerpFetch { query } => format!("{task_id}:serp:{}", query.to_lowercase()),
            JobPayload::UrlFetch { url, .. } => format!("{task_id}:url:{url}"),
            JobPayload::DoiFetch { doi, .. } => format!("{task_id}:doi:{}", doi.to_lowercase()),
            JobPayload::VerifyClaim { claim_id } => format!("{task_id}:verify:{claim_id}"),
            JobPayload::ParseCitations { page_id } => format!("{task_id}:cite:{page_id}"),
        }
    }
}

/// A persisted job row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub task_id: Uuid,
    pub phase: JobPhase,
    pub kind: JobKind,
    /// JSON-serialized [`JobPayload`].
    pub payload: String,
    pub state: JobState,
    pub attempts: i64,
    pub max_attempts: i64,
    /// Earliest claimable time; used for retry backoff.
    pub run_after: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    /// Fetch domain, when known up front; claiming skips auth-blocked
    /// domains so parked jobs resume when the block clears.
    pub domain: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub dedupe_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn payload(&self) -> Result<JobPayload, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}
