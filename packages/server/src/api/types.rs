//! Tool-call request and response records.
//!
//! Every argument is a structured record, never a free-form string. Unknown
//! fields are rejected, tagged unions carry a mandatory `kind`, and every
//! list-returning operation requires an explicit `limit`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lyra_evidence::store::{VectorHit, VectorTarget};
use lyra_evidence::types::{Target, TaskStatus};

use crate::kernel::CandidatePreview;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTaskRequest {
    pub hypothesis: String,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub task_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueTargetsRequest {
    pub task_id: Uuid,
    pub targets: Vec<Target>,
}

#[derive(Debug, Serialize)]
pub struct QueueTargetsResponse {
    pub accepted_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueReferenceCandidatesRequest {
    pub task_id: Uuid,
    #[serde(default)]
    pub include_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub exclude_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueReferenceCandidatesResponse {
    pub accepted_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Vec<CandidatePreview>>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    #[default]
    Summary,
    Full,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetStatusRequest {
    pub task_id: Uuid,
    /// Server-side polling bound in seconds; 0 returns immediately.
    #[serde(default)]
    pub wait: u64,
    #[serde(default)]
    pub detail: DetailLevel,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetAuthQueueRequest {
    pub task_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct AuthQueueEntry {
    pub domain: String,
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GetAuthQueueResponse {
    pub entries: Vec<AuthQueueEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveAuthRequest {
    /// `complete` or `skip`.
    pub action: String,
    pub domain: String,
}

#[derive(Debug, Serialize)]
pub struct ResolveAuthResponse {
    pub resolved_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopTaskRequest {
    pub task_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StopTaskResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryViewRequest {
    pub name: String,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    pub limit: i64,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuerySqlRequest {
    pub sql: String,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct QuerySqlResponse {
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VectorSearchRequest {
    pub query: String,
    pub target: VectorTarget,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    pub k: usize,
}

#[derive(Debug, Serialize)]
pub struct VectorSearchResponse {
    pub hits: Vec<VectorHit>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedbackRequest {
    /// `edge_correct`, `claim_adopt`, or `claim_reject`.
    pub action: String,
    pub ids: Vec<Uuid>,
    #[serde(default)]
    pub correction: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub updated_count: usize,
}
