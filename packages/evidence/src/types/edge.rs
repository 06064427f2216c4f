//! Graph edges between pages, fragments, claims, and citation candidates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::domain::TrustLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Fragment → claim, written by the extractor.
    Origin,
    /// Fragment → claim, written by the NLI verifier.
    Supports,
    Refutes,
    Neutral,
    /// Page → page (resolved) or page → citation candidate (pending).
    Cites,
}

impl Relation {
    /// Relations produced by cross-source NLI scoring.
    pub fn is_nli(&self) -> bool {
        matches!(self, Relation::Supports | Relation::Refutes | Relation::Neutral)
    }

    /// Relations that move claim confidence.
    pub fn is_directional(&self) -> bool {
        matches!(self, Relation::Supports | Relation::Refutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Page,
    Fragment,
    Claim,
    CitationCandidate,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Edge {
    pub id: Uuid,
    pub source_kind: NodeKind,
    pub source_id: Uuid,
    pub target_kind: NodeKind,
    pub target_id: Uuid,
    pub relation: Relation,
    pub nli_edge_confidence: Option<f64>,
    pub source_trust_level: Option<TrustLevel>,
    pub target_trust_level: Option<TrustLevel>,
    pub is_contradiction: bool,
    pub is_academic: bool,
    pub is_influential: bool,
    pub citation_context: Option<String>,
    /// Task scope for claim-touching edges; CITES edges are global.
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Insert form for an edge.
#[derive(Debug, Clone)]
pub struct NewEdge {
    pub source_kind: NodeKind,
    pub source_id: Uuid,
    pub target_kind: NodeKind,
    pub target_id: Uuid,
    pub relation: Relation,
    pub nli_edge_confidence: Option<f64>,
    pub source_trust_level: Option<TrustLevel>,
    pub target_trust_level: Option<TrustLevel>,
    pub is_academic: bool,
    pub is_influential: bool,
    pub citation_context: Option<String>,
    pub task_id: Option<Uuid>,
}

impl NewEdge {
    /// An ORIGIN edge from an extracted fragment to its claim.
    pub fn origin(fragment_id: Uuid, claim_id: Uuid, task_id: Uuid) -> Self {
        Self {
            source_kind: NodeKind::Fragment,
            source_id: fragment_id,
            target_kind: NodeKind::Claim,
            target_id: claim_id,
            relation: Relation::Origin,
            nli_edge_confidence: None,
            source_trust_level: None,
            target_trust_level: None,
            is_academic: false,
            is_influential: false,
            citation_context: None,
            task_id: Some(task_id),
        }
    }

    /// An NLI edge from an independent fragment to a claim.
    pub fn nli(
        fragment_id: Uuid,
        claim_id: Uuid,
        task_id: Uuid,
        relation: Relation,
        confidence: f64,
        source_trust: TrustLevel,
        target_trust: TrustLevel,
    ) -> Self {
        Self {
            source_kind: NodeKind::Fragment,
            source_id: fragment_id,
            target_kind: NodeKind::Claim,
            target_id: claim_id,
            relation,
            nli_edge_confidence: Some(confidence),
            source_trust_level: Some(source_trust),
            target_trust_level: Some(target_trust),
            is_academic: false,
            is_influential: false,
            citation_context: None,
            task_id: Some(task_id),
        }
    }

    /// A CITES edge from a citing page. The target is either a fetched page
    /// or a pending candidate row keyed by the edge id.
    pub fn cites(
        citing_page_id: Uuid,
        target_kind: NodeKind,
        target_id: Uuid,
        context: Option<String>,
        is_academic: bool,
    ) -> Self {
        Self {
            source_kind: NodeKind::Page,
            source_id: citing_page_id,
            target_kind,
            target_id,
            relation: Relation::Cites,
            nli_edge_confidence: None,
            source_trust_level: None,
            target_trust_level: None,
            is_academic,
            is_influential: false,
            citation_context: context,
            task_id: None,
        }
    }
}
