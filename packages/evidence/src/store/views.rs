//! Named read-only projections over the graph.
//!
//! Each view is a SQL `CREATE VIEW` exposing a stable `row_key`; reads are
//! keyset-paginated with an opaque base64 cursor over that key and always
//! carry an explicit row limit.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sqlx::Row;
use uuid::Uuid;

use super::rows::row_to_json;
use super::EvidenceStore;
use crate::error::{Error, Result};

/// The recognized views. Anything else is `InvalidArgument`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewName {
    ClaimEvidenceSummary,
    Contradictions,
    UnsupportedClaims,
    SourceImpact,
    EvidenceChain,
    ReferenceCandidates,
    EvidenceTimeline,
    ClaimOrigins,
}

impl ViewName {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "v_claim_evidence_summary" => Ok(Self::ClaimEvidenceSummary),
            "v_contradictions" => Ok(Self::Contradictions),
            "v_unsupported_claims" => Ok(Self::UnsupportedClaims),
            "v_source_impact" => Ok(Self::SourceImpact),
            "v_evidence_chain" => Ok(Self::EvidenceChain),
            "v_reference_candidates" => Ok(Self::ReferenceCandidates),
            "v_evidence_timeline" => Ok(Self::EvidenceTimeline),
            "v_claim_origins" => Ok(Self::ClaimOrigins),
            other => Err(Error::InvalidArgument(format!("unsupported view: {other}"))),
        }
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::ClaimEvidenceSummary => "v_claim_evidence_summary",
            Self::Contradictions => "v_contradictions",
            Self::UnsupportedClaims => "v_unsupported_claims",
            Self::SourceImpact => "v_source_impact",
            Self::EvidenceChain => "v_evidence_chain",
            Self::ReferenceCandidates => "v_reference_candidates",
            Self::EvidenceTimeline => "v_evidence_timeline",
            Self::ClaimOrigins => "v_claim_origins",
        }
    }

    /// Whether the projection carries a `task_id` column to filter on.
    fn task_scoped(&self) -> bool {
        !matches!(self, Self::SourceImpact)
    }

    pub fn all() -> &'static [ViewName] {
        &[
            Self::ClaimEvidenceSummary,
            Self::Contradictions,
            Self::UnsupportedClaims,
            Self::SourceImpact,
            Self::EvidenceChain,
            Self::ReferenceCandidates,
            Self::EvidenceTimeline,
            Self::ClaimOrigins,
        ]
    }
}

/// One page of view rows plus the cursor for the next page, if any.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ViewPage {
    pub rows: Vec<serde_json::Value>,
    pub next_cursor: Option<String>,
}

/// Encode a row key as an opaque cursor.
fn encode_cursor(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

/// Decode an opaque cursor back to a row key.
fn decode_cursor(cursor: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| Error::InvalidArgument("invalid cursor: not valid base64".into()))?;
    String::from_utf8(bytes)
        .map_err(|_| Error::InvalidArgument("invalid cursor: not valid utf-8".into()))
}

impl EvidenceStore {
    /// Read one page of a named view. `limit` is mandatory and clamped to
    /// 1..=1000; `cursor` resumes a prior read.
    pub async fn query_view(
        &self,
        view: ViewName,
        task_id: Option<Uuid>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<ViewPage> {
        if limit <= 0 {
            return Err(Error::InvalidArgument("limit must be positive".into()));
        }
        let limit = limit.min(1000);
        let after = cursor.map(decode_cursor).transpose()?;

        // View and column names come from the enum, never the caller.
        let mut sql = format!("SELECT * FROM {} WHERE 1 = 1", view.sql_name());
        if view.task_scoped() && task_id.is_some() {
            sql.push_str(" AND task_id = ?");
        }
        if after.is_some() {
            sql.push_str(" AND row_key > ?");
        }
        sql.push_str(" ORDER BY row_key LIMIT ?");

        let mut query = sqlx::query(&sql);
        if view.task_scoped() {
            if let Some(id) = task_id {
                query = query.bind(id.to_string());
            }
        }
        if let Some(key) = &after {
            query = query.bind(key.clone());
        }
        // Fetch one extra row to learn whether another page exists.
        query = query.bind(limit + 1);

        let mut rows = query.fetch_all(self.pool()).await?;
        let has_more = rows.len() as i64 > limit;
        rows.truncate(limit as usize);

        let next_cursor = if has_more {
            rows.last()
                .and_then(|r| r.try_get::<String, _>("row_key").ok())
                .map(|key| encode_cursor(&key))
        } else {
            None
        };

        Ok(ViewPage {
            rows: rows.iter().map(row_to_json).collect(),
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FragmentDraft, NewEdge, Relation, TrustLevel};

    async fn fragment_on(store: &EvidenceStore, canonical: &str, text: &str) -> Uuid {
        let (page_id, _) = store
            .upsert_page(&crate::types::NewPage {
                url: format!("https://example.com/{canonical}"),
                canonical_id: canonical.to_string(),
                domain: "example.com".to_string(),
                title: None,
                content_hash: format!("hash-{canonical}"),
                work_id: None,
            })
            .await
            .unwrap();
        store
            .insert_fragments(page_id, &[FragmentDraft::new(None, text, 0)])
            .await
            .unwrap()[0]
    }

    #[tokio::test]
    async fn unknown_view_names_are_rejected() {
        assert!(ViewName::parse("v_everything").is_err());
        assert!(ViewName::parse("claims").is_err());
        for view in ViewName::all() {
            assert_eq!(ViewName::parse(view.sql_name()).unwrap(), *view);
        }
    }

    #[tokio::test]
    async fn contradictions_view_requires_both_directions() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        let origin = fragment_on(&store, "doi:10.1/origin", "X reduces Y.").await;
        let claim = store
            .insert_claim(task.id, "X reduces Y", origin)
            .await
            .unwrap();

        let pro = fragment_on(&store, "doi:10.1/pro", "X definitely lowers Y.").await;
        store
            .insert_edge(&NewEdge::nli(
                pro,
                claim.claim_id,
                task.id,
                Relation::Supports,
                0.9,
                TrustLevel::Academic,
                TrustLevel::Unverified,
            ))
            .await
            .unwrap();

        let page = store
            .query_view(ViewName::Contradictions, Some(task.id), 10, None)
            .await
            .unwrap();
        assert!(page.rows.is_empty());

        let con = fragment_on(&store, "doi:10.1/con", "X does not reduce Y.").await;
        store
            .insert_edge(&NewEdge::nli(
                con,
                claim.claim_id,
                task.id,
                Relation::Refutes,
                0.8,
                TrustLevel::Academic,
                TrustLevel::Unverified,
            ))
            .await
            .unwrap();

        let page = store
            .query_view(ViewName::Contradictions, Some(task.id), 10, None)
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(
            page.rows[0]["claim_id"],
            serde_json::Value::String(claim.claim_id.to_string())
        );
    }

    #[tokio::test]
    async fn unsupported_claims_view_lists_unverified_claims() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        let origin = fragment_on(&store, "doi:10.1/origin", "X reduces Y.").await;
        store.insert_claim(task.id, "X reduces Y", origin).await.unwrap();

        let page = store
            .query_view(ViewName::UnsupportedClaims, Some(task.id), 10, None)
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 1);
    }

    #[tokio::test]
    async fn pagination_walks_the_whole_set_without_overlap() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        for i in 0..5 {
            let frag = fragment_on(
                &store,
                &format!("doi:10.1/p{i}"),
                &format!("Claim number {i} source."),
            )
            .await;
            store
                .insert_claim(task.id, &format!("claim number {i}"), frag)
                .await
                .unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = store
                .query_view(
                    ViewName::ClaimEvidenceSummary,
                    Some(task.id),
                    2,
                    cursor.as_deref(),
                )
                .await
                .unwrap();
            for row in &page.rows {
                assert!(seen.insert(row["claim_id"].as_str().unwrap().to_string()));
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn limit_is_mandatory_and_positive() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let err = store
            .query_view(ViewName::EvidenceTimeline, None, 0, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn claim_origins_view_joins_back_to_pages() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        let origin = fragment_on(&store, "doi:10.1/origin", "X reduces Y.").await;
        store.insert_claim(task.id, "X reduces Y", origin).await.unwrap();

        let page = store
            .query_view(ViewName::ClaimOrigins, Some(task.id), 10, None)
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(
            page.rows[0]["canonical_id"],
            serde_json::Value::String("doi:10.1/origin".into())
        );
    }
}
