//! Citation candidate rows: references discovered but not yet fetched.

use chrono::Utc;
use sqlx::FromRow;
use uuid::Uuid;

use super::EvidenceStore;
use crate::error::{Error, Result};
use crate::types::{NewEdge, NodeKind};

/// A pending reference discovered by the citation ingestor. Materializes
/// into a fetched page only when the user selects it.
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct CitationCandidate {
    pub edge_id: Uuid,
    pub task_id: Uuid,
    pub citing_page_id: Uuid,
    pub candidate_url: Option<String>,
    pub candidate_doi: Option<String>,
    pub citation_context: Option<String>,
    pub queued: bool,
}

impl EvidenceStore {
    /// Record a pending citation: a CITES edge whose target is the candidate
    /// row itself, keyed by the edge id.
    pub async fn insert_citation_candidate(
        &self,
        task_id: Uuid,
        citing_page_id: Uuid,
        candidate_url: Option<&str>,
        candidate_doi: Option<&str>,
        context: Option<&str>,
    ) -> Result<Uuid> {
        if candidate_url.is_none() && candidate_doi.is_none() {
            return Err(Error::InvalidArgument(
                "citation candidate needs a url or a doi".into(),
            ));
        }

        let edge_id = Uuid::new_v4();
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r#"
            INSERT INTO edges (id, source_kind, source_id, target_kind, target_id, relation,
                               is_academic, citation_context, created_at)
            VALUES (?, 'page', ?, 'citation_candidate', ?, 'cites', ?, ?, ?)
            "#,
        )
        .bind(edge_id.to_string())
        .bind(citing_page_id.to_string())
        .bind(edge_id.to_string())
        .bind(candidate_doi.is_some())
        .bind(context)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO citation_candidates
                (edge_id, task_id, citing_page_id, candidate_url, candidate_doi,
                 citation_context, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(edge_id.to_string())
        .bind(task_id.to_string())
        .bind(citing_page_id.to_string())
        .bind(candidate_url)
        .bind(candidate_doi)
        .bind(context)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(edge_id)
    }

    /// Record a resolved citation to an already-fetched page.
    pub async fn insert_resolved_citation(
        &self,
        citing_page_id: Uuid,
        cited_page_id: Uuid,
        context: Option<String>,
        is_academic: bool,
    ) -> Result<Uuid> {
        let edge = self
            .insert_edge(&NewEdge::cites(
                citing_page_id,
                NodeKind::Page,
                cited_page_id,
                context,
                is_academic,
            ))
            .await?;
        Ok(edge.id)
    }

    pub async fn get_candidate(&self, edge_id: Uuid) -> Result<CitationCandidate> {
        sqlx::query_as::<_, CitationCandidate>(
            r#"
            SELECT edge_id, task_id, citing_page_id, candidate_url, candidate_doi,
                   citation_context, queued
            FROM citation_candidates WHERE edge_id = ?
            "#,
        )
        .bind(edge_id.to_string())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("citation candidate {edge_id}")))
    }

    /// Pending (not yet queued) candidates for a task, oldest first.
    pub async fn pending_candidates(
        &self,
        task_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CitationCandidate>> {
        let rows = sqlx::query_as::<_, CitationCandidate>(
            r#"
            SELECT edge_id, task_id, citing_page_id, candidate_url, candidate_doi,
                   citation_context, queued
            FROM citation_candidates
            WHERE task_id = ? AND queued = 0
            ORDER BY created_at LIMIT ?
            "#,
        )
        .bind(task_id.to_string())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Mark a candidate as queued for fetching. Returns false if it was
    /// already queued (selection is one-shot).
    pub async fn mark_candidate_queued(&self, edge_id: Uuid) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE citation_candidates SET queued = 1 WHERE edge_id = ? AND queued = 0",
        )
        .bind(edge_id.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn page(store: &EvidenceStore, canonical: &str) -> Uuid {
        store
            .upsert_page(&crate::types::NewPage {
                url: format!("https://example.com/{canonical}"),
                canonical_id: canonical.to_string(),
                domain: "example.com".to_string(),
                title: None,
                content_hash: format!("hash-{canonical}"),
                work_id: None,
            })
            .await
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn candidates_surface_until_queued() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        let citing = page(&store, "doi:10.1/meta").await;

        let edge_id = store
            .insert_citation_candidate(
                task.id,
                citing,
                None,
                Some("10.1/cited"),
                Some("Smith et al. 2020"),
            )
            .await
            .unwrap();

        let pending = store.pending_candidates(task.id, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].edge_id, edge_id);

        assert!(store.mark_candidate_queued(edge_id).await.unwrap());
        assert!(!store.mark_candidate_queued(edge_id).await.unwrap());
        assert!(store.pending_candidates(task.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn candidate_without_url_or_doi_is_invalid() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        let citing = page(&store, "doi:10.1/meta").await;
        let err = store
            .insert_citation_candidate(task.id, citing, None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn resolved_citations_point_page_to_page() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let citing = page(&store, "doi:10.1/meta").await;
        let cited = page(&store, "doi:10.1/primary").await;
        let edge_id = store
            .insert_resolved_citation(citing, cited, None, true)
            .await
            .unwrap();
        let edge = store.get_edge(edge_id).await.unwrap();
        assert_eq!(edge.source_id, citing);
        assert_eq!(edge.target_id, cited);
        assert!(edge.is_academic);
    }
}
