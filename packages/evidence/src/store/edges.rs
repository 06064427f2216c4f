//! Edge insertion with the cross-source independence invariant.

use chrono::Utc;
use uuid::Uuid;

use super::EvidenceStore;
use crate::error::{Error, Result};
use crate::types::{Edge, NewEdge, NodeKind, Relation};

const EDGE_COLUMNS: &str = r#"
    id, source_kind, source_id, target_kind, target_id, relation,
    nli_edge_confidence, source_trust_level, target_trust_level,
    is_contradiction, is_academic, is_influential, citation_context,
    task_id, created_at
"#;

impl EvidenceStore {
    /// Insert an edge. SUPPORTS/REFUTES edges whose source fragment's page
    /// shares a canonical id with any ORIGIN fragment of the target claim
    /// are rejected: no self-citation toward confidence.
    pub async fn insert_edge(&self, edge: &NewEdge) -> Result<Edge> {
        if edge.relation.is_directional() {
            self.check_independence(edge).await?;
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO edges (id, source_kind, source_id, target_kind, target_id, relation,
                               nli_edge_confidence, source_trust_level, target_trust_level,
                               is_academic, is_influential, citation_context, task_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(edge.source_kind)
        .bind(edge.source_id.to_string())
        .bind(edge.target_kind)
        .bind(edge.target_id.to_string())
        .bind(edge.relation)
        .bind(edge.nli_edge_confidence)
        .bind(edge.source_trust_level)
        .bind(edge.target_trust_level)
        .bind(edge.is_academic)
        .bind(edge.is_influential)
        .bind(&edge.citation_context)
        .bind(edge.task_id.map(|t| t.to_string()))
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        if edge.relation.is_directional() {
            self.refresh_contradiction_flags(edge.target_id).await?;
        }

        self.get_edge(id).await
    }

    pub async fn get_edge(&self, edge_id: Uuid) -> Result<Edge> {
        sqlx::query_as::<_, Edge>(&format!("SELECT {EDGE_COLUMNS} FROM edges WHERE id = ?"))
            .bind(edge_id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::NotFound(format!("edge {edge_id}")))
    }

    /// NLI edges currently attached to a claim.
    pub async fn nli_edges_for_claim(&self, claim_id: Uuid) -> Result<Vec<Edge>> {
        let rows = sqlx::query_as::<_, Edge>(&format!(
            r#"
            SELECT {EDGE_COLUMNS} FROM edges
            WHERE target_kind = 'claim' AND target_id = ?
              AND relation IN ('supports', 'refutes', 'neutral')
            ORDER BY created_at
            "#
        ))
        .bind(claim_id.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Fragments that already carry an NLI edge into this claim; used to
    /// keep re-verification from duplicating work.
    pub async fn nli_scored_fragment_ids(&self, claim_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT source_id FROM edges
            WHERE target_kind = 'claim' AND target_id = ?
              AND relation IN ('supports', 'refutes', 'neutral')
              AND source_kind = 'fragment'
            "#,
        )
        .bind(claim_id.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Overwrite an edge's relation from user feedback, then refresh the
    /// contradiction flags on the claim it touches.
    pub async fn correct_edge_relation(
        &self,
        edge_id: Uuid,
        relation: Relation,
    ) -> Result<Edge> {
        if !relation.is_nli() {
            return Err(Error::InvalidArgument(format!(
                "edge correction must be an NLI relation, got {relation:?}"
            )));
        }
        let edge = self.get_edge(edge_id).await?;
        if !edge.relation.is_nli() {
            return Err(Error::InvalidArgument(
                "only NLI edges can be corrected".into(),
            ));
        }

        sqlx::query("UPDATE edges SET relation = ? WHERE id = ?")
            .bind(relation)
            .bind(edge_id.to_string())
            .execute(self.pool())
            .await?;
        self.refresh_contradiction_flags(edge.target_id).await?;
        self.get_edge(edge_id).await
    }

    async fn check_independence(&self, edge: &NewEdge) -> Result<()> {
        if edge.source_kind != NodeKind::Fragment || edge.target_kind != NodeKind::Claim {
            return Err(Error::ConstraintViolation(format!(
                "{:?} edges must run fragment -> claim",
                edge.relation
            )));
        }

        let source_canonical = sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.canonical_id FROM fragments f
            JOIN pages p ON p.id = f.page_id
            WHERE f.id = ?
            "#,
        )
        .bind(edge.source_id.to_string())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("fragment {}", edge.source_id)))?;

        let origins = self.origin_canonical_ids(edge.target_id).await?;
        if origins.iter().any(|c| *c == source_canonical) {
            return Err(Error::ConstraintViolation(format!(
                "source page {source_canonical} is an origin of claim {}",
                edge.target_id
            )));
        }
        Ok(())
    }

    /// A claim holding at least one SUPPORTS and one REFUTES edge is
    /// contradicted; the flag is stamped on all its directional edges.
    async fn refresh_contradiction_flags(&self, claim_id: Uuid) -> Result<()> {
        let (supports, refutes) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN relation = 'supports' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN relation = 'refutes' THEN 1 ELSE 0 END), 0)
            FROM edges
            WHERE target_kind = 'claim' AND target_id = ?
              AND relation IN ('supports', 'refutes')
            "#,
        )
        .bind(claim_id.to_string())
        .fetch_one(self.pool())
        .await?;

        let contradicted = supports >= 1 && refutes >= 1;
        sqlx::query(
            r#"
            UPDATE edges SET is_contradiction = ?
            WHERE target_kind = 'claim' AND target_id = ?
              AND relation IN ('supports', 'refutes')
            "#,
        )
        .bind(contradicted)
        .bind(claim_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FragmentDraft, TrustLevel};

    struct Fixture {
        store: EvidenceStore,
        task_id: Uuid,
        claim_id: Uuid,
    }

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

    async fn fixture() -> Fixture {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        let origin = fragment_on(&store, "doi:10.1/origin", "X reduces Y by 0.5.").await;
        let claim = store
            .insert_claim(task.id, "X reduces Y by 0.5", origin)
            .await
            .unwrap();
        Fixture {
            store,
            task_id: task.id,
            claim_id: claim.claim_id,
        }
    }

    fn nli_edge(f: &Fixture, fragment_id: Uuid, relation: Relation) -> NewEdge {
        NewEdge::nli(
            fragment_id,
            f.claim_id,
            f.task_id,
            relation,
            0.9,
            TrustLevel::Academic,
            TrustLevel::Unverified,
        )
    }

    #[tokio::test]
    async fn cross_source_support_is_accepted() {
        let f = fixture().await;
        let other = fragment_on(&f.store, "doi:10.1/other", "Replication shows X lowers Y.").await;
        let edge = f.store.insert_edge(&nli_edge(&f, other, Relation::Supports)).await.unwrap();
        assert_eq!(edge.relation, Relation::Supports);
        assert!(!edge.is_contradiction);
    }

    #[tokio::test]
    async fn same_source_support_is_rejected() {
        let f = fixture().await;
        // A second fragment on the origin page: same canonical id.
        let page = f
            .store
            .find_page_by_canonical("doi:10.1/origin")
            .await
            .unwrap()
            .unwrap();
        let same_page_fragment = f
            .store
            .insert_fragments(page.id, &[FragmentDraft::new(None, "More of the same.", 1)])
            .await
            .unwrap()[0];

        let err = f
            .store
            .insert_edge(&nli_edge(&f, same_page_fragment, Relation::Supports))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "constraint_violation");
    }

    #[tokio::test]
    async fn neutral_edges_skip_the_independence_check() {
        let f = fixture().await;
        let page = f
            .store
            .find_page_by_canonical("doi:10.1/origin")
            .await
            .unwrap()
            .unwrap();
        let same_page_fragment = f
            .store
            .insert_fragments(page.id, &[FragmentDraft::new(None, "Background text.", 1)])
            .await
            .unwrap()[0];
        // Neutral carries no confidence mass, so it is allowed anywhere.
        let edge = f
            .store
            .insert_edge(&nli_edge(&f, same_page_fragment, Relation::Neutral))
            .await
            .unwrap();
        assert_eq!(edge.relation, Relation::Neutral);
    }

    #[tokio::test]
    async fn opposing_edges_flag_a_contradiction() {
        let f = fixture().await;
        let pro = fragment_on(&f.store, "doi:10.1/pro", "X lowers Y substantially.").await;
        let con = fragment_on(&f.store, "doi:10.1/con", "X does not reduce Y.").await;

        f.store.insert_edge(&nli_edge(&f, pro, Relation::Supports)).await.unwrap();
        f.store.insert_edge(&nli_edge(&f, con, Relation::Refutes)).await.unwrap();

        let edges = f.store.nli_edges_for_claim(f.claim_id).await.unwrap();
        let directional: Vec<_> = edges.iter().filter(|e| e.relation.is_directional()).collect();
        assert_eq!(directional.len(), 2);
        assert!(directional.iter().all(|e| e.is_contradiction));
    }

    #[tokio::test]
    async fn corrected_edge_updates_contradiction_state() {
        let f = fixture().await;
        let pro = fragment_on(&f.store, "doi:10.1/pro", "X lowers Y substantially.").await;
        let con = fragment_on(&f.store, "doi:10.1/con", "X does not reduce Y.").await;
        f.store.insert_edge(&nli_edge(&f, pro, Relation::Supports)).await.unwrap();
        let refute = f.store.insert_edge(&nli_edge(&f, con, Relation::Refutes)).await.unwrap();

        // The refutation was a model error; the user flips it.
        let fixed = f
            .store
            .correct_edge_relation(refute.id, Relation::Supports)
            .await
            .unwrap();
        assert_eq!(fixed.relation, Relation::Supports);
        assert!(!fixed.is_contradiction);
    }

    #[tokio::test]
    async fn origin_edges_cannot_be_corrected() {
        let f = fixture().await;
        let edges = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM edges WHERE relation = 'origin' AND target_id = ?",
        )
        .bind(f.claim_id.to_string())
        .fetch_all(f.store.pool())
        .await
        .unwrap();
        let err = f
            .store
            .correct_edge_relation(edges[0], Relation::Supports)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }
}
