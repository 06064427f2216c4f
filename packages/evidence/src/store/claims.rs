//! Claim persistence: within-task dedup, adoption, confidence recompute.

use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::EvidenceStore;
use crate::error::{Error, Result};
use crate::types::{normalize_claim_text, AdoptionStatus, Claim, Relation, TrustLevel};
use crate::verify::confidence::{bayesian_confidence, exploration_score, WeightedEdge};

/// Outcome of inserting (or re-anchoring) a claim.
#[derive(Debug, Clone)]
pub struct ClaimInsert {
    pub claim_id: Uuid,
    /// True when the claim text was new to this task.
    pub created: bool,
    /// NLI edges deleted because their source page is no longer independent
    /// of the claim's ORIGIN set. Non-zero means re-verification is due.
    pub invalidated_edges: i64,
}

impl EvidenceStore {
    /// Insert a claim, deduplicating within the task by normalized text, and
    /// attach an ORIGIN edge to the given fragment.
    pub async fn insert_claim(
        &self,
        task_id: Uuid,
        text: &str,
        origin_fragment_id: Uuid,
    ) -> Result<ClaimInsert> {
        let mut tx = self.pool().begin().await?;
        let result = insert_claim_in(&mut tx, task_id, text, origin_fragment_id).await?;
        tx.commit().await?;
        Ok(result)
    }

    pub async fn get_claim(&self, claim_id: Uuid) -> Result<Claim> {
        sqlx::query_as::<_, Claim>(
            r#"
            SELECT id, task_id, text, normalized_text, adoption_status,
                   bayesian_truth_confidence, exploration_score, last_verified_at, created_at
            FROM claims WHERE id = ?
            "#,
        )
        .bind(claim_id.to_string())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("claim {claim_id}")))
    }

    pub async fn claims_for_task(&self, task_id: Uuid, limit: i64) -> Result<Vec<Claim>> {
        let rows = sqlx::query_as::<_, Claim>(
            r#"
            SELECT id, task_id, text, normalized_text, adoption_status,
                   bayesian_truth_confidence, exploration_score, last_verified_at, created_at
            FROM claims WHERE task_id = ? ORDER BY created_at LIMIT ?
            "#,
        )
        .bind(task_id.to_string())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    pub async fn set_adoption_status(
        &self,
        claim_id: Uuid,
        status: AdoptionStatus,
    ) -> Result<()> {
        let updated = sqlx::query("UPDATE claims SET adoption_status = ? WHERE id = ?")
            .bind(status)
            .bind(claim_id.to_string())
            .execute(self.pool())
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(Error::NotFound(format!("claim {claim_id}")));
        }
        Ok(())
    }

    /// Stamp the claim as having had NLI selection run against the current
    /// fragment set.
    pub async fn mark_claim_verified(&self, claim_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE claims SET last_verified_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(claim_id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Claims still owed a first verification pass. Rejected claims are out
    /// of scope for the milestone; everything else counts.
    pub async fn unverified_claim_count(&self, task_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM claims
            WHERE task_id = ? AND last_verified_at IS NULL AND adoption_status != 'not_adopted'
            "#,
        )
        .bind(task_id.to_string())
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    /// Recompute the confidence aggregate from committed directional NLI
    /// edges. Returns `(bayesian_truth_confidence, exploration_score)`.
    pub async fn recompute_claim_confidence(&self, claim_id: Uuid) -> Result<(f64, f64)> {
        let mut tx = self.pool().begin().await?;
        let result = recompute_claim_confidence_in(&mut tx, claim_id).await?;
        tx.commit().await?;
        Ok(result)
    }
}

pub(super) async fn insert_claim_in(
    conn: &mut SqliteConnection,
    task_id: Uuid,
    text: &str,
    origin_fragment_id: Uuid,
) -> Result<ClaimInsert> {
    let normalized = normalize_claim_text(text);
    if normalized.is_empty() {
        return Err(Error::InvalidArgument("claim text must not be empty".into()));
    }

    let existing = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM claims WHERE task_id = ? AND normalized_text = ?",
    )
    .bind(task_id.to_string())
    .bind(&normalized)
    .fetch_optional(&mut *conn)
    .await?;

    let (claim_id, created) = match existing {
        Some(id) => (id, false),
        None => {
            let id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO claims (id, task_id, text, normalized_text, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(id.to_string())
            .bind(task_id.to_string())
            .bind(text)
            .bind(&normalized)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await?;
            (id, true)
        }
    };

    // Attach the ORIGIN edge unless this exact anchor already exists.
    let have_origin = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM edges
        WHERE relation = 'origin' AND source_kind = 'fragment' AND source_id = ?
          AND target_kind = 'claim' AND target_id = ?
        "#,
    )
    .bind(origin_fragment_id.to_string())
    .bind(claim_id.to_string())
    .fetch_one(&mut *conn)
    .await?;

    if have_origin == 0 {
        sqlx::query(
            r#"
            INSERT INTO edges (id, source_kind, source_id, target_kind, target_id, relation,
                               task_id, created_at)
            VALUES (?, 'fragment', ?, 'claim', ?, 'origin', ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(origin_fragment_id.to_string())
        .bind(claim_id.to_string())
        .bind(task_id.to_string())
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
    }

    let mut invalidated = 0;
    if !created {
        // The ORIGIN set grew: NLI edges whose source page now shares a
        // canonical id with any origin are no longer cross-source.
        invalidated = invalidate_dependent_edges_in(conn, claim_id).await?;
        if invalidated > 0 {
            recompute_claim_confidence_in(conn, claim_id).await?;
        }
    }

    Ok(ClaimInsert {
        claim_id,
        created,
        invalidated_edges: invalidated,
    })
}

/// Delete NLI edges into `claim_id` whose source fragment's page shares a
/// canonical id with any of the claim's ORIGIN pages.
async fn invalidate_dependent_edges_in(
    conn: &mut SqliteConnection,
    claim_id: Uuid,
) -> Result<i64> {
    let deleted = sqlx::query(
        r#"
        DELETE FROM edges WHERE id IN (
            SELECT e.id
            FROM edges e
            JOIN fragments f ON f.id = e.source_id AND e.source_kind = 'fragment'
            JOIN pages p ON p.id = f.page_id
            WHERE e.target_kind = 'claim' AND e.target_id = ?
              AND e.relation IN ('supports', 'refutes', 'neutral')
              AND p.canonical_id IN (
                  SELECT op.canonical_id
                  FROM edges oe
                  JOIN fragments ofr ON ofr.id = oe.source_id AND oe.source_kind = 'fragment'
                  JOIN pages op ON op.id = ofr.page_id
                  WHERE oe.relation = 'origin' AND oe.target_kind = 'claim' AND oe.target_id = ?
              )
        )
        "#,
    )
    .bind(claim_id.to_string())
    .bind(claim_id.to_string())
    .execute(conn)
    .await?
    .rows_affected();
    Ok(deleted as i64)
}

pub(super) async fn recompute_claim_confidence_in(
    conn: &mut SqliteConnection,
    claim_id: Uuid,
) -> Result<(f64, f64)> {
    let rows = sqlx::query_as::<_, (Relation, Option<f64>, Option<TrustLevel>)>(
        r#"
        SELECT relation, nli_edge_confidence, source_trust_level FROM edges
        WHERE target_kind = 'claim' AND target_id = ?
          AND relation IN ('supports', 'refutes')
        "#,
    )
    .bind(claim_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let mut supports = Vec::new();
    let mut refutes = Vec::new();
    for (relation, confidence, trust) in rows {
        let edge = WeightedEdge {
            nli_confidence: confidence.unwrap_or(0.0),
            trust_weight: trust.unwrap_or_default().weight(),
        };
        match relation {
            Relation::Supports => supports.push(edge),
            Relation::Refutes => refutes.push(edge),
            _ => {}
        }
    }

    let confidence = bayesian_confidence(&supports, &refutes);
    let exploration = exploration_score(&supports, &refutes);

    let updated = sqlx::query(
        "UPDATE claims SET bayesian_truth_confidence = ?, exploration_score = ? WHERE id = ?",
    )
    .bind(confidence)
    .bind(exploration)
    .bind(claim_id.to_string())
    .execute(conn)
    .await?
    .rows_affected();
    if updated == 0 {
        return Err(Error::NotFound(format!("claim {claim_id}")));
    }

    Ok((confidence, exploration))
}
