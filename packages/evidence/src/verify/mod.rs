//! Cross-source NLI verification.
//!
//! For each claim, candidate fragments are selected by embedding similarity,
//! filtered by the independence rule (no fragment from a page sharing a
//! canonical id with any ORIGIN page), scored by the entailment model, and
//! written as SUPPORTS/NEUTRAL/REFUTES edges when the winning class clears
//! its threshold. Per-claim work is serialized under a claim lock so the
//! confidence aggregate always reflects a consistent set of committed edges.

pub mod confidence;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ml::{EmbeddingModel, NliClass, NliModel};
use crate::store::{EvidenceStore, VectorTarget};
use crate::types::{NewEdge, NliConfig, Relation, TrustLevel};

/// Result of one verification pass over a claim.
#[derive(Debug, Clone, Default)]
pub struct VerifyOutcome {
    pub candidates_scored: usize,
    pub edges_written: usize,
    pub confidence: f64,
    pub exploration_score: f64,
    pub contradiction: bool,
}

pub struct NliVerifier {
    nli: Arc<dyn NliModel>,
    embedder: Arc<dyn EmbeddingModel>,
    config: NliConfig,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl NliVerifier {
    pub fn new(
        nli: Arc<dyn NliModel>,
        embedder: Arc<dyn EmbeddingModel>,
        config: NliConfig,
    ) -> Self {
        Self {
            nli,
            embedder,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn claim_lock(&self, claim_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(claim_id).or_default().clone()
    }

    /// Run NLI selection and scoring for one claim against the current
    /// fragment set, then recompute its confidence.
    pub async fn verify_claim(
        &self,
        store: &EvidenceStore,
        claim_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<VerifyOutcome> {
        let lock = self.claim_lock(claim_id).await;
        let _guard = lock.lock().await;

        let claim = store.get_claim(claim_id).await?;
        let origins = store.origin_canonical_ids(claim_id).await?;
        if origins.is_empty() {
            return Err(Error::ConstraintViolation(format!(
                "claim {claim_id} has no origin edges"
            )));
        }

        let claim_vector = match store.get_embedding(VectorTarget::Claims, claim_id).await? {
            Some(vector) => vector,
            None => {
                let vector = self.embedder.embed(&claim.text).await?;
                store
                    .put_embedding(VectorTarget::Claims, claim_id, Some(claim.task_id), &vector)
                    .await?;
                vector
            }
        };

        let already_scored = store.nli_scored_fragment_ids(claim_id).await?;
        let candidates = store
            .nli_candidate_fragments(
                &claim_vector,
                &origins,
                &already_scored,
                self.config.candidate_k,
            )
            .await?;

        let target_trust = self.strongest_origin_trust(store, claim_id).await?;

        let mut edges_written = 0usize;
        for candidate in &candidates {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let scores = self.nli.score(&candidate.text, &claim.text).await?;
            let (class, probability) = scores.argmax();
            let (relation, threshold) = match class {
                NliClass::Entail => (Relation::Supports, self.config.thresholds.entail),
                NliClass::Neutral => (Relation::Neutral, self.config.thresholds.neutral),
                NliClass::Contradict => (Relation::Refutes, self.config.thresholds.contradict),
            };
            if probability < threshold {
                continue;
            }

            let source_domain = store.fragment_domain(candidate.target_id).await?;
            let source_trust = store.domain_trust(&source_domain).await?;

            let edge = NewEdge::nli(
                candidate.target_id,
                claim_id,
                claim.task_id,
                relation,
                probability,
                source_trust,
                target_trust,
            );
            match store.insert_edge(&edge).await {
                Ok(_) => edges_written += 1,
                // An origin raced in between selection and insert; the
                // candidate is simply no longer independent.
                Err(Error::ConstraintViolation(reason)) => {
                    tracing::debug!(claim_id = %claim_id, %reason, "skipping dependent candidate");
                }
                Err(e) => return Err(e),
            }
        }

        let (confidence, exploration) = store.recompute_claim_confidence(claim_id).await?;
        store.mark_claim_verified(claim_id).await?;

        let contradiction = store
            .nli_edges_for_claim(claim_id)
            .await?
            .iter()
            .any(|e| e.is_contradiction);

        tracing::info!(
            claim_id = %claim_id,
            scored = candidates.len(),
            written = edges_written,
            confidence,
            "claim verified"
        );

        Ok(VerifyOutcome {
            candidates_scored: candidates.len(),
            edges_written,
            confidence,
            exploration_score: exploration,
            contradiction,
        })
    }

    /// Trust stamped on the claim side of new edges: the strongest trust
    /// level among the claim's origin domains.
    async fn strongest_origin_trust(
        &self,
        store: &EvidenceStore,
        claim_id: Uuid,
    ) -> Result<TrustLevel> {
        let mut best = TrustLevel::Unverified;
        for domain in store.origin_domains(claim_id).await? {
            let trust = store.domain_trust(&domain).await?;
            if trust.weight() > best.weight() {
                best = trust;
            }
        }
        Ok(best)
    }
}
