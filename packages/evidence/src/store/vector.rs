//! Embedding persistence and nearest-neighbour search.
//!
//! Vectors live as little-endian f32 BLOBs keyed by `(target_kind,
//! target_id)`. Search is an exact cosine scan over the candidate set,
//! deterministic with ties broken by id.

use uuid::Uuid;

use super::EvidenceStore;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorTarget {
    Claims,
    Fragments,
}

impl VectorTarget {
    fn kind_str(&self) -> &'static str {
        match self {
            VectorTarget::Claims => "claim",
            VectorTarget::Fragments => "fragment",
        }
    }
}

/// One nearest-neighbour hit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VectorHit {
    pub target_id: Uuid,
    pub score: f32,
    pub text: String,
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

impl EvidenceStore {
    /// Store (or replace) the embedding for a claim or fragment.
    pub async fn put_embedding(
        &self,
        target: VectorTarget,
        target_id: Uuid,
        task_id: Option<Uuid>,
        vector: &[f32],
    ) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::InvalidArgument("empty embedding vector".into()));
        }
        sqlx::query(
            r#"
            INSERT INTO embeddings (target_kind, target_id, task_id, vector)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (target_kind, target_id) DO UPDATE SET
                vector = excluded.vector,
                task_id = excluded.task_id
            "#,
        )
        .bind(target.kind_str())
        .bind(target_id.to_string())
        .bind(task_id.map(|t| t.to_string()))
        .bind(encode_vector(vector))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Stored embedding for a claim or fragment, if one exists.
    pub async fn get_embedding(
        &self,
        target: VectorTarget,
        target_id: Uuid,
    ) -> Result<Option<Vec<f32>>> {
        let bytes = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT vector FROM embeddings WHERE target_kind = ? AND target_id = ?",
        )
        .bind(target.kind_str())
        .bind(target_id.to_string())
        .fetch_optional(self.pool())
        .await?;
        Ok(bytes.map(|b| decode_vector(&b)))
    }

    /// Top-k nearest targets to `query_vector` by cosine similarity.
    pub async fn vector_search(
        &self,
        query_vector: &[f32],
        target: VectorTarget,
        task_id: Option<Uuid>,
        k: usize,
    ) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be positive".into()));
        }

        let sql = match (target, task_id.is_some()) {
            (VectorTarget::Claims, true) => {
                "SELECT e.target_id, e.vector, c.text FROM embeddings e
                 JOIN claims c ON c.id = e.target_id
                 WHERE e.target_kind = 'claim' AND c.task_id = ?"
            }
            (VectorTarget::Claims, false) => {
                "SELECT e.target_id, e.vector, c.text FROM embeddings e
                 JOIN claims c ON c.id = e.target_id
                 WHERE e.target_kind = 'claim'"
            }
            // Fragments are global; the task filter does not apply.
            (VectorTarget::Fragments, _) => {
                "SELECT e.target_id, e.vector, f.text FROM embeddings e
                 JOIN fragments f ON f.id = e.target_id
                 WHERE e.target_kind = 'fragment'"
            }
        };

        let mut query = sqlx::query_as::<_, (Uuid, Vec<u8>, String)>(sql);
        if target == VectorTarget::Claims {
            if let Some(id) = task_id {
                query = query.bind(id.to_string());
            }
        }
        let rows = query.fetch_all(self.pool()).await?;

        let mut hits: Vec<VectorHit> = rows
            .into_iter()
            .map(|(target_id, bytes, text)| VectorHit {
                target_id,
                score: cosine_similarity(query_vector, &decode_vector(&bytes)),
                text,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Candidate fragments for NLI verification: top-k by similarity to the
    /// claim vector, excluding fragments on pages whose canonical id is in
    /// `excluded_canonical_ids`, and excluding already-scored fragments.
    pub async fn nli_candidate_fragments(
        &self,
        claim_vector: &[f32],
        excluded_canonical_ids: &[String],
        already_scored: &[Uuid],
        k: usize,
    ) -> Result<Vec<VectorHit>> {
        let rows = sqlx::query_as::<_, (Uuid, Vec<u8>, String, String)>(
            r#"
            SELECT e.target_id, e.vector, f.text, p.canonical_id
            FROM embeddings e
            JOIN fragments f ON f.id = e.target_id
            JOIN pages p ON p.id = f.page_id
            WHERE e.target_kind = 'fragment'
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        let mut hits: Vec<VectorHit> = rows
            .into_iter()
            .filter(|(id, _, _, canonical)| {
                !excluded_canonical_ids.iter().any(|c| c == canonical)
                    && !already_scored.contains(id)
            })
            .map(|(target_id, bytes, text, _)| VectorHit {
                target_id,
                score: cosine_similarity(claim_vector, &decode_vector(&bytes)),
                text,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}
