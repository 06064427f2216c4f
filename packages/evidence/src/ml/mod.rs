//! Local ML sidecar: claim extraction, embedding, and NLI scoring.
//!
//! The inference services are treated as network endpoints with bounded
//! concurrent calls; the traits keep the pipeline testable against mocks.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::types::FragmentDraft;

/// A claim emitted by the extraction model. The fragment index anchors the
/// claim to its originating span; claims without a valid anchor are
/// discarded downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawClaim {
    pub text: String,
    pub fragment_index: usize,
}

/// Claim extraction endpoint.
#[async_trait]
pub trait ClaimModel: Send + Sync {
    /// Extract atomic claims relevant to `hypothesis` from the fragments.
    async fn extract_claims(
        &self,
        hypothesis: &str,
        fragments: &[FragmentDraft],
    ) -> Result<Vec<RawClaim>>;
}

/// Embedding endpoint.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NliClass {
    Entail,
    Neutral,
    Contradict,
}

/// Class probabilities from the entailment model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NliScores {
    pub entail: f64,
    pub neutral: f64,
    pub contradict: f64,
}

impl NliScores {
    /// Winning class and its probability.
    pub fn argmax(&self) -> (NliClass, f64) {
        let mut best = (NliClass::Entail, self.entail);
        if self.neutral > best.1 {
            best = (NliClass::Neutral, self.neutral);
        }
        if self.contradict > best.1 {
            best = (NliClass::Contradict, self.contradict);
        }
        best
    }
}

/// Textual entailment endpoint.
#[async_trait]
pub trait NliModel: Send + Sync {
    /// Score `(premise, hypothesis)` as entail/neutral/contradict.
    async fn score(&self, premise: &str, hypothesis: &str) -> Result<NliScores>;
}

/// HTTP client for the local inference sidecar.
///
/// Endpoints: `POST /v1/claims`, `POST /v1/embed`, `POST /v1/nli`, and
/// `GET /healthz` for the doctor check. Concurrent calls are bounded by a
/// semaphore sized to the sidecar's capacity.
pub struct SidecarClient {
    http: Client,
    base_url: String,
    model: String,
    permits: Arc<Semaphore>,
}

impl SidecarClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Liveness probe used by the doctor command.
    pub async fn healthy(&self) -> bool {
        match self
            .http
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Sidecar("sidecar client shut down".into()))?;
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Sidecar(format!("{path}: {e}")))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(Error::Sidecar(format!("{path} returned HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Sidecar(format!("{path}: bad response: {e}")))
    }
}

#[derive(Serialize)]
struct ClaimsRequest<'a> {
    model: &'a str,
    hypothesis: &'a str,
    fragments: Vec<ClaimsRequestFragment<'a>>,
}

#[derive(Serialize)]
struct ClaimsRequestFragment<'a> {
    index: usize,
    text: &'a str,
}

#[derive(Deserialize)]
struct ClaimsResponse {
    claims: Vec<RawClaim>,
}

#[async_trait]
impl ClaimModel for SidecarClient {
    async fn extract_claims(
        &self,
        hypothesis: &str,
        fragments: &[FragmentDraft],
    ) -> Result<Vec<RawClaim>> {
        let request = ClaimsRequest {
            model: &self.model,
            hypothesis,
            fragments: fragments
                .iter()
                .enumerate()
                .map(|(index, f)| ClaimsRequestFragment {
                    index,
                    text: &f.text,
                })
                .collect(),
        };
        let response: ClaimsResponse = self.post_json("/v1/claims", &request).await?;
        Ok(response.claims)
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    vectors: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingModel for SidecarClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Sidecar("embed returned no vector".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response: EmbedResponse = self
            .post_json("/v1/embed", &serde_json::json!({ "texts": texts }))
            .await?;
        if response.vectors.len() != texts.len() {
            return Err(Error::Sidecar(format!(
                "embed returned {} vectors for {} texts",
                response.vectors.len(),
                texts.len()
            )));
        }
        Ok(response.vectors)
    }
}

#[async_trait]
impl NliModel for SidecarClient {
    async fn score(&self, premise: &str, hypothesis: &str) -> Result<NliScores> {
        self.post_json(
            "/v1/nli",
            &serde_json::json!({ "premise": premise, "hypothesis": hypothesis }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_picks_the_winning_class() {
        let scores = NliScores {
            entail: 0.7,
            neutral: 0.2,
            contradict: 0.1,
        };
        assert_eq!(scores.argmax(), (NliClass::Entail, 0.7));

        let scores = NliScores {
            entail: 0.1,
            neutral: 0.2,
            contradict: 0.7,
        };
        assert_eq!(scores.argmax(), (NliClass::Contradict, 0.7));
    }

    #[test]
    fn argmax_ties_prefer_the_earlier_class() {
        let scores = NliScores {
            entail: 0.4,
            neutral: 0.4,
            contradict: 0.2,
        };
        assert_eq!(scores.argmax().0, NliClass::Entail);
    }
}
