//! Mock implementations of the external collaborators.
//!
//! Tests wire these into the same traits the production clients implement,
//! so the whole pipeline runs without a network or a GPU.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::fetch::{AcademicLookup, BrowserFetcher, BrowserPage, SearchHit, WebSearcher};
use crate::ml::{ClaimModel, EmbeddingModel, NliModel, NliScores, RawClaim};
use crate::types::{FragmentDraft, WorkRecord};

// ============================================================================
// MockSidecar
// ============================================================================

struct NliRule {
    premise_contains: String,
    hypothesis_contains: String,
    scores: NliScores,
}

/// One mock standing in for all three sidecar endpoints.
///
/// Claim extraction fires on substring rules; embeddings are a deterministic
/// bag-of-words hash so textually similar inputs land near each other; NLI
/// verdicts fire on (premise, hypothesis) substring rules and default to a
/// confident neutral.
#[derive(Default)]
pub struct MockSidecar {
    claim_rules: RwLock<Vec<(String, String)>>,
    embedding_overrides: RwLock<HashMap<String, Vec<f32>>>,
    nli_rules: RwLock<Vec<NliRule>>,
    fail_claims: RwLock<bool>,
}

impl MockSidecar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `claim_text` for any fragment containing `fragment_contains`.
    pub fn with_claim(
        self,
        fragment_contains: impl Into<String>,
        claim_text: impl Into<String>,
    ) -> Self {
        self.claim_rules
            .write()
            .unwrap()
            .push((fragment_contains.into(), claim_text.into()));
        self
    }

    /// Pin an exact embedding for a text.
    pub fn with_embedding(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.embedding_overrides
            .write()
            .unwrap()
            .insert(text.into(), vector);
        self
    }

    pub fn with_entailment(
        self,
        premise_contains: impl Into<String>,
        hypothesis_contains: impl Into<String>,
        p: f64,
    ) -> Self {
        self.nli_rules.write().unwrap().push(NliRule {
            premise_contains: premise_contains.into(),
            hypothesis_contains: hypothesis_contains.into(),
            scores: NliScores {
                entail: p,
                neutral: (1.0 - p) / 2.0,
                contradict: (1.0 - p) / 2.0,
            },
        });
        self
    }

    pub fn with_contradiction(
        self,
        premise_contains: impl Into<String>,
        hypothesis_contains: impl Into<String>,
        p: f64,
    ) -> Self {
        self.nli_rules.write().unwrap().push(NliRule {
            premise_contains: premise_contains.into(),
            hypothesis_contains: hypothesis_contains.into(),
            scores: NliScores {
                entail: (1.0 - p) / 2.0,
                neutral: (1.0 - p) / 2.0,
                contradict: p,
            },
        });
        self
    }

    /// Make claim extraction fail, simulating a dead sidecar.
    pub fn with_failing_claims(self) -> Self {
        *self.fail_claims.write().unwrap() = true;
        self
    }
}

/// 64-dimension bag-of-words hash embedding: deterministic, and word
/// overlap translates into cosine similarity.
pub fn hash_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; 64];
    for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let mut hash = 0usize;
        for byte in word.bytes() {
            hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
        }
        vector[hash % 64] += 1.0;
    }
    vector
}

#[async_trait]
impl ClaimModel for MockSidecar {
    async fn extract_claims(
        &self,
        _hypothesis: &str,
        fragments: &[FragmentDraft],
    ) -> Result<Vec<RawClaim>> {
        if *self.fail_claims.read().unwrap() {
            return Err(Error::Sidecar("claims endpoint unavailable".into()));
        }
        let rules = self.claim_rules.read().unwrap();
        let mut out = Vec::new();
        for (index, fragment) in fragments.iter().enumerate() {
            for (matcher, claim_text) in rules.iter() {
                if fragment.text.contains(matcher.as_str()) {
                    out.push(RawClaim {
                        text: claim_text.clone(),
                        fragment_index: index,
                    });
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl EmbeddingModel for MockSidecar {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.embedding_overrides.read().unwrap().get(text) {
            return Ok(vector.clone());
        }
        Ok(hash_embedding(text))
    }
}

#[async_trait]
impl NliModel for MockSidecar {
    async fn score(&self, premise: &str, hypothesis: &str) -> Result<NliScores> {
        let rules = self.nli_rules.read().unwrap();
        for rule in rules.iter() {
            if premise.contains(&rule.premise_contains)
                && hypothesis.contains(&rule.hypothesis_contains)
            {
                return Ok(rule.scores);
            }
        }
        Ok(NliScores {
            entail: 0.1,
            neutral: 0.8,
            contradict: 0.1,
        })
    }
}

// ============================================================================
// MockSearcher
// ============================================================================

/// Programmable web searcher: queries map to canned hits, unknown queries
/// return nothing.
#[derive(Default)]
pub struct MockSearcher {
    results: RwLock<HashMap<String, Vec<SearchHit>>>,
}

impl MockSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.results
            .write()
            .unwrap()
            .insert(query.to_string(), hits);
        self
    }

    pub fn with_urls(self, query: &str, urls: &[&str]) -> Self {
        let hits = urls
            .iter()
            .map(|u| SearchHit::new(*u).harvest())
            .collect();
        self.with_results(query, hits)
    }
}

#[async_trait]
impl WebSearcher for MockSearcher {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        Ok(self
            .results
            .read()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// MockAcademic
// ============================================================================

/// Programmable academic registry keyed by bare DOI / PMID.
#[derive(Default)]
pub struct MockAcademic {
    dois: RwLock<HashMap<String, WorkRecord>>,
    pmids: RwLock<HashMap<String, WorkRecord>>,
}

impl MockAcademic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_doi(self, doi: &str, record: WorkRecord) -> Self {
        self.dois.write().unwrap().insert(doi.to_string(), record);
        self
    }

    pub fn with_pmid(self, pmid: &str, record: WorkRecord) -> Self {
        self.pmids.write().unwrap().insert(pmid.to_string(), record);
        self
    }
}

#[async_trait]
impl AcademicLookup for MockAcademic {
    async fn by_doi(&self, doi: &str) -> Result<Option<WorkRecord>> {
        let doi = doi.trim_start_matches("doi:");
        Ok(self.dois.read().unwrap().get(doi).cloned())
    }

    async fn by_pmid(&self, pmid: &str) -> Result<Option<WorkRecord>> {
        let pmid = pmid.trim_start_matches("pmid:");
        Ok(self.pmids.read().unwrap().get(pmid).cloned())
    }
}

// ============================================================================
// MockBrowser
// ============================================================================

enum MockPage {
    Html(String),
    AuthWall,
}

/// Programmable browser sidecar: URLs map to bodies or auth walls; unknown
/// URLs come back 404.
#[derive(Default)]
pub struct MockBrowser {
    pages: RwLock<HashMap<String, MockPage>>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.pages
            .write()
            .unwrap()
            .insert(url.to_string(), MockPage::Html(html.to_string()));
        self
    }

    pub fn with_auth_wall(self, url: &str) -> Self {
        self.pages
            .write()
            .unwrap()
            .insert(url.to_string(), MockPage::AuthWall);
        self
    }

    /// Replace a page in place, e.g. after the user clears an auth wall.
    pub fn set_page(&self, url: &str, html: &str) {
        self.pages
            .write()
            .unwrap()
            .insert(url.to_string(), MockPage::Html(html.to_string()));
    }
}

#[async_trait]
impl BrowserFetcher for MockBrowser {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<BrowserPage> {
        match self.pages.read().unwrap().get(url) {
            Some(MockPage::Html(body)) => Ok(BrowserPage {
                status: 200,
                body: body.clone(),
                title: None,
                auth_block: false,
            }),
            Some(MockPage::AuthWall) => Ok(BrowserPage {
                status: 200,
                body: String::new(),
                title: None,
                auth_block: true,
            }),
            None => Ok(BrowserPage {
                status: 404,
                body: String::new(),
                title: None,
                auth_block: false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::cosine_similarity;

    #[test]
    fn hash_embeddings_reflect_word_overlap() {
        let a = hash_embedding("X reduces Y by half");
        let b = hash_embedding("X reduces Y substantially");
        let c = hash_embedding("unrelated gardening advice");
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[tokio::test]
    async fn sidecar_rules_fire_on_substrings() {
        let sidecar = MockSidecar::new().with_claim("reduced Y", "X reduces Y");
        let fragments = vec![
            FragmentDraft::new(None, "X reduced Y in trials.", 0),
            FragmentDraft::new(None, "Methods were standard.", 1),
        ];
        let claims = sidecar.extract_claims("h", &fragments).await.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].fragment_index, 0);
    }

    #[tokio::test]
    async fn nli_defaults_to_neutral() {
        let sidecar = MockSidecar::new();
        let scores = sidecar.score("premise", "hypothesis").await.unwrap();
        assert!(scores.neutral > scores.entail);
    }
}
