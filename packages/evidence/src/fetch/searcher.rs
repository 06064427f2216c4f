//! Web searcher trait for open-world discovery.
//!
//! SERP results may carry identifiers (DOI/PMID) harvested from result URLs
//! or snippets; those hits short-circuit to the academic fast path instead
//! of a browser fetch.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::extract::metadata::harvest_identifiers;

/// A discovered URL from web search with metadata.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    /// Canonical identifiers (`doi:...`, `pmid:...`) visible on the SERP.
    pub identifiers: Vec<String>,
}

impl SearchHit {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            snippet: None,
            identifiers: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_identifier(mut self, id: impl Into<String>) -> Self {
        self.identifiers.push(id.into());
        self
    }

    /// Fill `identifiers` from whatever is visible in the URL and snippet.
    pub fn harvest(mut self) -> Self {
        let mut ids = harvest_identifiers(&self.url);
        if let Some(snippet) = &self.snippet {
            ids.extend(harvest_identifiers(snippet));
        }
        ids.sort();
        ids.dedup();
        self.identifiers = ids;
        self
    }
}

/// Web search backend abstraction.
#[async_trait]
pub trait WebSearcher: Send + Sync {
    /// Search the web for URLs relevant to the query.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// HTTP client for the external search backend.
///
/// Expects a JSON API: `POST {base}/search {"query": "..."}` returning
/// `{"results": [{"url", "title", "snippet"}]}`.
pub struct HttpWebSearcher {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<SearchResponseHit>,
}

#[derive(Deserialize)]
struct SearchResponseHit {
    url: String,
    title: Option<String>,
    snippet: Option<String>,
}

impl HttpWebSearcher {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl WebSearcher for HttpWebSearcher {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let mut request = self
            .http
            .post(format!("{}/search", self.base_url))
            .json(&serde_json::json!({ "query": query }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(Error::TransientFetch(format!(
                "search backend returned HTTP {status}"
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::TransientFetch(format!("bad search response: {e}")))?;

        Ok(body
            .results
            .into_iter()
            .map(|hit| {
                let mut out = SearchHit::new(hit.url);
                if let Some(title) = hit.title {
                    out = out.with_title(title);
                }
                if let Some(snippet) = hit.snippet {
                    out = out.with_snippet(snippet);
                }
                out.harvest()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harvest_finds_dois_in_urls() {
        let hit = SearchHit::new("https://doi.org/10.1000/xyz123").harvest();
        assert_eq!(hit.identifiers, vec!["doi:10.1000/xyz123".to_string()]);
    }

    #[test]
    fn harvest_finds_pmids_in_snippets() {
        let hit = SearchHit::new("https://example.com/paper")
            .with_snippet("See pubmed.ncbi.nlm.nih.gov/12345678 for details")
            .harvest();
        assert!(hit.identifiers.contains(&"pmid:12345678".to_string()));
    }

    #[test]
    fn plain_hits_have_no_identifiers() {
        let hit = SearchHit::new("https://example.com/blog")
            .with_snippet("no identifiers here")
            .harvest();
        assert!(hit.identifiers.is_empty());
    }
}
