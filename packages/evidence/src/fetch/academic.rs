//! Academic metadata lookup: DOI and PMID fast paths.
//!
//! The abstract-only path skips browser rendering entirely: the API record
//! carries title, venue, authors, and abstract, which is enough to extract
//! and verify claims against.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{Author, Work, WorkRecord};

/// Academic metadata backend abstraction.
#[async_trait]
pub trait AcademicLookup: Send + Sync {
    /// Look up a work by DOI. `None` when the registry has no record.
    async fn by_doi(&self, doi: &str) -> Result<Option<WorkRecord>>;

    /// Identical contract for PMID.
    async fn by_pmid(&self, pmid: &str) -> Result<Option<WorkRecord>>;
}

/// HTTP client for the academic metadata API.
///
/// Expects `GET {base}/works/doi/{doi}` and `GET {base}/works/pmid/{pmid}`
/// returning a flat work record, 404 for unknown identifiers.
pub struct HttpAcademicClient {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct WorkResponse {
    doi: Option<String>,
    title: Option<String>,
    year: Option<i64>,
    venue: Option<String>,
    #[serde(default)]
    authors: Vec<AuthorResponse>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
}

#[derive(Deserialize)]
struct AuthorResponse {
    name: String,
    orcid: Option<String>,
}

impl HttpAcademicClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn lookup(&self, path: &str, canonical_id: &str) -> Result<Option<WorkRecord>> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {}
            404 => return Ok(None),
            429 => {
                return Err(Error::TransientFetch(
                    "academic api rate limited".into(),
                ))
            }
            status if status >= 500 => {
                return Err(Error::TransientFetch(format!(
                    "academic api returned HTTP {status}"
                )))
            }
            status => {
                return Err(Error::TerminalFetch(format!(
                    "academic api returned HTTP {status}"
                )))
            }
        }

        let body: WorkResponse = response
            .json()
            .await
            .map_err(|e| Error::TerminalFetch(format!("bad academic api response: {e}")))?;

        Ok(Some(work_record(canonical_id, body)))
    }
}

fn work_record(canonical_id: &str, body: WorkResponse) -> WorkRecord {
    let authors = body
        .authors
        .into_iter()
        .enumerate()
        .map(|(position, author)| Author {
            work_id: canonical_id.to_string(),
            position: position as i64,
            name: author.name,
            orcid: author.orcid,
        })
        .collect();

    WorkRecord {
        work: Work {
            canonical_id: canonical_id.to_string(),
            doi: body.doi,
            year: body.year,
            venue: body.venue,
        },
        authors,
        abstract_text: body.abstract_text,
        title: body.title,
    }
}

#[async_trait]
impl AcademicLookup for HttpAcademicClient {
    async fn by_doi(&self, doi: &str) -> Result<Option<WorkRecord>> {
        let doi = doi.trim_start_matches("doi:");
        self.lookup(&format!("/works/doi/{doi}"), &format!("doi:{doi}"))
            .await
    }

    async fn by_pmid(&self, pmid: &str) -> Result<Option<WorkRecord>> {
        let pmid = pmid.trim_start_matches("pmid:");
        self.lookup(&format!("/works/pmid/{pmid}"), &format!("pmid:{pmid}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_record_preserves_author_order() {
        let body = WorkResponse {
            doi: Some("10.1/x".into()),
            title: Some("A meta-analysis".into()),
            year: Some(2020),
            venue: Some("J. Evidence".into()),
            authors: vec![
                AuthorResponse {
                    name: "A. First".into(),
                    orcid: None,
                },
                AuthorResponse {
                    name: "B. Second".into(),
                    orcid: Some("0000-0001-2345-6789".into()),
                },
            ],
            abstract_text: Some("We find that X reduces Y.".into()),
        };
        let record = work_record("doi:10.1/x", body);
        assert_eq!(record.authors[0].position, 0);
        assert_eq!(record.authors[0].name, "A. First");
        assert_eq!(record.authors[1].position, 1);
        assert_eq!(record.work.canonical_id, "doi:10.1/x");
    }
}
