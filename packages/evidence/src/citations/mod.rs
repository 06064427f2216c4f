//! Citation ingestion: outbound references of an ingested page.
//!
//! Pages with a recognizable references section get CITES edges: to an
//! already-fetched page when the reference resolves by canonical id, or to a
//! pending citation candidate otherwise. Candidates never fetch themselves;
//! the user gates every chase through `queue_reference_candidates`.

use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::error::Result;
use crate::extract::metadata;
use crate::store::EvidenceStore;

/// One parsed reference entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEntry {
    /// The entry text, truncated for use as citation context.
    pub context: String,
    pub doi: Option<String>,
    pub url: Option<String>,
}

/// Result of ingesting one page's references.
#[derive(Debug, Clone, Default)]
pub struct CitationOutcome {
    pub resolved: usize,
    pub pending: usize,
}

fn reference_heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:<h\d[^>]*>)?\s*(references|bibliography|works cited|literature cited)\s*(?:</h\d>)?\s*$")
            .expect("static regex")
    })
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"'<>\])]+"#).expect("static regex"))
}

const CONTEXT_MAX_CHARS: usize = 300;

/// Whether a page body carries a recognizable references section.
pub fn has_reference_section(body: &str) -> bool {
    reference_heading_regex().is_match(body)
}

/// Parse reference entries from the text following the references heading.
/// Entries without a DOI or URL cannot be chased and are dropped.
pub fn parse_references(body: &str) -> Vec<ReferenceEntry> {
    let Some(heading) = reference_heading_regex().find(body) else {
        return Vec::new();
    };
    let tail = &body[heading.end()..];

    tail.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            // Strip markup so context reads as prose.
            let text = strip_tags(line);
            if text.is_empty() {
                return None;
            }
            let doi = metadata::doi_from_text(&text);
            let url = url_regex()
                .find(&text)
                .map(|m| m.as_str().to_string())
                // A doi.org link is already captured by the DOI.
                .filter(|u| !u.contains("doi.org/"));
            if doi.is_none() && url.is_none() {
                return None;
            }
            let context: String = text.chars().take(CONTEXT_MAX_CHARS).collect();
            Some(ReferenceEntry { context, doi, url })
        })
        .collect()
}

fn strip_tags(line: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("static regex"));
    re.replace_all(line, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Default)]
pub struct CitationIngestor;

impl CitationIngestor {
    pub fn new() -> Self {
        Self
    }

    /// Parse the stored raw body of a page and record its outbound
    /// citations. Pages without a references section produce nothing.
    pub async fn ingest_page(
        &self,
        store: &EvidenceStore,
        task_id: Uuid,
        page_id: Uuid,
    ) -> Result<CitationOutcome> {
        let page = store.get_page(page_id).await?;
        let Some(body) = store.get_blob(&page.content_hash).await? else {
            tracing::debug!(page_id = %page_id, "no stored body, skipping citations");
            return Ok(CitationOutcome::default());
        };
        let body = String::from_utf8_lossy(&body);

        let mut outcome = CitationOutcome::default();
        for entry in parse_references(&body) {
            let canonical = match (&entry.doi, &entry.url) {
                (Some(doi), _) => format!("doi:{doi}"),
                (None, Some(url)) => format!("url:{}", metadata::normalize_url(url)),
                (None, None) => continue,
            };

            if let Some(cited) = store.find_page_by_canonical(&canonical).await? {
                store
                    .insert_resolved_citation(
                        page_id,
                        cited.id,
                        Some(entry.context.clone()),
                        entry.doi.is_some(),
                    )
                    .await?;
                outcome.resolved += 1;
            } else {
                store
                    .insert_citation_candidate(
                        task_id,
                        page_id,
                        entry.url.as_deref(),
                        entry.doi.as_deref(),
                        Some(&entry.context),
                    )
                    .await?;
                outcome.pending += 1;
            }
        }

        if outcome.resolved + outcome.pending > 0 {
            tracing::info!(
                page_id = %page_id,
                resolved = outcome.resolved,
                pending = outcome.pending,
                "citations ingested"
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewPage;

    const META_ANALYSIS: &str = "\
<html><body>
<h1>A meta-analysis of X</h1>
<p>We pooled 12 trials.</p>
<h2>References</h2>
<p>1. Smith J, et al. Effects of X. J Med 2019. doi:10.1000/smith2019</p>
<p>2. Jones K. X in practice. https://example.org/jones-x-in-practice</p>
<p>3. An entry with no link at all, 2003.</p>
</body></html>";

    #[test]
    fn reference_sections_are_detected() {
        assert!(has_reference_section("text\nReferences\nmore"));
        assert!(has_reference_section("<h2>References</h2>"));
        assert!(!has_reference_section("no refs here"));
    }

    #[test]
    fn entries_parse_dois_and_urls() {
        let entries = parse_references(META_ANALYSIS);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].doi.as_deref(), Some("10.1000/smith2019"));
        assert!(entries[0].context.contains("Smith J"));
        assert_eq!(
            entries[1].url.as_deref(),
            Some("https://example.org/jones-x-in-practice")
        );
    }

    async fn stored_page(store: &EvidenceStore, canonical: &str, body: &str) -> Uuid {
        let hash = format!("hash-{canonical}");
        store.put_blob(&hash, body.as_bytes()).await.unwrap();
        store
            .upsert_page(&NewPage {
                url: format!("https://example.com/{canonical}"),
                canonical_id: canonical.to_string(),
                domain: "example.com".to_string(),
                title: None,
                content_hash: hash,
                work_id: None,
            })
            .await
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn unresolved_references_become_candidates() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        let page_id = stored_page(&store, "doi:10.1/meta", META_ANALYSIS).await;

        let outcome = CitationIngestor::new()
            .ingest_page(&store, task.id, page_id)
            .await
            .unwrap();
        assert_eq!(outcome.resolved, 0);
        assert_eq!(outcome.pending, 2);

        let pending = store.pending_candidates(task.id, 10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().any(|c| c.candidate_doi.as_deref() == Some("10.1000/smith2019")));
    }

    #[tokio::test]
    async fn known_canonical_ids_resolve_to_page_edges() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        // The cited work is already in the graph.
        let cited = stored_page(&store, "doi:10.1000/smith2019", "<html><body><p>x</p></body></html>").await;
        let citing = stored_page(&store, "doi:10.1/meta", META_ANALYSIS).await;

        let outcome = CitationIngestor::new()
            .ingest_page(&store, task.id, citing)
            .await
            .unwrap();
        assert_eq!(outcome.resolved, 1);
        assert_eq!(outcome.pending, 1);

        let rows = store
            .query_sql(
                "SELECT target_id FROM edges WHERE relation = 'cites' AND target_kind = 'page'",
                10,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["target_id"].as_str().unwrap(), cited.to_string());
    }

    #[tokio::test]
    async fn pages_without_references_produce_nothing() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        let page_id = stored_page(
            &store,
            "url:https://example.com/blog",
            "<html><body><p>Just a blog post.</p></body></html>",
        )
        .await;
        let outcome = CitationIngestor::new()
            .ingest_page(&store, task.id, page_id)
            .await
            .unwrap();
        assert_eq!(outcome.resolved + outcome.pending, 0);
    }
}
