//! Identifier extraction and canonical-id normalization.
//!
//! Canonical ids carry a scheme prefix: `doi:`, `pmid:`, `pmcid:`, or
//! `url:` for pages with no registry identifier.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

fn doi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"10\.\d{1,9}/[-._;()/:A-Za-z0-9]+").expect("static regex")
    })
}

fn pmid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:pubmed\.ncbi\.nlm\.nih\.gov/|pmid[:\s]+)(\d{4,9})").expect("static regex")
    })
}

fn pmcid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"PMC\d{4,9}").expect("static regex"))
}

/// Trim punctuation a DOI match tends to drag in from prose.
fn clean_doi(doi: &str) -> String {
    doi.trim_end_matches(['.', ',', ';', ')', ']']).to_string()
}

/// DOI embedded in a URL (doi.org links or a /10.xxxx/ path segment).
pub fn doi_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let looks_doi_host = host == "doi.org" || host.ends_with(".doi.org");
    let candidate = doi_regex().find(url)?;
    if looks_doi_host || url.contains(&format!("/{}", candidate.as_str())) {
        Some(clean_doi(candidate.as_str()))
    } else {
        None
    }
}

/// PMID from a PubMed URL or an explicit `PMID:` marker.
pub fn pmid_from_text(text: &str) -> Option<String> {
    pmid_regex()
        .captures(text)
        .map(|c| c[1].to_string())
}

/// First DOI anywhere in free text or markup.
pub fn doi_from_text(text: &str) -> Option<String> {
    doi_regex().find(text).map(|m| clean_doi(m.as_str()))
}

pub fn pmcid_from_text(text: &str) -> Option<String> {
    pmcid_regex().find(text).map(|m| m.as_str().to_string())
}

/// All canonical identifiers visible in a string, scheme-prefixed.
pub fn harvest_identifiers(text: &str) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(doi) = doi_from_url(text).or_else(|| {
        // Outside a URL context, only doi.org-style text mentions count;
        // a bare 10.x/ pattern in prose is too noisy.
        if text.contains("doi.org/") || text.to_lowercase().contains("doi:") {
            doi_from_text(text)
        } else {
            None
        }
    }) {
        ids.push(format!("doi:{doi}"));
    }
    if let Some(pmid) = pmid_from_text(text) {
        ids.push(format!("pmid:{pmid}"));
    }
    if let Some(pmcid) = pmcid_from_text(text) {
        ids.push(format!("pmcid:{pmcid}"));
    }
    ids
}

/// Normalize a URL for identity: lowercase scheme and host, strip the
/// fragment, tracking params, and any trailing slash.
pub fn normalize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.trim().to_string();
    };
    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && k != "fbclid" && k != "gclid" && k != "ref")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    let mut out = parsed.to_string();
    if out.ends_with('/') && parsed.path() == "/" {
        out.pop();
    }
    out
}

/// Resolve the canonical id for a page: registry identifiers beat URLs.
/// `body` is consulted for identifiers the URL does not carry.
pub fn canonical_id(url: &str, body: Option<&str>) -> String {
    if let Some(doi) = doi_from_url(url) {
        return format!("doi:{doi}");
    }
    if let Some(pmid) = pmid_from_text(url) {
        return format!("pmid:{pmid}");
    }
    if let Some(body) = body {
        // Only the head of the document; identifiers in a references
        // section belong to the cited works, not this page.
        let head: String = body.chars().take(2000).collect();
        if let Some(doi) = doi_from_text(&head) {
            return format!("doi:{doi}");
        }
        if let Some(pmcid) = pmcid_from_text(&head) {
            return format!("pmcid:{pmcid}");
        }
    }
    format!("url:{}", normalize_url(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doi_org_urls_yield_their_doi() {
        assert_eq!(
            doi_from_url("https://doi.org/10.1000/xyz123").as_deref(),
            Some("10.1000/xyz123")
        );
        assert_eq!(
            doi_from_url("https://dx.doi.org/10.1234/abc.def").as_deref(),
            Some("10.1234/abc.def")
        );
    }

    #[test]
    fn publisher_urls_with_doi_paths_yield_their_doi() {
        assert_eq!(
            doi_from_url("https://journals.example.com/article/10.5555/weird-id9").as_deref(),
            Some("10.5555/weird-id9")
        );
    }

    #[test]
    fn plain_urls_yield_no_doi() {
        assert!(doi_from_url("https://example.com/a-story-about-10-things").is_none());
    }

    #[test]
    fn pmids_parse_from_pubmed_urls() {
        assert_eq!(
            pmid_from_text("https://pubmed.ncbi.nlm.nih.gov/12345678/").as_deref(),
            Some("12345678")
        );
        assert_eq!(
            pmid_from_text("see PMID: 87654321 for the trial").as_deref(),
            Some("87654321")
        );
    }

    #[test]
    fn url_normalization_strips_tracking_noise() {
        assert_eq!(
            normalize_url("https://Example.com/Path?utm_source=x&id=3#section"),
            "https://example.com/Path?id=3"
        );
        assert_eq!(normalize_url("https://example.com/"), "https://example.com");
    }

    #[test]
    fn canonical_id_prefers_registry_identifiers() {
        assert_eq!(
            canonical_id("https://doi.org/10.1/x", None),
            "doi:10.1/x"
        );
        assert_eq!(
            canonical_id("https://pubmed.ncbi.nlm.nih.gov/12345678/", None),
            "pmid:12345678"
        );
        assert_eq!(
            canonical_id(
                "https://example.com/paper",
                Some("<meta name=\"citation_doi\" content=\"10.99/body-doi\">")
            ),
            "doi:10.99/body-doi"
        );
        assert_eq!(
            canonical_id("https://example.com/blog?utm_source=x", Some("plain text")),
            "url:https://example.com/blog"
        );
    }

    #[test]
    fn trailing_prose_punctuation_is_trimmed_from_dois() {
        assert_eq!(
            doi_from_text("as shown (doi:10.1000/xyz123)."),
            Some("10.1000/xyz123".to_string())
        );
    }
}
