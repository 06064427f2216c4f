//! Page extraction: cleaned content, fragments, metadata, claims.
//!
//! One fetched document in, one atomic store commit out. The extractor
//! never talks to the network except through the ML sidecar traits and the
//! academic lookup used for metadata enrichment.

pub mod content;
pub mod fragment;
pub mod metadata;

pub use content::{extract_content, extract_title, Section};
pub use fragment::fragment_sections;

use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::fetch::{AcademicLookup, FetchedDocument};
use crate::ml::{ClaimModel, EmbeddingModel};
use crate::store::{ClaimDraft, EvidenceStore, ExtractionWrite, VectorTarget};
use crate::types::{FragmentDraft, NewPage, WorkRecord};

/// Result of extracting one document.
#[derive(Debug, Clone, Default)]
pub struct ExtractOutcome {
    pub page_id: Uuid,
    pub page_was_new: bool,
    /// Claims inserted for the first time; each needs a verification job.
    pub new_claim_ids: Vec<Uuid>,
    /// Existing claims whose ORIGIN set grew; verification must re-run.
    pub reverify_claim_ids: Vec<Uuid>,
}

pub struct Extractor {
    claims: Arc<dyn ClaimModel>,
    embedder: Arc<dyn EmbeddingModel>,
    academic: Option<Arc<dyn AcademicLookup>>,
}

impl Extractor {
    pub fn new(
        claims: Arc<dyn ClaimModel>,
        embedder: Arc<dyn EmbeddingModel>,
        academic: Option<Arc<dyn AcademicLookup>>,
    ) -> Self {
        Self {
            claims,
            embedder,
            academic,
        }
    }

    /// Extract a fetched HTML (or plain-text) document and commit it.
    pub async fn extract_document(
        &self,
        store: &EvidenceStore,
        task_id: Uuid,
        doc: &FetchedDocument,
    ) -> Result<ExtractOutcome> {
        let task = store.get_task(task_id).await?;
        let domain = crate::fetch::FetchPool::domain_of(&doc.url)?;
        store.ensure_domain(&domain).await?;

        let content_hash = hex_sha256(doc.body.as_bytes());
        let canonical = metadata::canonical_id(&doc.url, Some(&doc.body));
        let title = doc
            .title
            .clone()
            .or_else(|| extract_title(&doc.body));

        let sections = if doc.body.contains('<') {
            extract_content(&doc.body)
        } else {
            vec![Section::plain(doc.body.clone())]
        };
        let fragments = fragment_sections(&sections);

        let page = NewPage {
            url: doc.url.clone(),
            canonical_id: canonical.clone(),
            domain,
            title,
            content_hash,
            work_id: None,
        };

        if fragments.is_empty() {
            store.mark_page_failed(&page, "no extractable content").await?;
            return Err(Error::ExtractionFailed(format!(
                "no extractable content in {}",
                doc.url
            )));
        }

        // Metadata enrichment: a DOI-bearing page gets its bibliographic
        // record from the academic API when one is configured.
        let mut page = page;
        let mut work = None;
        if let Some(academic) = &self.academic {
            if let Some(doi) = canonical.strip_prefix("doi:") {
                if let Some(record) = academic.by_doi(doi).await? {
                    page.work_id = Some(record.work.canonical_id.clone());
                    work = Some(record);
                }
            }
        }

        let raw_claims = self
            .claims
            .extract_claims(&task.hypothesis, &fragments)
            .await?;

        self.commit(
            store,
            task_id,
            page,
            fragments,
            raw_claims
                .into_iter()
                .map(|c| ClaimDraft {
                    text: c.text,
                    origin_fragment_index: c.fragment_index,
                })
                .collect(),
            work,
            Some(doc.body.clone().into_bytes()),
        )
        .await
    }

    /// Extract the abstract-only fast path: an academic work record stands
    /// in for a rendered page.
    pub async fn extract_work(
        &self,
        store: &EvidenceStore,
        task_id: Uuid,
        record: &WorkRecord,
    ) -> Result<ExtractOutcome> {
        let task = store.get_task(task_id).await?;
        let canonical = record.work.canonical_id.clone();
        let url = match &record.work.doi {
            Some(doi) => format!("https://doi.org/{doi}"),
            None => format!(
                "https://pubmed.ncbi.nlm.nih.gov/{}/",
                canonical.trim_start_matches("pmid:")
            ),
        };
        let domain = crate::fetch::FetchPool::domain_of(&url)?;
        store.ensure_domain(&domain).await?;

        let body = match &record.abstract_text {
            Some(text) if !text.trim().is_empty() => text.clone(),
            _ => {
                let page = NewPage {
                    url,
                    canonical_id: canonical,
                    domain,
                    title: record.title.clone(),
                    content_hash: hex_sha256(b""),
                    work_id: Some(record.work.canonical_id.clone()),
                };
                store.mark_page_failed(&page, "no abstract available").await?;
                return Err(Error::ExtractionFailed(
                    "work record has no abstract".into(),
                ));
            }
        };

        let fragments = fragment_sections(&[Section {
            heading: record.title.clone(),
            text: body.clone(),
        }]);
        let raw_claims = self
            .claims
            .extract_claims(&task.hypothesis, &fragments)
            .await?;

        let page = NewPage {
            url,
            canonical_id: canonical,
            domain,
            title: record.title.clone(),
            content_hash: hex_sha256(body.as_bytes()),
            work_id: Some(record.work.canonical_id.clone()),
        };

        self.commit(
            store,
            task_id,
            page,
            fragments,
            raw_claims
                .into_iter()
                .map(|c| ClaimDraft {
                    text: c.text,
                    origin_fragment_index: c.fragment_index,
                })
                .collect(),
            Some(record.clone()),
            Some(body.into_bytes()),
        )
        .await
    }

    async fn commit(
        &self,
        store: &EvidenceStore,
        task_id: Uuid,
        page: NewPage,
        fragments: Vec<FragmentDraft>,
        claims: Vec<ClaimDraft>,
        work: Option<WorkRecord>,
        body: Option<Vec<u8>>,
    ) -> Result<ExtractOutcome> {
        let write = ExtractionWrite {
            page,
            fragments,
            claims,
            work,
            body,
        };
        let commit = store.commit_extraction(task_id, &write).await?;

        if commit.page_was_new {
            self.embed_fragments(store, &write, &commit.fragment_ids).await?;
            self.embed_claims(store, task_id, &commit.new_claim_ids).await?;
        }

        tracing::info!(
            task_id = %task_id,
            page_id = %commit.page_id,
            fragments = commit.fragment_ids.len(),
            new_claims = commit.new_claim_ids.len(),
            "page extracted"
        );

        Ok(ExtractOutcome {
            page_id: commit.page_id,
            page_was_new: commit.page_was_new,
            new_claim_ids: commit.new_claim_ids,
            reverify_claim_ids: commit.reverify_claim_ids,
        })
    }

    async fn embed_fragments(
        &self,
        store: &EvidenceStore,
        write: &ExtractionWrite,
        fragment_ids: &[Uuid],
    ) -> Result<()> {
        if fragment_ids.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = write.fragments.iter().map(|f| f.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        for (id, vector) in fragment_ids.iter().zip(&vectors) {
            store
                .put_embedding(VectorTarget::Fragments, *id, None, vector)
                .await?;
        }
        Ok(())
    }

    async fn embed_claims(
        &self,
        store: &EvidenceStore,
        task_id: Uuid,
        claim_ids: &[Uuid],
    ) -> Result<()> {
        for claim_id in claim_ids {
            let claim = store.get_claim(*claim_id).await?;
            let vector = self.embedder.embed(&claim.text).await?;
            store
                .put_embedding(VectorTarget::Claims, *claim_id, Some(task_id), &vector)
                .await?;
        }
        Ok(())
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
