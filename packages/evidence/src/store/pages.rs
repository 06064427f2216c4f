//! Page and fragment persistence, plus the per-page extraction write-through.

use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::EvidenceStore;
use crate::error::{Error, Result};
use crate::types::{Fragment, FragmentDraft, NewPage, Page, WorkRecord};

/// A claim emitted by the extraction model, anchored to one of the page's
/// fragments by index.
#[derive(Debug, Clone)]
pub struct ClaimDraft {
    pub text: String,
    pub origin_fragment_index: usize,
}

/// Everything the extractor wants committed for one page, atomically.
#[derive(Debug, Clone)]
pub struct ExtractionWrite {
    pub page: NewPage,
    pub fragments: Vec<FragmentDraft>,
    pub claims: Vec<ClaimDraft>,
    pub work: Option<WorkRecord>,
    /// Raw body for the content-addressed blob store.
    pub body: Option<Vec<u8>>,
}

/// Result of a committed extraction.
#[derive(Debug, Clone, Default)]
pub struct ExtractionCommit {
    pub page_id: Uuid,
    /// False when `(canonical_id, content_hash)` already existed; nothing
    /// was rewritten in that case.
    pub page_was_new: bool,
    pub fragment_ids: Vec<Uuid>,
    /// Claims inserted for the first time; each needs verification.
    pub new_claim_ids: Vec<Uuid>,
    /// Existing claims that gained a new ORIGIN edge; their NLI edges from
    /// the now-dependent source were invalidated and they need re-running.
    pub reverify_claim_ids: Vec<Uuid>,
}

impl EvidenceStore {
    /// Idempotent page insert keyed on `(canonical_id, content_hash)`.
    /// Returns `(page_id, was_new)`.
    pub async fn upsert_page(&self, page: &NewPage) -> Result<(Uuid, bool)> {
        let mut tx = self.pool().begin().await?;
        let result = upsert_page_in(&mut tx, page, false, None).await?;
        tx.commit().await?;
        Ok(result)
    }

    pub async fn get_page(&self, page_id: Uuid) -> Result<Page> {
        sqlx::query_as::<_, Page>(
            r#"
            SELECT id, url, canonical_id, domain, title, fetched_at, content_hash, work_id,
                   fetch_failed, failure_reason
            FROM pages WHERE id = ?
            "#,
        )
        .bind(page_id.to_string())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("page {page_id}")))
    }

    /// Most recent page for a canonical id, ignoring failed fetches.
    pub async fn find_page_by_canonical(&self, canonical_id: &str) -> Result<Option<Page>> {
        let page = sqlx::query_as::<_, Page>(
            r#"
            SELECT id, url, canonical_id, domain, title, fetched_at, content_hash, work_id,
                   fetch_failed, failure_reason
            FROM pages WHERE canonical_id = ? AND fetch_failed = 0
            ORDER BY fetched_at DESC LIMIT 1
            "#,
        )
        .bind(canonical_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(page)
    }

    /// Record a page whose extraction failed terminally, so the fetch is
    /// not retried uselessly. No fragments or claims are produced.
    pub async fn mark_page_failed(&self, page: &NewPage, reason: &str) -> Result<Uuid> {
        let mut tx = self.pool().begin().await?;
        let (id, _) = upsert_page_in(&mut tx, page, true, Some(reason)).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// All-or-nothing fragment insertion for one page.
    pub async fn insert_fragments(
        &self,
        page_id: Uuid,
        drafts: &[FragmentDraft],
    ) -> Result<Vec<Uuid>> {
        let mut tx = self.pool().begin().await?;
        let ids = insert_fragments_in(&mut tx, page_id, drafts).await?;
        tx.commit().await?;
        Ok(ids)
    }

    pub async fn get_fragment(&self, fragment_id: Uuid) -> Result<Fragment> {
        sqlx::query_as::<_, Fragment>(
            "SELECT id, page_id, heading_context, text, position FROM fragments WHERE id = ?",
        )
        .bind(fragment_id.to_string())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("fragment {fragment_id}")))
    }

    pub async fn fragments_for_page(&self, page_id: Uuid) -> Result<Vec<Fragment>> {
        let rows = sqlx::query_as::<_, Fragment>(
            r#"
            SELECT id, page_id, heading_context, text, position
            FROM fragments WHERE page_id = ? ORDER BY position
            "#,
        )
        .bind(page_id.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Commit one page's extraction output in a single transaction: page,
    /// fragments, claims with ORIGIN edges, bibliographic work.
    ///
    /// Claim semantics: claims are deduplicated within the task by
    /// normalized text. A duplicate gains an additional ORIGIN edge, and any
    /// of its NLI edges whose source page now shares a canonical id with the
    /// new origin are deleted (the independence invariant would otherwise be
    /// silently violated); such claims are reported for re-verification.
    pub async fn commit_extraction(
        &self,
        task_id: Uuid,
        write: &ExtractionWrite,
    ) -> Result<ExtractionCommit> {
        // Blob outside the transaction: content-addressed, so a replay
        // after a mid-commit failure converges to the same row.
        if let Some(body) = &write.body {
            self.put_blob(&write.page.content_hash, body).await?;
        }

        let mut tx = self.pool().begin().await?;

        let (page_id, page_was_new) = upsert_page_in(&mut tx, &write.page, false, None).await?;
        if !page_was_new {
            // Byte-identical re-fetch: nothing new to write.
            tx.commit().await?;
            return Ok(ExtractionCommit {
                page_id,
                page_was_new: false,
                ..Default::default()
            });
        }

        if let Some(work) = &write.work {
            upsert_work_in(&mut tx, work).await?;
        }

        let fragment_ids = insert_fragments_in(&mut tx, page_id, &write.fragments).await?;

        let mut commit = ExtractionCommit {
            page_id,
            page_was_new: true,
            fragment_ids,
            ..Default::default()
        };

        for claim in &write.claims {
            let Some(&fragment_id) = commit.fragment_ids.get(claim.origin_fragment_index) else {
                // The model cited a fragment that does not exist; the claim
                // has no anchor and is discarded.
                tracing::warn!(
                    page_id = %page_id,
                    index = claim.origin_fragment_index,
                    "discarding claim with dangling fragment anchor"
                );
                continue;
            };
            let inserted =
                super::claims::insert_claim_in(&mut tx, task_id, &claim.text, fragment_id).await?;
            if inserted.created {
                commit.new_claim_ids.push(inserted.claim_id);
            } else if inserted.invalidated_edges > 0 {
                commit.reverify_claim_ids.push(inserted.claim_id);
            }
        }

        tx.commit().await?;
        Ok(commit)
    }

    /// Upsert a bibliographic work and its ordered authors.
    pub async fn upsert_work(&self, record: &WorkRecord) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        upsert_work_in(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Domain of the page a fragment belongs to.
    pub async fn fragment_domain(&self, fragment_id: Uuid) -> Result<String> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.domain FROM fragments f
            JOIN pages p ON p.id = f.page_id
            WHERE f.id = ?
            "#,
        )
        .bind(fragment_id.to_string())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::NotFound(format!("fragment {fragment_id}")))
    }

    /// Distinct domains of the pages behind a claim's ORIGIN fragments.
    pub async fn origin_domains(&self, claim_id: Uuid) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT p.domain
            FROM edges e
            JOIN fragments f ON f.id = e.source_id AND e.source_kind = 'fragment'
            JOIN pages p ON p.id = f.page_id
            WHERE e.relation = 'origin' AND e.target_kind = 'claim' AND e.target_id = ?
            "#,
        )
        .bind(claim_id.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Distinct canonical ids of the pages behind a claim's ORIGIN fragments.
    pub async fn origin_canonical_ids(&self, claim_id: Uuid) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT p.canonical_id
            FROM edges e
            JOIN fragments f ON f.id = e.source_id AND e.source_kind = 'fragment'
            JOIN pages p ON p.id = f.page_id
            WHERE e.relation = 'origin' AND e.target_kind = 'claim' AND e.target_id = ?
            "#,
        )
        .bind(claim_id.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}

async fn upsert_page_in(
    conn: &mut SqliteConnection,
    page: &NewPage,
    failed: bool,
    failure_reason: Option<&str>,
) -> Result<(Uuid, bool)> {
    if let Some(existing) = find_page_id_in(conn, &page.canonical_id, &page.content_hash).await? {
        return Ok((existing, false));
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO pages (id, url, canonical_id, domain, title, fetched_at, content_hash,
                           work_id, fetch_failed, failure_reason)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (canonical_id, content_hash) DO NOTHING
        "#,
    )
    .bind(id.to_string())
    .bind(&page.url)
    .bind(&page.canonical_id)
    .bind(&page.domain)
    .bind(&page.title)
    .bind(Utc::now())
    .bind(&page.content_hash)
    .bind(&page.work_id)
    .bind(failed)
    .bind(failure_reason)
    .execute(&mut *conn)
    .await?;

    // A concurrent writer may have won the conflict race.
    let final_id = find_page_id_in(conn, &page.canonical_id, &page.content_hash)
        .await?
        .ok_or_else(|| Error::ConstraintViolation("page vanished after upsert".into()))?;
    Ok((final_id, final_id == id))
}

async fn find_page_id_in(
    conn: &mut SqliteConnection,
    canonical_id: &str,
    content_hash: &str,
) -> Result<Option<Uuid>> {
    let id = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM pages WHERE canonical_id = ? AND content_hash = ?",
    )
    .bind(canonical_id)
    .bind(content_hash)
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

async fn insert_fragments_in(
    conn: &mut SqliteConnection,
    page_id: Uuid,
    drafts: &[FragmentDraft],
) -> Result<Vec<Uuid>> {
    let mut ids = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO fragments (id, page_id, heading_context, text, position)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(page_id.to_string())
        .bind(&draft.heading_context)
        .bind(&draft.text)
        .bind(draft.position)
        .execute(&mut *conn)
        .await?;
        ids.push(id);
    }
    Ok(ids)
}

async fn upsert_work_in(conn: &mut SqliteConnection, record: &WorkRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO works (canonical_id, doi, year, venue) VALUES (?, ?, ?, ?)
        ON CONFLICT (canonical_id) DO UPDATE SET
            doi = COALESCE(excluded.doi, works.doi),
            year = COALESCE(excluded.year, works.year),
            venue = COALESCE(excluded.venue, works.venue)
        "#,
    )
    .bind(&record.work.canonical_id)
    .bind(&record.work.doi)
    .bind(record.work.year)
    .bind(&record.work.venue)
    .execute(&mut *conn)
    .await?;

    for author in &record.authors {
        sqlx::query(
            r#"
            INSERT INTO work_authors (work_id, position, name, orcid) VALUES (?, ?, ?, ?)
            ON CONFLICT (work_id, position) DO UPDATE SET
                name = excluded.name,
                orcid = COALESCE(excluded.orcid, work_authors.orcid)
            "#,
        )
        .bind(&record.work.canonical_id)
        .bind(author.position)
        .bind(&author.name)
        .bind(&author.orcid)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FRAGMENT_MAX_CHARS;

    fn sample_page(canonical: &str, hash: &str) -> NewPage {
        NewPage {
            url: format!("https://example.com/{canonical}"),
            canonical_id: canonical.to_string(),
            domain: "example.com".to_string(),
            title: Some("Sample".to_string()),
            content_hash: hash.to_string(),
            work_id: None,
        }
    }

    #[tokio::test]
    async fn upsert_page_is_idempotent_on_identity() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let page = sample_page("doi:10.1/x", "h1");
        let (id1, new1) = store.upsert_page(&page).await.unwrap();
        let (id2, new2) = store.upsert_page(&page).await.unwrap();
        assert!(new1);
        assert!(!new2);
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn changed_body_produces_a_new_page() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let (id1, _) = store.upsert_page(&sample_page("doi:10.1/x", "h1")).await.unwrap();
        let (id2, new2) = store.upsert_page(&sample_page("doi:10.1/x", "h2")).await.unwrap();
        assert!(new2);
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn failed_pages_keep_their_marker() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let page = sample_page("url:https://example.com/broken", "h1");
        let id = store.mark_page_failed(&page, "model returned nothing").await.unwrap();
        let loaded = store.get_page(id).await.unwrap();
        assert!(loaded.fetch_failed);
        assert_eq!(loaded.failure_reason.as_deref(), Some("model returned nothing"));
        assert!(store
            .find_page_by_canonical("url:https://example.com/broken")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn commit_extraction_writes_the_whole_page() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();

        let write = ExtractionWrite {
            page: sample_page("doi:10.1/meta", "h1"),
            fragments: vec![
                FragmentDraft::new(Some("Results".into()), "X reduced Y by 0.5 in trials.", 0),
                FragmentDraft::new(None, "Unrelated methods text.", 1),
            ],
            claims: vec![ClaimDraft {
                text: "X reduces Y by 0.5".into(),
                origin_fragment_index: 0,
            }],
            work: None,
            body: Some(b"<html>raw</html>".to_vec()),
        };

        let commit = store.commit_extraction(task.id, &write).await.unwrap();
        assert!(commit.page_was_new);
        assert_eq!(commit.fragment_ids.len(), 2);
        assert_eq!(commit.new_claim_ids.len(), 1);

        let frags = store.fragments_for_page(commit.page_id).await.unwrap();
        assert_eq!(frags.len(), 2);
        assert!(frags.iter().all(|f| f.text.len() <= FRAGMENT_MAX_CHARS));

        let origins = store.origin_canonical_ids(commit.new_claim_ids[0]).await.unwrap();
        assert_eq!(origins, vec!["doi:10.1/meta".to_string()]);

        // Byte-identical re-commit is a no-op.
        let again = store.commit_extraction(task.id, &write).await.unwrap();
        assert!(!again.page_was_new);
        assert!(again.new_claim_ids.is_empty());
    }

    #[tokio::test]
    async fn dangling_fragment_anchor_discards_the_claim() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        let write = ExtractionWrite {
            page: sample_page("url:https://example.com/a", "h1"),
            fragments: vec![FragmentDraft::new(None, "Some text.", 0)],
            claims: vec![ClaimDraft {
                text: "Unanchored claim".into(),
                origin_fragment_index: 9,
            }],
            work: None,
            body: None,
        };
        let commit = store.commit_extraction(task.id, &write).await.unwrap();
        assert!(commit.new_claim_ids.is_empty());
    }

    #[tokio::test]
    async fn works_and_authors_upsert_in_order() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let record = WorkRecord {
            work: crate::types::Work {
                canonical_id: "doi:10.1/w".into(),
                doi: Some("10.1/w".into()),
                year: Some(2021),
                venue: Some("J. Evidence".into()),
            },
            authors: vec![
                crate::types::Author {
                    work_id: "doi:10.1/w".into(),
                    position: 0,
                    name: "A. First".into(),
                    orcid: None,
                },
                crate::types::Author {
                    work_id: "doi:10.1/w".into(),
                    position: 1,
                    name: "B. Second".into(),
                    orcid: Some("0000-0001-2345-6789".into()),
                },
            ],
            abstract_text: None,
            title: None,
        };
        store.upsert_work(&record).await.unwrap();
        store.upsert_work(&record).await.unwrap();

        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM work_authors WHERE work_id = ? ORDER BY position",
        )
        .bind("doi:10.1/w")
        .fetch_all(store.pool())
        .await
        .unwrap();
        assert_eq!(names, vec!["A. First".to_string(), "B. Second".to_string()]);
    }
}
