//! Job scheduling: phase transitions, milestones, budget, cancellation.
//!
//! The scheduler is the runtime heart. It turns user targets into
//! exploration jobs, extraction results into verification and citation
//! jobs, and candidate selections into chase fetches. Each job is an effect
//! `(Store, Payload) -> (Store', [NewJobs])` executed by a worker; the
//! scheduler itself never blocks on user input.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lyra_evidence::citations::CitationIngestor;
use lyra_evidence::error::{Error, Result};
use lyra_evidence::extract::Extractor;
use lyra_evidence::fetch::{AcademicLookup, FetchPool, WebSearcher};
use lyra_evidence::store::EvidenceStore;
use lyra_evidence::types::{
    JobPayload, JobPhase, JobRecord, JobState, RuntimeConfig, Target, TargetReason, TrustLevel,
};
use lyra_evidence::verify::NliVerifier;

use super::jobs::queue::{JobQueue, NewJob};
use super::jobs::worker::{JobHandler, TaskCancellations};

/// Hits taken from one SERP before the rest are dropped.
const MAX_SERP_HITS: usize = 8;

// ============================================================================
// Status report types
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PhaseCounters {
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Milestones {
    /// No exploration job queued or running.
    pub target_queue_drained: bool,
    /// No verification job in flight and every live claim has had NLI
    /// selection run at least once.
    pub nli_verification_done: bool,
    /// Targets drained, citations parsed, and no pending auth blocks.
    pub citation_chase_ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitingFor {
    pub kind: String,
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub job_id: Uuid,
    pub kind: String,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMetrics {
    pub query: String,
    /// Claims yielded per fetched page for this query.
    pub harvest_rate: f64,
    /// Mean confidence across the task's live claims.
    pub satisfaction_score: f64,
    /// Whether any origin domain in the task carries PRIMARY trust.
    pub has_primary_source: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusReport {
    pub task_id: Uuid,
    pub status: lyra_evidence::types::TaskStatus,
    pub budget_remaining_percent: i64,
    pub exploration: PhaseCounters,
    pub verification: PhaseCounters,
    pub citation: PhaseCounters,
    pub milestones: Milestones,
    pub waiting_for: Vec<WaitingFor>,
    pub pending_auth: Vec<String>,
    pub total_claims: i64,
    pub failures: Vec<JobFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queries: Option<Vec<QueryMetrics>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDetail {
    Summary,
    Full,
}

/// Selection for `queue_reference_candidates`: include and exclude are
/// mutually exclusive.
#[derive(Debug, Clone, Default)]
pub struct CandidateSelection {
    pub include_ids: Option<Vec<Uuid>>,
    pub exclude_ids: Option<Vec<Uuid>>,
    pub limit: Option<i64>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidatePreview {
    pub citation_edge_id: Uuid,
    pub candidate_url: Option<String>,
    pub candidate_doi: Option<String>,
    pub citation_context: Option<String>,
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct Scheduler {
    store: EvidenceStore,
    queue: JobQueue,
    fetch: FetchPool,
    searcher: Arc<dyn WebSearcher>,
    academic: Arc<dyn AcademicLookup>,
    extractor: Extractor,
    verifier: NliVerifier,
    citations: CitationIngestor,
    cancellations: Arc<TaskCancellations>,
    notify: Arc<Notify>,
    config: RuntimeConfig,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: EvidenceStore,
        queue: JobQueue,
        fetch: FetchPool,
        searcher: Arc<dyn WebSearcher>,
        academic: Arc<dyn AcademicLookup>,
        extractor: Extractor,
        verifier: NliVerifier,
        cancellations: Arc<TaskCancellations>,
        config: RuntimeConfig,
    ) -> Self {
        let notify = queue.notify();
        Self {
            store,
            queue,
            fetch,
            searcher,
            academic,
            extractor,
            verifier,
            citations: CitationIngestor::new(),
            cancellations,
            notify,
            config,
        }
    }

    pub fn store(&self) -> &EvidenceStore {
        &self.store
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Task lifecycle
    // ------------------------------------------------------------------

    pub async fn create_task(&self, hypothesis: &str) -> Result<lyra_evidence::types::Task> {
        self.store
            .create_task(hypothesis, self.config.task.default_budget)
            .await
    }

    /// Turn user targets into exploration jobs. Rejected wholesale when the
    /// task is stopped or any target is malformed.
    pub async fn queue_targets(&self, task_id: Uuid, targets: &[Target]) -> Result<usize> {
        self.store.get_active_task(task_id).await?;
        for target in targets {
            target
                .validate()
                .map_err(Error::InvalidArgument)?;
        }

        let mut accepted = 0;
        for target in targets {
            let payload = match target {
                Target::Query { query } => JobPayload::SerpFetch {
                    query: query.clone(),
                },
                Target::Url { url, reason } => JobPayload::UrlFetch {
                    url: url.clone(),
                    reason: *reason,
                    query: None,
                },
                Target::Doi { doi, reason } => JobPayload::DoiFetch {
                    doi: doi.trim_start_matches("doi:").to_string(),
                    reason: *reason,
                    query: None,
                },
            };
            let result = self
                .queue
                .enqueue(NewJob::new(
                    task_id,
                    payload,
                    self.config.fetch.max_attempts,
                ))
                .await?;
            if result.is_created() {
                accepted += 1;
            }
        }
        tracing::info!(task_id = %task_id, accepted, "targets queued");
        Ok(accepted)
    }

    /// Idempotent stop: queued jobs are discarded, running jobs observe
    /// their cancellation token; committed writes are retained.
    pub async fn stop_task(&self, task_id: Uuid) -> Result<lyra_evidence::types::Task> {
        let task = self.store.stop_task(task_id).await?;
        let discarded = self.queue.discard_queued(task_id).await?;
        self.cancellations.cancel_task(task_id).await;
        tracing::info!(task_id = %task_id, discarded, "task stopped");
        Ok(task)
    }

    // ------------------------------------------------------------------
    // Citation chase
    // ------------------------------------------------------------------

    /// Materialize selected citation candidates into exploration jobs.
    pub async fn queue_reference_candidates(
        &self,
        task_id: Uuid,
        selection: CandidateSelection,
    ) -> Result<(usize, Option<Vec<CandidatePreview>>)> {
        self.store.get_active_task(task_id).await?;
        if selection.include_ids.is_some() && selection.exclude_ids.is_some() {
            return Err(Error::InvalidArgument(
                "include_ids and exclude_ids are mutually exclusive".into(),
            ));
        }

        let limit = selection.limit.unwrap_or(50);
        let selected = match (&selection.include_ids, &selection.exclude_ids) {
            (Some(include), _) => {
                let mut out = Vec::with_capacity(include.len());
                for id in include {
                    let candidate = self.store.get_candidate(*id).await?;
                    if candidate.task_id != task_id {
                        return Err(Error::NotFound(format!("citation candidate {id}")));
                    }
                    if !candidate.queued {
                        out.push(candidate);
                    }
                }
                out
            }
            (None, Some(exclude)) => self
                .store
                .pending_candidates(task_id, limit)
                .await?
                .into_iter()
                .filter(|c| !exclude.contains(&c.edge_id))
                .collect(),
            (None, None) => self.store.pending_candidates(task_id, limit).await?,
        };

        if selection.dry_run {
            let preview = selected
                .iter()
                .map(|c| CandidatePreview {
                    citation_edge_id: c.edge_id,
                    candidate_url: c.candidate_url.clone(),
                    candidate_doi: c.candidate_doi.clone(),
                    citation_context: c.citation_context.clone(),
                })
                .collect();
            return Ok((0, Some(preview)));
        }

        let mut accepted = 0;
        for candidate in selected {
            if !self.store.mark_candidate_queued(candidate.edge_id).await? {
                continue;
            }
            let payload = match (&candidate.candidate_doi, &candidate.candidate_url) {
                (Some(doi), _) => JobPayload::DoiFetch {
                    doi: doi.clone(),
                    reason: TargetReason::CitationChase,
                    query: None,
                },
                (None, Some(url)) => JobPayload::UrlFetch {
                    url: url.clone(),
                    reason: TargetReason::CitationChase,
                    query: None,
                },
                (None, None) => continue,
            };
            if self
                .queue
                .enqueue(NewJob::new(
                    task_id,
                    payload,
                    self.config.fetch.max_attempts,
                ))
                .await?
                .is_created()
            {
                accepted += 1;
            }
        }
        tracing::info!(task_id = %task_id, accepted, "citation candidates queued");
        Ok((accepted, None))
    }

    // ------------------------------------------------------------------
    // Auth queue
    // ------------------------------------------------------------------

    pub async fn auth_queue(&self, task_id: Uuid) -> Result<Vec<(String, Option<String>)>> {
        self.store.get_task(task_id).await?;
        self.store.auth_queue(task_id).await
    }

    /// `complete` unblocks the domain and lets parked jobs resume;
    /// `skip` unblocks it but fails the parked jobs terminally.
    pub async fn resolve_auth(&self, action: &str, domain: &str) -> Result<u64> {
        let resolved = match action {
            "complete" => self.store.resolve_auth(domain).await?,
            "skip" => {
                let resolved = self.store.resolve_auth(domain).await?;
                self.queue.fail_parked_for_domain(domain).await?;
                resolved
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown auth action: {other}"
                )))
            }
        };
        self.notify.notify_waiters();
        Ok(resolved)
    }

    // ------------------------------------------------------------------
    // Status and milestones
    // ------------------------------------------------------------------

    pub async fn milestones(&self, task_id: Uuid) -> Result<Milestones> {
        let exploration = self.queue.active_count(task_id, JobPhase::Exploration).await?;
        let verification = self.queue.active_count(task_id, JobPhase::Verification).await?;
        let citation = self.queue.active_count(task_id, JobPhase::Citation).await?;
        let unverified = self.store.unverified_claim_count(task_id).await?;
        let pending_auth = self.store.pending_auth_count(task_id).await?;

        let target_queue_drained = exploration == 0;
        Ok(Milestones {
            target_queue_drained,
            nli_verification_done: verification == 0 && unverified == 0,
            citation_chase_ready: target_queue_drained && citation == 0 && pending_auth == 0,
        })
    }

    pub async fn status(&self, task_id: Uuid, detail: StatusDetail) -> Result<TaskStatusReport> {
        let task = self.store.get_task(task_id).await?;
        let counts = self.queue.counts(task_id).await?;

        let mut report = TaskStatusReport {
            task_id,
            status: task.status,
            budget_remaining_percent: task.budget_remaining_percent(),
            exploration: PhaseCounters::default(),
            verification: PhaseCounters::default(),
            citation: PhaseCounters::default(),
            milestones: self.milestones(task_id).await?,
            waiting_for: Vec::new(),
            pending_auth: Vec::new(),
            total_claims: self.count_claims(task_id).await?,
            failures: Vec::new(),
            queries: None,
        };

        for (phase, state, count) in counts {
            let counters = match phase {
                JobPhase::Exploration => &mut report.exploration,
                JobPhase::Verification => &mut report.verification,
                JobPhase::Citation => &mut report.citation,
            };
            match state {
                JobState::Queued => counters.queued = count,
                JobState::Running => counters.running = count,
                JobState::Completed => counters.completed = count,
                JobState::Failed => counters.failed = count,
            }
        }

        report.waiting_for = self
            .queue
            .waiting_for(task_id)
            .await?
            .into_iter()
            .map(|(kind, status, count)| WaitingFor {
                kind,
                status,
                count,
            })
            .collect();
        report.pending_auth = self
            .store
            .auth_queue(task_id)
            .await?
            .into_iter()
            .map(|(domain, _)| domain)
            .collect();
        report.failures = self
            .queue
            .failures(task_id, 20)
            .await?
            .into_iter()
            .map(|j| JobFailure {
                job_id: j.id,
                kind: format!("{:?}", j.kind),
                error_kind: j.error_kind,
                error: j.error,
            })
            .collect();

        if detail == StatusDetail::Full {
            report.queries = Some(self.query_metrics(task_id).await?);
        }
        Ok(report)
    }

    /// Block (cooperatively) until a milestone changes or `wait` seconds
    /// pass, then return the current status.
    pub async fn status_wait(
        &self,
        task_id: Uuid,
        wait_secs: u64,
        detail: StatusDetail,
    ) -> Result<TaskStatusReport> {
        if wait_secs == 0 {
            return self.status(task_id, detail).await;
        }

        let initial = self.milestones(task_id).await?;
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(wait_secs);
        loop {
            let notified = self.notify.notified();
            if self.milestones(task_id).await? != initial {
                break;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        self.status(task_id, detail).await
    }

    async fn count_claims(&self, task_id: Uuid) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM claims WHERE task_id = ?")
                .bind(task_id.to_string())
                .fetch_one(self.store.pool())
                .await?;
        Ok(count)
    }

    async fn query_metrics(&self, task_id: Uuid) -> Result<Vec<QueryMetrics>> {
        let satisfaction = sqlx::query_scalar::<_, Option<f64>>(
            r#"
            SELECT AVG(bayesian_truth_confidence) FROM claims
            WHERE task_id = ? AND adoption_status != 'not_adopted'
            "#,
        )
        .bind(task_id.to_string())
        .fetch_one(self.store.pool())
        .await?
        .unwrap_or(0.5);

        let mut has_primary = false;
        for domain in self.task_origin_domains(task_id).await? {
            if self.store.domain_trust(&domain).await? == TrustLevel::Primary {
                has_primary = true;
                break;
            }
        }

        Ok(self
            .store
            .query_stats(task_id)
            .await?
            .into_iter()
            .map(|(query, pages, claims)| QueryMetrics {
                query,
                harvest_rate: if pages > 0 {
                    claims as f64 / pages as f64
                } else {
                    0.0
                },
                satisfaction_score: satisfaction,
                has_primary_source: has_primary,
            })
            .collect())
    }

    async fn task_origin_domains(&self, task_id: Uuid) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT p.domain
            FROM edges e
            JOIN fragments f ON f.id = e.source_id AND e.source_kind = 'fragment'
            JOIN pages p ON p.id = f.page_id
            WHERE e.relation = 'origin' AND e.task_id = ?
            "#,
        )
        .bind(task_id.to_string())
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------

    /// Apply user feedback: relation corrections on edges, adoption flips
    /// on claims. Every action lands in the feedback log and triggers a
    /// confidence recompute for affected claims.
    pub async fn apply_feedback(
        &self,
        action: &str,
        ids: &[Uuid],
        correction: Option<&str>,
    ) -> Result<usize> {
        if ids.is_empty() {
            return Err(Error::InvalidArgument("ids must not be empty".into()));
        }

        let mut updated = 0;
        match action {
            "edge_correct" => {
                let correction = correction.ok_or_else(|| {
                    Error::InvalidArgument(
                        "edge_correct requires a correction of supports/refutes/neutral".into(),
                    )
                })?;
                let relation: lyra_evidence::types::Relation =
                    serde_json::from_value(serde_json::Value::String(correction.to_string()))
                        .map_err(|_| {
                            Error::InvalidArgument(format!("unknown relation: {correction}"))
                        })?;
                for id in ids {
                    let edge = self.store.correct_edge_relation(*id, relation).await?;
                    self.store
                        .log_feedback("edge_correct", *id, Some(correction))
                        .await?;
                    self.store.recompute_claim_confidence(edge.target_id).await?;
                    updated += 1;
                }
            }
            "claim_adopt" | "claim_reject" => {
                let status = if action == "claim_adopt" {
                    lyra_evidence::types::AdoptionStatus::Adopted
                } else {
                    lyra_evidence::types::AdoptionStatus::NotAdopted
                };
                for id in ids {
                    self.store.set_adoption_status(*id, status).await?;
                    self.store.log_feedback(action, *id, correction).await?;
                    self.store.recompute_claim_confidence(*id).await?;
                    updated += 1;
                }
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown feedback action: {other}"
                )))
            }
        }
        self.notify.notify_waiters();
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Job execution
    // ------------------------------------------------------------------

    /// Reserve one budget unit for an exploration fetch, failing fast at
    /// zero. The handlers refund the unit if the fetch never completes, so
    /// the counter tracks completed fetches.
    async fn reserve_fetch_budget(&self, task_id: Uuid) -> Result<()> {
        self.store.get_active_task(task_id).await?;
        self.store.consume_budget(task_id).await?;
        Ok(())
    }

    async fn handle_serp(
        &self,
        task_id: Uuid,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<NewJob>> {
        self.store.record_query(task_id, query).await?;

        if cancel.is_cancelled() {
            self.store.refund_budget(task_id).await?;
            return Err(Error::Cancelled);
        }
        let hits = match self.searcher.search(query).await {
            Ok(hits) => hits,
            Err(e) => {
                self.store.refund_budget(task_id).await?;
                return Err(e);
            }
        };

        let mut jobs = Vec::new();
        for hit in hits.into_iter().take(MAX_SERP_HITS) {
            // Identifiers harvested on the SERP short-circuit to the
            // academic fast path.
            let payload = match hit
                .identifiers
                .iter()
                .find_map(|id| id.strip_prefix("doi:"))
            {
                Some(doi) => JobPayload::DoiFetch {
                    doi: doi.to_string(),
                    reason: TargetReason::Manual,
                    query: Some(query.to_string()),
                },
                None => JobPayload::UrlFetch {
                    url: hit.url.clone(),
                    reason: TargetReason::Manual,
                    query: Some(query.to_string()),
                },
            };
            jobs.push(NewJob::new(
                task_id,
                payload,
                self.config.fetch.max_attempts,
            ));
        }
        Ok(jobs)
    }

    async fn handle_url_fetch(
        &self,
        task_id: Uuid,
        url: &str,
        query: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<NewJob>> {
        let document = match self.fetch.fetch_url(url, cancel).await {
            Ok(doc) => doc,
            Err(Error::AuthBlocked { domain }) => {
                self.store.refund_budget(task_id).await?;
                self.store.push_auth_entry(task_id, &domain, url).await?;
                return Err(Error::AuthBlocked { domain });
            }
            Err(e) => {
                self.store.refund_budget(task_id).await?;
                return Err(e);
            }
        };

        let outcome = self
            .extractor
            .extract_document(&self.store, task_id, &document)
            .await?;
        self.follow_ons(task_id, query, outcome).await
    }

    async fn handle_doi_fetch(
        &self,
        task_id: Uuid,
        doi: &str,
        query: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<NewJob>> {
        if cancel.is_cancelled() {
            self.store.refund_budget(task_id).await?;
            return Err(Error::Cancelled);
        }

        let record = match self.academic.by_doi(doi).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.store.refund_budget(task_id).await?;
                return Err(Error::TerminalFetch(format!(
                    "doi {doi} has no registry record"
                )));
            }
            Err(e) => {
                self.store.refund_budget(task_id).await?;
                return Err(e);
            }
        };

        let outcome = self
            .extractor
            .extract_work(&self.store, task_id, &record)
            .await?;
        self.follow_ons(task_id, query, outcome).await
    }

    /// The phase graph: successful extraction fans out verification jobs
    /// and one citation job for the page.
    ///
    /// A new page grows the fragment set, so verification re-runs for every
    /// claim in the task, not just the new ones: already-scored fragments
    /// are skipped inside the verifier and in-flight duplicates collapse in
    /// the queue, so the re-run only pays for genuinely new candidates.
    async fn follow_ons(
        &self,
        task_id: Uuid,
        query: Option<&str>,
        outcome: lyra_evidence::extract::ExtractOutcome,
    ) -> Result<Vec<NewJob>> {
        if let Some(query) = query {
            self.store
                .bump_query_stats(task_id, query, 1, outcome.new_claim_ids.len() as i64)
                .await?;
        }
        if !outcome.page_was_new {
            return Ok(Vec::new());
        }

        let mut claim_ids: Vec<Uuid> = self
            .store
            .claims_for_task(task_id, 1000)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        claim_ids.extend(&outcome.new_claim_ids);
        claim_ids.extend(&outcome.reverify_claim_ids);
        claim_ids.sort();
        claim_ids.dedup();

        let mut jobs: Vec<NewJob> = claim_ids
            .into_iter()
            .map(|claim_id| {
                NewJob::new(
                    task_id,
                    JobPayload::VerifyClaim { claim_id },
                    self.config.fetch.max_attempts,
                )
            })
            .collect();
        jobs.push(NewJob::new(
            task_id,
            JobPayload::ParseCitations {
                page_id: outcome.page_id,
            },
            self.config.fetch.max_attempts,
        ));
        Ok(jobs)
    }
}

#[async_trait]
impl JobHandler for Scheduler {
    async fn handle(&self, job: &JobRecord, cancel: &CancellationToken) -> Result<Vec<NewJob>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let payload = job
            .payload()
            .map_err(|e| Error::InvalidArgument(format!("bad job payload: {e}")))?;

        // Only exploration kinds consume budget; verification and citation
        // work on already-produced pages runs regardless.
        if payload.kind().consumes_budget() {
            self.reserve_fetch_budget(job.task_id).await?;
        }

        match payload {
            JobPayload::SerpFetch { query } => self.handle_serp(job.task_id, &query, cancel).await,
            JobPayload::UrlFetch { url, query, .. } => {
                self.handle_url_fetch(job.task_id, &url, query.as_deref(), cancel)
                    .await
            }
            JobPayload::DoiFetch { doi, query, .. } => {
                self.handle_doi_fetch(job.task_id, &doi, query.as_deref(), cancel)
                    .await
            }
            JobPayload::VerifyClaim { claim_id } => {
                self.verifier
                    .verify_claim(&self.store, claim_id, cancel)
                    .await?;
                Ok(Vec::new())
            }
            JobPayload::ParseCitations { page_id } => {
                self.citations
                    .ingest_page(&self.store, job.task_id, page_id)
                    .await?;
                Ok(Vec::new())
            }
        }
    }
}
