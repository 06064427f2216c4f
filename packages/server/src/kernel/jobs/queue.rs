//! SQLite-backed job queue.
//!
//! Jobs are persisted rows claimed atomically by worker id with a lease;
//! a crashed worker's jobs are reclaimed once the lease expires. Claiming
//! skips jobs whose fetch domain is auth-blocked, which is how parked jobs
//! resume when a block clears.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use lyra_evidence::error::{Error, Result};
use lyra_evidence::fetch::backoff_delay;
use lyra_evidence::types::{JobPayload, JobPhase, JobRecord, JobState};

/// Result of an enqueue that handles dedupe.
#[derive(Debug, Clone)]
pub enum EnqueueResult {
    /// Job was enqueued, returns new job id.
    Created(Uuid),
    /// The same work is already queued or running.
    Duplicate(Uuid),
}

impl EnqueueResult {
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// Insert form for a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub task_id: Uuid,
    pub payload: JobPayload,
    /// Fetch domain, when known up front; lets claiming skip blocked
    /// domains.
    pub domain: Option<String>,
    pub max_attempts: i64,
}

impl NewJob {
    pub fn new(task_id: Uuid, payload: JobPayload, max_attempts: i64) -> Self {
        let domain = match &payload {
            JobPayload::UrlFetch { url, .. } => {
                lyra_evidence::fetch::FetchPool::domain_of(url).ok()
            }
            _ => None,
        };
        Self {
            task_id,
            payload,
            domain,
            max_attempts,
        }
    }
}

const JOB_COLUMNS: &str = r#"
    id, task_id, phase, kind, payload, state, attempts, max_attempts,
    run_after, lease_expires_at, worker_id, domain, error, error_kind,
    dedupe_key, created_at, updated_at
"#;

const LEASE_SECONDS: i64 = 120;

/// Typed job queue over the shared evidence pool.
#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    /// Woken on every enqueue and state transition; workers and status
    /// waiters both listen.
    notify: Arc<Notify>,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    pub fn notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Enqueue a job, collapsing onto an existing queued/running job with
    /// the same dedupe key.
    pub async fn enqueue(&self, job: NewJob) -> Result<EnqueueResult> {
        let dedupe_key = job.payload.dedupe_key(job.task_id);
        if let Some(existing) = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM jobs WHERE dedupe_key = ? AND state IN ('queued', 'running')",
        )
        .bind(&dedupe_key)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(EnqueueResult::Duplicate(existing));
        }

        let id = Uuid::new_v4();
        let kind = job.payload.kind();
        let payload = serde_json::to_string(&job.payload)
            .map_err(|e| Error::InvalidArgument(format!("unserializable payload: {e}")))?;
        let now = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (id, task_id, phase, kind, payload, state, max_attempts,
                              domain, dedupe_key, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'queued', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(job.task_id.to_string())
        .bind(kind.phase())
        .bind(kind)
        .bind(&payload)
        .bind(job.max_attempts)
        .bind(&job.domain)
        .bind(&dedupe_key)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        if let Err(e) = inserted {
            // A concurrent enqueue won the dedupe index; collapse onto it.
            if let Some(existing) = sqlx::query_scalar::<_, Uuid>(
                "SELECT id FROM jobs WHERE dedupe_key = ? AND state IN ('queued', 'running')",
            )
            .bind(&dedupe_key)
            .fetch_optional(&self.pool)
            .await?
            {
                return Ok(EnqueueResult::Duplicate(existing));
            }
            return Err(e.into());
        }

        tracing::debug!(job_id = %id, kind = ?kind, "job enqueued");
        self.notify.notify_waiters();
        Ok(EnqueueResult::Created(id))
    }

    /// Claim up to `limit` ready jobs in the given phases for this worker.
    ///
    /// Ready means queued with `run_after` due, or running with an expired
    /// lease (crashed worker recovery). Jobs on auth-blocked domains and
    /// jobs out of attempts are skipped.
    pub async fn claim(
        &self,
        worker_id: &str,
        phases: &[JobPhase],
        limit: i64,
    ) -> Result<Vec<JobRecord>> {
        if phases.is_empty() {
            return Ok(Vec::new());
        }
        let phase_list = phases
            .iter()
            .map(|p| format!("'{}'", phase_str(*p)))
            .collect::<Vec<_>>()
            .join(", ");

        let now = Utc::now();
        let lease = now + ChronoDuration::seconds(LEASE_SECONDS);
        let sql = format!(
            r#"
            UPDATE jobs SET
                state = 'running',
                worker_id = ?,
                lease_expires_at = ?,
                attempts = attempts + 1,
                updated_at = ?
            WHERE id IN (
                SELECT j.id FROM jobs j
                LEFT JOIN domains d ON d.domain = j.domain
                WHERE (
                        (j.state = 'queued' AND (j.run_after IS NULL OR j.run_after <= ?))
                        OR (j.state = 'running' AND j.lease_expires_at < ?)
                    )
                    AND j.phase IN ({phase_list})
                    AND j.attempts < j.max_attempts
                    AND (j.domain IS NULL OR d.auth_state IS NULL OR d.auth_state != 'blocked')
                ORDER BY j.created_at
                LIMIT ?
            )
            RETURNING {JOB_COLUMNS}
            "#
        );

        let jobs = sqlx::query_as::<_, JobRecord>(&sql)
            .bind(worker_id)
            .bind(lease)
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    /// Extend a running job's lease (heartbeat for long fetches).
    pub async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET lease_expires_at = ?, updated_at = ? WHERE id = ? AND state = 'running'",
        )
        .bind(Utc::now() + ChronoDuration::seconds(LEASE_SECONDS))
        .bind(Utc::now())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs SET state = 'completed', error = NULL, error_kind = NULL,
                            lease_expires_at = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        self.notify.notify_waiters();
        Ok(())
    }

    /// Record a job failure with the error's disposition:
    /// - auth blocks park the job (re-queued, attempt refunded, claimable
    ///   once the domain unblocks);
    /// - retryable errors re-queue with backoff while attempts remain;
    /// - everything else fails terminally.
    pub async fn mark_failed(&self, job: &JobRecord, error: &Error) -> Result<()> {
        let message = error.to_string();
        let kind = error.kind();

        let (state, run_after, refund): (JobState, Option<DateTime<Utc>>, bool) = match error {
            Error::AuthBlocked { .. } => (JobState::Queued, None, true),
            e if e.is_retryable() && job.attempts < job.max_attempts => {
                let delay = backoff_delay(job.attempts);
                (
                    JobState::Queued,
                    Some(Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64)),
                    false,
                )
            }
            _ => (JobState::Failed, None, false),
        };

        sqlx::query(
            r#"
            UPDATE jobs SET state = ?, run_after = ?, error = ?, error_kind = ?,
                            attempts = attempts - ?, lease_expires_at = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(state)
        .bind(run_after)
        .bind(&message)
        .bind(kind)
        .bind(if refund { 1 } else { 0 })
        .bind(Utc::now())
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;

        match state {
            JobState::Failed => {
                tracing::warn!(job_id = %job.id, error = %message, "job failed terminally")
            }
            _ => tracing::debug!(job_id = %job.id, error = %message, "job re-queued"),
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Discard all queued jobs for a task (stop_task semantics: running
    /// jobs are left to finish or cancel cooperatively).
    pub async fn discard_queued(&self, task_id: Uuid) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM jobs WHERE task_id = ? AND state = 'queued'")
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        self.notify.notify_waiters();
        Ok(deleted)
    }

    /// Terminally fail parked jobs for a domain (`resolve_auth` with the
    /// skip action).
    pub async fn fail_parked_for_domain(&self, domain: &str) -> Result<u64> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs SET state = 'failed', error = 'auth challenge skipped by user',
                            error_kind = 'auth_blocked', updated_at = ?
            WHERE domain = ? AND state = 'queued' AND error_kind = 'auth_blocked'
            "#,
        )
        .bind(Utc::now())
        .bind(domain)
        .execute(&self.pool)
        .await?
        .rows_affected();
        self.notify.notify_waiters();
        Ok(updated)
    }

    /// `(phase, state, count)` rows for a task.
    pub async fn counts(&self, task_id: Uuid) -> Result<Vec<(JobPhase, JobState, i64)>> {
        let rows = sqlx::query_as::<_, (JobPhase, JobState, i64)>(
            "SELECT phase, state, COUNT(*) FROM jobs WHERE task_id = ? GROUP BY phase, state",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// `(kind, state, count)` for jobs still holding milestones back.
    pub async fn waiting_for(&self, task_id: Uuid) -> Result<Vec<(String, String, i64)>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            r#"
            SELECT kind, state, COUNT(*) FROM jobs
            WHERE task_id = ? AND state IN ('queued', 'running')
            GROUP BY kind, state
            "#,
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Failed jobs with their classified errors, for status reporting.
    pub async fn failures(&self, task_id: Uuid, limit: i64) -> Result<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE task_id = ? AND state = 'failed'
             ORDER BY updated_at DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, JobRecord>(&sql)
            .bind(task_id.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Count of jobs in the given states for one phase.
    pub async fn active_count(&self, task_id: Uuid, phase: JobPhase) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE task_id = ? AND phase = ? AND state IN ('queued', 'running')
            "#,
        )
        .bind(task_id.to_string())
        .bind(phase)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

fn phase_str(phase: JobPhase) -> &'static str {
    match phase {
        JobPhase::Exploration => "exploration",
        JobPhase::Verification => "verification",
        JobPhase::Citation => "citation",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lyra_evidence::store::EvidenceStore;
    use lyra_evidence::types::TargetReason;

    async fn queue_with_task() -> (EvidenceStore, JobQueue, Uuid) {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        let queue = JobQueue::new(store.pool().clone(), Arc::new(Notify::new()));
        (store, queue, task.id)
    }

    fn url_job(task_id: Uuid, url: &str) -> NewJob {
        NewJob::new(
            task_id,
            JobPayload::UrlFetch {
                url: url.into(),
                reason: TargetReason::Manual,
                query: None,
            },
            3,
        )
    }

    #[tokio::test]
    async fn enqueue_then_claim_round_trip() {
        let (_store, queue, task_id) = queue_with_task().await;
        let result = queue
            .enqueue(url_job(task_id, "https://example.com/a"))
            .await
            .unwrap();
        assert!(result.is_created());

        let claimed = queue
            .claim("worker-1", &[JobPhase::Exploration], 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].state, JobState::Running);
        assert_eq!(claimed[0].attempts, 1);
        assert_eq!(claimed[0].worker_id.as_deref(), Some("worker-1"));

        // Running jobs are not claimable again while the lease holds.
        let again = queue
            .claim("worker-2", &[JobPhase::Exploration], 10)
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn duplicate_work_collapses_while_in_flight() {
        let (_store, queue, task_id) = queue_with_task().await;
        let first = queue
            .enqueue(url_job(task_id, "https://example.com/a"))
            .await
            .unwrap();
        let second = queue
            .enqueue(url_job(task_id, "https://example.com/a"))
            .await
            .unwrap();
        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(first.job_id(), second.job_id());

        // Completion frees the key for later re-queues.
        let claimed = queue
            .claim("w", &[JobPhase::Exploration], 1)
            .await
            .unwrap();
        queue.mark_completed(claimed[0].id).await.unwrap();
        let third = queue
            .enqueue(url_job(task_id, "https://example.com/a"))
            .await
            .unwrap();
        assert!(third.is_created());
    }

    #[tokio::test]
    async fn transient_failures_requeue_with_backoff_until_attempts_exhaust() {
        let (_store, queue, task_id) = queue_with_task().await;
        queue
            .enqueue(NewJob::new(
                task_id,
                JobPayload::SerpFetch {
                    query: "X improves Y".into(),
                },
                2,
            ))
            .await
            .unwrap();

        let job = queue.claim("w", &[JobPhase::Exploration], 1).await.unwrap()[0].clone();
        queue
            .mark_failed(&job, &Error::TransientFetch("503".into()))
            .await
            .unwrap();

        // Re-queued with a run_after in the future; not yet claimable.
        let soon = queue.claim("w", &[JobPhase::Exploration], 1).await.unwrap();
        assert!(soon.is_empty());

        // Force the retry due, claim, and fail once more: attempts exhausted.
        sqlx::query("UPDATE jobs SET run_after = NULL WHERE id = ?")
            .bind(job.id.to_string())
            .execute(_store.pool())
            .await
            .unwrap();
        let job = queue.claim("w", &[JobPhase::Exploration], 1).await.unwrap()[0].clone();
        assert_eq!(job.attempts, 2);
        queue
            .mark_failed(&job, &Error::TransientFetch("503 again".into()))
            .await
            .unwrap();

        let counts = queue.counts(task_id).await.unwrap();
        assert_eq!(counts, vec![(JobPhase::Exploration, JobState::Failed, 1)]);
    }

    #[tokio::test]
    async fn terminal_failures_do_not_retry() {
        let (_store, queue, task_id) = queue_with_task().await;
        queue
            .enqueue(url_job(task_id, "https://example.com/a"))
            .await
            .unwrap();
        let job = queue.claim("w", &[JobPhase::Exploration], 1).await.unwrap()[0].clone();
        queue
            .mark_failed(&job, &Error::TerminalFetch("404".into()))
            .await
            .unwrap();

        let failures = queue.failures(task_id, 10).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_kind.as_deref(), Some("terminal_fetch"));
    }

    #[tokio::test]
    async fn auth_blocked_jobs_park_and_resume_with_the_domain() {
        let (store, queue, task_id) = queue_with_task().await;
        queue
            .enqueue(url_job(task_id, "https://example.com/paywalled"))
            .await
            .unwrap();
        let job = queue.claim("w", &[JobPhase::Exploration], 1).await.unwrap()[0].clone();

        store
            .push_auth_entry(task_id, "example.com", "https://example.com/paywalled")
            .await
            .unwrap();
        queue
            .mark_failed(
                &job,
                &Error::AuthBlocked {
                    domain: "example.com".into(),
                },
            )
            .await
            .unwrap();

        // Parked: queued but not claimable while the domain is blocked.
        assert!(queue
            .claim("w", &[JobPhase::Exploration], 1)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(queue.active_count(task_id, JobPhase::Exploration).await.unwrap(), 1);

        // Unblocking the domain makes the job claimable again, with its
        // attempt refunded.
        store.resolve_auth("example.com").await.unwrap();
        let resumed = queue.claim("w", &[JobPhase::Exploration], 1).await.unwrap();
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].attempts, 1);
    }

    #[tokio::test]
    async fn discard_queued_leaves_running_jobs_alone() {
        let (_store, queue, task_id) = queue_with_task().await;
        queue
            .enqueue(url_job(task_id, "https://example.com/a"))
            .await
            .unwrap();
        queue
            .enqueue(url_job(task_id, "https://example.com/b"))
            .await
            .unwrap();
        let running = queue.claim("w", &[JobPhase::Exploration], 1).await.unwrap();
        assert_eq!(running.len(), 1);

        let discarded = queue.discard_queued(task_id).await.unwrap();
        assert_eq!(discarded, 1);
        let counts = queue.counts(task_id).await.unwrap();
        assert_eq!(counts, vec![(JobPhase::Exploration, JobState::Running, 1)]);
    }

    #[tokio::test]
    async fn expired_leases_are_reclaimed() {
        let (_store, queue, task_id) = queue_with_task().await;
        queue
            .enqueue(url_job(task_id, "https://example.com/a"))
            .await
            .unwrap();
        let job = queue.claim("w1", &[JobPhase::Exploration], 1).await.unwrap()[0].clone();

        // Simulate a crashed worker by expiring the lease.
        sqlx::query("UPDATE jobs SET lease_expires_at = ? WHERE id = ?")
            .bind(Utc::now() - ChronoDuration::seconds(10))
            .bind(job.id.to_string())
            .execute(_store.pool())
            .await
            .unwrap();

        let reclaimed = queue.claim("w2", &[JobPhase::Exploration], 1).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].worker_id.as_deref(), Some("w2"));
    }
}
