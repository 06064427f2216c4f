//! SQLite-backed evidence store.
//!
//! The store exclusively owns every persistent row; components share rows by
//! id only. Concurrent readers run against WAL snapshots while writes are
//! serialized by the single-writer database lock.
//!
//! # Module layout
//!
//! - [`mod@self`] - pool setup, tasks, domains, auth queue, blobs, feedback
//! - [`pages`] - page upsert, fragment insertion, extraction write-through
//! - [`claims`] - claim dedup, adoption, confidence recomputation
//! - [`edges`] - edge insertion with the cross-source independence check
//! - [`views`] - the named read-only projections, cursor-paginated
//! - [`vector`] - embedding persistence and cosine top-k search
//! - [`sql_guard`] - SELECT-only whitelist for ad-hoc queries

mod candidates;
mod claims;
mod edges;
mod pages;
mod rows;
mod sql_guard;
mod vector;
mod views;

pub use candidates::CitationCandidate;
pub use claims::ClaimInsert;
pub use pages::{ClaimDraft, ExtractionCommit, ExtractionWrite};
pub use sql_guard::validate_read_only_sql;
pub(crate) use vector::cosine_similarity;
pub use vector::{VectorHit, VectorTarget};
pub use views::{ViewName, ViewPage};

use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{AuthState, DomainRecord, Task, TaskStatus, TrustLevel};

/// Handle to the single on-disk relational store.
#[derive(Clone)]
pub struct EvidenceStore {
    pool: SqlitePool,
}

impl EvidenceStore {
    /// Open (creating if missing) a store at the given SQLite URL and bring
    /// the schema up to date. Migrations are lexicographic and additive.
    pub async fn open(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(Error::Storage)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests. Single connection: every pooled SQLite
    /// `:memory:` connection would otherwise be its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(Error::Storage)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// The underlying connection pool, shared with the job queue.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    pub async fn create_task(&self, hypothesis: &str, budget: i64) -> Result<Task> {
        if hypothesis.trim().is_empty() {
            return Err(Error::InvalidArgument("hypothesis must not be empty".into()));
        }
        let task = Task::new(hypothesis.trim(), budget);
        sqlx::query(
            r#"
            INSERT INTO tasks (id, hypothesis, status, budget_initial, budget_remaining, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.hypothesis)
        .bind(task.status)
        .bind(task.budget_initial)
        .bind(task.budget_remaining)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(task_id = %task.id, "task created");
        Ok(task)
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        sqlx::query_as::<_, Task>(
            r#"
            SELECT id, hypothesis, status, budget_initial, budget_remaining, created_at, updated_at
            FROM tasks WHERE id = ?
            "#,
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {task_id}")))
    }

    /// Require an active task; maps stopped tasks to `TaskStopped`.
    pub async fn get_active_task(&self, task_id: Uuid) -> Result<Task> {
        let task = self.get_task(task_id).await?;
        if task.is_stopped() {
            return Err(Error::TaskStopped(task_id));
        }
        Ok(task)
    }

    /// Idempotent transition to `stopped`. Returns the task either way.
    pub async fn stop_task(&self, task_id: Uuid) -> Result<Task> {
        sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(TaskStatus::Stopped)
            .bind(Utc::now())
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await?;
        self.get_task(task_id).await
    }

    /// Atomically consume one fetch unit of budget. Fails fast with
    /// `BudgetExhausted` when nothing remains.
    pub async fn consume_budget(&self, task_id: Uuid) -> Result<i64> {
        let updated = sqlx::query(
            r#"
            UPDATE tasks SET budget_remaining = budget_remaining - 1, updated_at = ?
            WHERE id = ? AND budget_remaining > 0
            "#,
        )
        .bind(Utc::now())
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            // Distinguish exhaustion from a missing task.
            let task = self.get_task(task_id).await?;
            debug_assert!(task.budget_remaining <= 0);
            return Err(Error::BudgetExhausted);
        }
        Ok(self.get_task(task_id).await?.budget_remaining)
    }

    /// Return one reserved fetch unit, e.g. when the fetch it was reserved
    /// for never completed.
    pub async fn refund_budget(&self, task_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks SET budget_remaining = budget_remaining + 1, updated_at = ?
            WHERE id = ? AND budget_remaining < budget_initial
            "#,
        )
        .bind(Utc::now())
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Domains
    // ========================================================================

    /// Ensure a domain row exists, classifying trust on first sight.
    pub async fn ensure_domain(&self, domain: &str) -> Result<DomainRecord> {
        let trust = crate::types::domain::classify_domain(domain);
        sqlx::query(
            r#"
            INSERT INTO domains (domain, trust_level) VALUES (?, ?)
            ON CONFLICT (domain) DO NOTHING
            "#,
        )
        .bind(domain)
        .bind(trust)
        .execute(&self.pool)
        .await?;
        self.get_domain(domain).await
    }

    pub async fn get_domain(&self, domain: &str) -> Result<DomainRecord> {
        sqlx::query_as::<_, DomainRecord>(
            r#"
            SELECT domain, trust_level, wayback_success_count, wayback_failure_count, auth_state
            FROM domains WHERE domain = ?
            "#,
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("domain {domain}")))
    }

    /// Trust level for a domain, `Unverified` if never seen.
    pub async fn domain_trust(&self, domain: &str) -> Result<TrustLevel> {
        match self.get_domain(domain).await {
            Ok(d) => Ok(d.trust_level),
            Err(Error::NotFound(_)) => Ok(TrustLevel::Unverified),
            Err(e) => Err(e),
        }
    }

    pub async fn set_domain_auth_state(&self, domain: &str, state: AuthState) -> Result<()> {
        self.ensure_domain(domain).await?;
        sqlx::query("UPDATE domains SET auth_state = ? WHERE domain = ?")
            .bind(state)
            .bind(domain)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_wayback_result(&self, domain: &str, success: bool) -> Result<()> {
        self.ensure_domain(domain).await?;
        let column = if success {
            "wayback_success_count"
        } else {
            "wayback_failure_count"
        };
        sqlx::query(&format!(
            "UPDATE domains SET {column} = {column} + 1 WHERE domain = ?"
        ))
        .bind(domain)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Auth queue
    // ========================================================================

    /// Record an auth challenge for (task, domain). One open entry per pair.
    pub async fn push_auth_entry(&self, task_id: Uuid, domain: &str, url: &str) -> Result<()> {
        self.set_domain_auth_state(domain, AuthState::Blocked).await?;
        sqlx::query(
            r#"
            INSERT INTO auth_queue (id, task_id, domain, url, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (task_id, domain) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(task_id.to_string())
        .bind(domain)
        .bind(url)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Open auth-queue entries for a task as (domain, url) pairs.
    pub async fn auth_queue(&self, task_id: Uuid) -> Result<Vec<(String, Option<String>)>> {
        let rows = sqlx::query_as::<_, (String, Option<String>)>(
            r#"
            SELECT domain, url FROM auth_queue
            WHERE task_id = ? AND resolved_at IS NULL
            ORDER BY created_at
            "#,
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn pending_auth_count(&self, task_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM auth_queue WHERE task_id = ? AND resolved_at IS NULL",
        )
        .bind(task_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Clear the block for a domain and close its auth-queue entries.
    pub async fn resolve_auth(&self, domain: &str) -> Result<u64> {
        self.set_domain_auth_state(domain, AuthState::Ok).await?;
        let resolved = sqlx::query(
            "UPDATE auth_queue SET resolved_at = ? WHERE domain = ? AND resolved_at IS NULL",
        )
        .bind(Utc::now())
        .bind(domain)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(resolved)
    }

    // ========================================================================
    // Raw body blobs
    // ========================================================================

    /// Content-addressed store of raw fetched bodies.
    pub async fn put_blob(&self, content_hash: &str, body: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO blobs (content_hash, body) VALUES (?, ?)
            ON CONFLICT (content_hash) DO NOTHING
            "#,
        )
        .bind(content_hash)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_blob(&self, content_hash: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT body FROM blobs WHERE content_hash = ?",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ========================================================================
    // Per-query stats
    // ========================================================================

    pub async fn record_query(&self, task_id: Uuid, query: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO query_stats (task_id, query, created_at) VALUES (?, ?, ?)
            ON CONFLICT (task_id, query) DO NOTHING
            "#,
        )
        .bind(task_id.to_string())
        .bind(query)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn bump_query_stats(
        &self,
        task_id: Uuid,
        query: &str,
        pages: i64,
        claims: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE query_stats
            SET pages_fetched = pages_fetched + ?, claims_extracted = claims_extracted + ?
            WHERE task_id = ? AND query = ?
            "#,
        )
        .bind(pages)
        .bind(claims)
        .bind(task_id.to_string())
        .bind(query)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `(query, pages_fetched, claims_extracted)` rows for a task.
    pub async fn query_stats(&self, task_id: Uuid) -> Result<Vec<(String, i64, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64, i64)>(
            r#"
            SELECT query, pages_fetched, claims_extracted FROM query_stats
            WHERE task_id = ? ORDER BY created_at
            "#,
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ========================================================================
    // Feedback
    // ========================================================================

    /// Append one feedback action to the adaptation log.
    pub async fn log_feedback(
        &self,
        action: &str,
        target_id: Uuid,
        correction: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feedback_log (id, action, target_id, correction, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(action)
        .bind(target_id.to_string())
        .bind(correction)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_task() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        let loaded = store.get_task(task.id).await.unwrap();
        assert_eq!(loaded.hypothesis, "X improves Y");
        assert_eq!(loaded.status, TaskStatus::Active);
    }

    #[tokio::test]
    async fn empty_hypothesis_is_invalid() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let err = store.create_task("   ", 10).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn stop_task_is_idempotent() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        let first = store.stop_task(task.id).await.unwrap();
        let second = store.stop_task(task.id).await.unwrap();
        assert_eq!(first.status, TaskStatus::Stopped);
        assert_eq!(second.status, TaskStatus::Stopped);
    }

    #[tokio::test]
    async fn budget_runs_down_to_exhaustion() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 2).await.unwrap();
        assert_eq!(store.consume_budget(task.id).await.unwrap(), 1);
        assert_eq!(store.consume_budget(task.id).await.unwrap(), 0);
        let err = store.consume_budget(task.id).await.unwrap_err();
        assert_eq!(err.kind(), "budget_exhausted");
    }

    #[tokio::test]
    async fn auth_queue_round_trip() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let task = store.create_task("X improves Y", 10).await.unwrap();
        store
            .push_auth_entry(task.id, "example.com", "https://example.com/paywalled")
            .await
            .unwrap();
        // Re-parking the same domain does not duplicate the entry.
        store
            .push_auth_entry(task.id, "example.com", "https://example.com/other")
            .await
            .unwrap();

        let entries = store.auth_queue(task.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "example.com");
        assert_eq!(
            store.get_domain("example.com").await.unwrap().auth_state,
            AuthState::Blocked
        );

        store.resolve_auth("example.com").await.unwrap();
        assert_eq!(store.pending_auth_count(task.id).await.unwrap(), 0);
        assert_eq!(
            store.get_domain("example.com").await.unwrap().auth_state,
            AuthState::Ok
        );
    }

    #[tokio::test]
    async fn blobs_are_content_addressed() {
        let store = EvidenceStore::in_memory().await.unwrap();
        store.put_blob("abc123", b"hello").await.unwrap();
        store.put_blob("abc123", b"hello").await.unwrap();
        assert_eq!(store.get_blob("abc123").await.unwrap().unwrap(), b"hello");
        assert!(store.get_blob("missing").await.unwrap().is_none());
    }
}
