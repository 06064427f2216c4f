//! SELECT-only guard for ad-hoc queries.
//!
//! `query_sql` callers get read access to a whitelist of tables and views,
//! nothing else. The guard is syntactic: single SELECT statement, no writes,
//! no pragmas, no table references outside the whitelist.

use regex::Regex;
use std::sync::OnceLock;

use super::rows::row_to_json;
use super::EvidenceStore;
use crate::error::{Error, Result};

/// Tables and views readable through `query_sql`.
const READABLE: &[&str] = &[
    "tasks",
    "pages",
    "fragments",
    "claims",
    "works",
    "work_authors",
    "domains",
    "edges",
    "citation_candidates",
    "jobs",
    "query_stats",
    "v_claim_evidence_summary",
    "v_contradictions",
    "v_unsupported_claims",
    "v_source_impact",
    "v_evidence_chain",
    "v_reference_candidates",
    "v_evidence_timeline",
    "v_claim_origins",
];

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "replace", "attach", "detach",
    "pragma", "vacuum", "reindex", "begin", "commit", "rollback",
];

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_]*)").expect("static regex"))
}

/// Validate that `sql` is a single SELECT over whitelisted relations.
pub fn validate_read_only_sql(sql: &str) -> Result<()> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument("empty sql".into()));
    }
    if trimmed.contains(';') {
        return Err(Error::InvalidArgument(
            "only a single statement is allowed".into(),
        ));
    }

    let lowered = trimmed.to_lowercase();
    if !(lowered.starts_with("select") || lowered.starts_with("with")) {
        return Err(Error::InvalidArgument(
            "only SELECT statements are allowed".into(),
        ));
    }
    for keyword in FORBIDDEN_KEYWORDS {
        if lowered
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .any(|word| word == *keyword)
        {
            return Err(Error::InvalidArgument(format!(
                "statement contains forbidden keyword: {keyword}"
            )));
        }
    }

    // CTE names introduced by WITH are legal references.
    let cte_names: Vec<String> = {
        static CTE_RE: OnceLock<Regex> = OnceLock::new();
        let re = CTE_RE.get_or_init(|| {
            Regex::new(r"(?i)\b([A-Za-z_][A-Za-z0-9_]*)\s+as\s*\(").expect("static regex")
        });
        re.captures_iter(&lowered)
            .map(|c| c[1].to_string())
            .collect()
    };

    for capture in identifier_regex().captures_iter(&lowered) {
        let name = &capture[1];
        if name == "select" {
            // `FROM (SELECT ...)` subquery.
            continue;
        }
        if !READABLE.contains(&name) && !cte_names.iter().any(|c| c == name) {
            return Err(Error::InvalidArgument(format!(
                "relation not readable: {name}"
            )));
        }
    }
    Ok(())
}

impl EvidenceStore {
    /// Run a validated read-only query. `limit` caps the rows returned
    /// regardless of what the statement asks for.
    pub async fn query_sql(&self, sql: &str, limit: i64) -> Result<Vec<serde_json::Value>> {
        if limit <= 0 {
            return Err(Error::InvalidArgument("limit must be positive".into()));
        }
        validate_read_only_sql(sql)?;

        let capped = format!(
            "SELECT * FROM ({}) LIMIT {}",
            sql.trim().trim_end_matches(';'),
            limit.min(1000)
        );
        let rows = sqlx::query(&capped).fetch_all(self.pool()).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_selects_pass() {
        assert!(validate_read_only_sql("SELECT * FROM claims").is_ok());
        assert!(validate_read_only_sql("select text from claims where task_id = 'x'").is_ok());
        assert!(validate_read_only_sql(
            "SELECT c.text, e.relation FROM claims c JOIN edges e ON e.target_id = c.id"
        )
        .is_ok());
    }

    #[test]
    fn writes_are_rejected() {
        assert!(validate_read_only_sql("DELETE FROM claims").is_err());
        assert!(validate_read_only_sql("UPDATE claims SET text = 'x'").is_err());
        assert!(validate_read_only_sql("INSERT INTO claims VALUES (1)").is_err());
        assert!(validate_read_only_sql("DROP TABLE claims").is_err());
        assert!(validate_read_only_sql("PRAGMA journal_mode = DELETE").is_err());
    }

    #[test]
    fn stacked_statements_are_rejected() {
        assert!(validate_read_only_sql("SELECT 1; DELETE FROM claims").is_err());
    }

    #[test]
    fn unlisted_relations_are_rejected() {
        assert!(validate_read_only_sql("SELECT * FROM sqlite_master").is_err());
        assert!(validate_read_only_sql("SELECT * FROM feedback_log").is_err());
        assert!(validate_read_only_sql("SELECT * FROM blobs").is_err());
    }

    #[test]
    fn ctes_over_whitelisted_tables_pass() {
        let sql = "WITH strong AS (SELECT * FROM claims WHERE bayesian_truth_confidence > 0.8) \
                   SELECT * FROM strong";
        assert!(validate_read_only_sql(sql).is_ok());
    }

    #[tokio::test]
    async fn query_sql_returns_capped_json_rows() {
        let store = EvidenceStore::in_memory().await.unwrap();
        for i in 0..5 {
            store.create_task(&format!("hypothesis {i}"), 10).await.unwrap();
        }
        let rows = store
            .query_sql("SELECT hypothesis FROM tasks", 3)
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0]["hypothesis"].is_string());
    }

    #[tokio::test]
    async fn query_sql_rejects_non_select() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let err = store.query_sql("DELETE FROM tasks", 10).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }
}
