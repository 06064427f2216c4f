//! Typed errors for the evidence runtime.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match
//! on kinds. The scheduler maps kinds to retry/terminal dispositions; the
//! API layer maps them to HTTP statuses.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur anywhere in the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request: bad target, missing `kind`, unsupported view.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted on a stopped task.
    #[error("task {0} is stopped")]
    TaskStopped(Uuid),

    /// Unknown task, claim, edge, page, or candidate id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure, 5xx, or timeout. Retried with backoff.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// Login wall or CAPTCHA. The domain is flagged and the job parked.
    #[error("auth challenge from domain {domain}")]
    AuthBlocked { domain: String },

    /// 4xx other than 401/403/429, or unparseable content.
    #[error("terminal fetch failure: {0}")]
    TerminalFetch(String),

    /// The extraction model returned nothing usable for a page.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// Task budget is at zero; new exploration is rejected.
    #[error("task budget exhausted")]
    BudgetExhausted,

    /// An internal graph invariant was broken. The job fails; the runtime
    /// does not crash.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A running job observed its cancellation token and ended early.
    #[error("operation cancelled")]
    Cancelled,

    /// Storage failure from the underlying store.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Migration failure at startup.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// The local ML sidecar is unreachable or returned garbage.
    #[error("sidecar error: {0}")]
    Sidecar(String),
}

impl Error {
    /// Whether a job hitting this error should be retried (attempts
    /// permitting) or failed terminally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientFetch(_) | Error::Storage(_) | Error::Sidecar(_)
        )
    }

    /// Stable machine-readable kind string, recorded on failed jobs and
    /// returned in status payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::TaskStopped(_) => "task_stopped",
            Error::NotFound(_) => "not_found",
            Error::TransientFetch(_) => "transient_fetch",
            Error::AuthBlocked { .. } => "auth_blocked",
            Error::TerminalFetch(_) => "terminal_fetch",
            Error::ExtractionFailed(_) => "extraction_failed",
            Error::BudgetExhausted => "budget_exhausted",
            Error::ConstraintViolation(_) => "constraint_violation",
            Error::Cancelled => "cancelled",
            Error::Storage(_) => "storage",
            Error::Migrate(_) => "storage",
            Error::Sidecar(_) => "sidecar",
        }
    }

    /// Classify an HTTP response status from an outbound fetch.
    ///
    /// 401/403/429 are auth challenges; other 4xx are terminal; 5xx and
    /// everything weird is transient.
    pub fn from_fetch_status(status: u16, domain: &str, url: &str) -> Option<Self> {
        match status {
            200..=299 => None,
            401 | 403 | 429 => Some(Error::AuthBlocked {
                domain: domain.to_string(),
            }),
            400..=499 => Some(Error::TerminalFetch(format!("HTTP {status} from {url}"))),
            _ => Some(Error::TransientFetch(format!("HTTP {status} from {url}"))),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        // Connection problems and timeouts are retryable by definition.
        Error::TransientFetch(e.to_string())
    }
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let e = Error::from_fetch_status(502, "example.com", "https://example.com").unwrap();
        assert!(e.is_retryable());
        assert_eq!(e.kind(), "transient_fetch");
    }

    #[test]
    fn client_errors_are_terminal() {
        let e = Error::from_fetch_status(404, "example.com", "https://example.com").unwrap();
        assert!(!e.is_retryable());
        assert_eq!(e.kind(), "terminal_fetch");
    }

    #[test]
    fn auth_statuses_flag_the_domain() {
        for status in [401, 403, 429] {
            let e = Error::from_fetch_status(status, "example.com", "https://example.com/x")
                .unwrap();
            assert_eq!(e.kind(), "auth_blocked");
            assert!(!e.is_retryable());
        }
    }

    #[test]
    fn success_statuses_classify_as_none() {
        assert!(Error::from_fetch_status(200, "a", "b").is_none());
        assert!(Error::from_fetch_status(204, "a", "b").is_none());
    }
}
