//! User-supplied research targets.
//!
//! Targets are a tagged sum type; raw strings are rejected at the API
//! boundary and the `kind` discriminator is mandatory. Backend selection is
//! a pure function of the tag plus URL shape (see `fetch`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetReason {
    #[default]
    Manual,
    CitationChase,
}

/// One unit of user-directed discovery work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Target {
    /// Free-text query routed to the web-search backend.
    Query { query: String },
    /// Explicit URL routed to browser automation or direct HTTP.
    Url {
        url: String,
        #[serde(default)]
        reason: TargetReason,
    },
    /// DOI routed to the academic-API fast path.
    Doi {
        doi: String,
        #[serde(default)]
        reason: TargetReason,
    },
}

impl Target {
    /// Reject empty payloads before anything is enqueued.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Target::Query { query } if query.trim().is_empty() => {
                Err("query must not be empty".into())
            }
            Target::Url { url, .. } if url::Url::parse(url).is_err() => {
                Err(format!("invalid url: {url}"))
            }
            Target::Doi { doi, .. } if !doi.trim_start_matches("doi:").starts_with("10.") => {
                Err(format!("invalid doi: {doi}"))
            }
            _ => Ok(()),
        }
    }
}
