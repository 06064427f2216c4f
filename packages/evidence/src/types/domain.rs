//! Per-domain fetch state and trust labels.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Domain-level trust label, stamped onto NLI edges for downstream
/// interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Primary,
    Government,
    Academic,
    Trusted,
    Low,
    #[default]
    Unverified,
    Blocked,
}

impl TrustLevel {
    /// Weight applied to NLI edge confidence in the claim aggregate.
    pub fn weight(&self) -> f64 {
        match self {
            TrustLevel::Primary => 1.0,
            TrustLevel::Government => 0.9,
            TrustLevel::Academic => 0.9,
            TrustLevel::Trusted => 0.7,
            TrustLevel::Low => 0.3,
            TrustLevel::Unverified => 0.5,
            TrustLevel::Blocked => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    Ok,
    Blocked,
}

/// Process-wide fetch state for one domain.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: String,
    pub trust_level: TrustLevel,
    pub wayback_success_count: i64,
    pub wayback_failure_count: i64,
    pub auth_state: AuthState,
}

/// Heuristic trust classification for a freshly seen domain.
///
/// Registries of record (DOI, PubMed) rank as primary literature; .gov and
/// .edu hosts get their institutional levels; everything else starts
/// unverified until curated.
pub fn classify_domain(domain: &str) -> TrustLevel {
    let d = domain.to_ascii_lowercase();
    if d == "doi.org"
        || d.ends_with(".doi.org")
        || d == "pubmed.ncbi.nlm.nih.gov"
        || d == "ncbi.nlm.nih.gov"
    {
        return TrustLevel::Primary;
    }
    if d.ends_with(".gov") || d.contains(".gov.") {
        return TrustLevel::Government;
    }
    if d.ends_with(".edu") || d.ends_with(".ac.uk") || d == "arxiv.org" {
        return TrustLevel::Academic;
    }
    TrustLevel::Unverified
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doi_registry_is_primary() {
        assert_eq!(classify_domain("doi.org"), TrustLevel::Primary);
        assert_eq!(
            classify_domain("pubmed.ncbi.nlm.nih.gov"),
            TrustLevel::Primary
        );
    }

    #[test]
    fn institutional_hosts_classify_by_suffix() {
        assert_eq!(classify_domain("cdc.gov"), TrustLevel::Government);
        assert_eq!(classify_domain("stanford.edu"), TrustLevel::Academic);
        assert_eq!(classify_domain("arxiv.org"), TrustLevel::Academic);
    }

    #[test]
    fn unknown_hosts_start_unverified() {
        assert_eq!(classify_domain("example.com"), TrustLevel::Unverified);
    }

    #[test]
    fn blocked_evidence_carries_no_weight() {
        assert_eq!(TrustLevel::Blocked.weight(), 0.0);
        assert!(TrustLevel::Primary.weight() > TrustLevel::Low.weight());
    }
}
