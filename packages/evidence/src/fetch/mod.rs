//! Per-domain-coordinated retrieval.
//!
//! The fetch pool owns process-wide per-domain state: a token-bucket rate
//! limiter, a concurrency cap, and the auth-block flag. Backend selection is
//! a pure function of target tag + URL shape. The pool yields raw page
//! bodies and never writes fragments or claims.

pub mod academic;
pub mod backoff;
pub mod browser;
pub mod searcher;

pub use academic::{AcademicLookup, HttpAcademicClient};
pub use backoff::backoff_delay;
pub use browser::{BrowserFetcher, BrowserPage, HttpBrowserClient};
pub use searcher::{HttpWebSearcher, SearchHit, WebSearcher};

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::extract::metadata;
use crate::store::EvidenceStore;
use crate::types::{AuthState, FetchConfig, Target};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Which backend a target routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchBackend {
    Search,
    Academic,
    Browser,
}

/// Pure routing: queries go to search, DOIs (and DOI-shaped URLs) to the
/// academic fast path, everything else to the browser/HTTP path.
pub fn select_backend(target: &Target) -> FetchBackend {
    match target {
        Target::Query { .. } => FetchBackend::Search,
        Target::Doi { .. } => FetchBackend::Academic,
        Target::Url { url, .. } => {
            if metadata::doi_from_url(url).is_some() {
                FetchBackend::Academic
            } else {
                FetchBackend::Browser
            }
        }
    }
}

/// One fetched document as raw bytes plus transport metadata.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub title: Option<String>,
    /// True when the body came from the archival mirror.
    pub via_wayback: bool,
}

/// Login walls and CAPTCHA interstitials that arrive as a 200.
fn looks_like_auth_wall(body: &str) -> bool {
    let lowered = if body.len() > 4096 {
        body[..4096].to_lowercase()
    } else {
        body.to_lowercase()
    };
    lowered.contains("captcha")
        || lowered.contains("log in to continue")
        || lowered.contains("sign in to view")
        || lowered.contains("access denied")
        || lowered.contains("checking your browser")
}

struct DomainGate {
    semaphore: Arc<Semaphore>,
    limiter: DirectRateLimiter,
}

impl DomainGate {
    fn new(config: &FetchConfig) -> Self {
        let rate = NonZeroU32::new(config.per_domain_rate.max(1)).unwrap_or(nonzero_ext::nonzero!(1u32));
        Self {
            semaphore: Arc::new(Semaphore::new(config.per_domain_concurrency.max(1))),
            limiter: RateLimiter::direct(Quota::per_second(rate)),
        }
    }
}

/// Rate-limited, auth-aware page retrieval.
pub struct FetchPool {
    http: reqwest::Client,
    browser: Option<Arc<dyn BrowserFetcher>>,
    store: EvidenceStore,
    config: FetchConfig,
    wayback_enabled: bool,
    gates: Mutex<HashMap<String, Arc<DomainGate>>>,
}

impl FetchPool {
    pub fn new(
        store: EvidenceStore,
        config: FetchConfig,
        wayback_enabled: bool,
        browser: Option<Arc<dyn BrowserFetcher>>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("lyra-research-runtime/0.1")
            .build()
            .map_err(|e| Error::TerminalFetch(format!("http client init: {e}")))?;
        Ok(Self {
            http,
            browser,
            store,
            config,
            wayback_enabled,
            gates: Mutex::new(HashMap::new()),
        })
    }

    /// Host portion of a URL, lowercased. Errors are terminal: a URL that
    /// does not parse will never fetch.
    pub fn domain_of(url: &str) -> Result<String> {
        let parsed =
            Url::parse(url).map_err(|e| Error::TerminalFetch(format!("invalid url {url}: {e}")))?;
        parsed
            .host_str()
            .map(|h| h.to_lowercase())
            .ok_or_else(|| Error::TerminalFetch(format!("url has no host: {url}")))
    }

    async fn gate(&self, domain: &str) -> Arc<DomainGate> {
        let mut gates = self.gates.lock().await;
        gates
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DomainGate::new(&self.config)))
            .clone()
    }

    /// Fetch one URL through the per-domain gate, preferring the browser
    /// sidecar when configured and falling back to the archival mirror on
    /// terminal failure.
    pub async fn fetch_url(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedDocument> {
        let domain = Self::domain_of(url)?;
        let record = self.store.ensure_domain(&domain).await?;
        if record.auth_state == AuthState::Blocked {
            return Err(Error::AuthBlocked { domain });
        }

        let gate = self.gate(&domain).await;
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = gate.semaphore.clone().acquire_owned() => permit
                .map_err(|_| Error::Cancelled)?,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = gate.limiter.until_ready() => {}
        }

        match self.fetch_direct(url, &domain).await {
            Ok(doc) => Ok(doc),
            Err(e @ Error::TerminalFetch(_)) if self.wayback_enabled => {
                self.fetch_wayback(url, &domain, e).await
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_direct(&self, url: &str, domain: &str) -> Result<FetchedDocument> {
        if let Some(browser) = &self.browser {
            let page = browser
                .fetch(url, Duration::from_secs(self.config.timeout_secs))
                .await?;
            if page.auth_block {
                return Err(Error::AuthBlocked {
                    domain: domain.to_string(),
                });
            }
            if let Some(e) = Error::from_fetch_status(page.status, domain, url) {
                return Err(e);
            }
            if looks_like_auth_wall(&page.body) {
                return Err(Error::AuthBlocked {
                    domain: domain.to_string(),
                });
            }
            return Ok(FetchedDocument {
                url: url.to_string(),
                status: page.status,
                body: page.body,
                title: page.title,
                via_wayback: false,
            });
        }

        let response = self.http.get(url).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        if let Some(e) = Error::from_fetch_status(status, domain, url) {
            return Err(e);
        }
        let body = response.text().await?;
        if looks_like_auth_wall(&body) {
            return Err(Error::AuthBlocked {
                domain: domain.to_string(),
            });
        }
        Ok(FetchedDocument {
            url: final_url,
            status,
            body,
            title: None,
            via_wayback: false,
        })
    }

    /// Archival-mirror fallback for pages that are gone from the live web.
    async fn fetch_wayback(
        &self,
        url: &str,
        domain: &str,
        original: Error,
    ) -> Result<FetchedDocument> {
        tracing::info!(url = %url, "terminal fetch failure, trying archival mirror");
        let archived = format!("https://web.archive.org/web/2/{url}");
        let result: Result<FetchedDocument> = async {
            let response = self.http.get(&archived).send().await?;
            let status = response.status().as_u16();
            if let Some(e) = Error::from_fetch_status(status, "web.archive.org", &archived) {
                return Err(e);
            }
            let body = response.text().await?;
            Ok(FetchedDocument {
                url: url.to_string(),
                status,
                body,
                title: None,
                via_wayback: true,
            })
        }
        .await;

        match result {
            Ok(doc) => {
                self.store.record_wayback_result(domain, true).await?;
                Ok(doc)
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "archival mirror failed too");
                self.store.record_wayback_result(domain, false).await?;
                // Surface the original failure, not the mirror's.
                Err(original)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetReason;

    #[test]
    fn queries_route_to_search() {
        let t = Target::Query {
            query: "X improves Y".into(),
        };
        assert_eq!(select_backend(&t), FetchBackend::Search);
    }

    #[test]
    fn dois_and_doi_urls_route_to_academic() {
        let t = Target::Doi {
            doi: "10.1000/xyz".into(),
            reason: TargetReason::Manual,
        };
        assert_eq!(select_backend(&t), FetchBackend::Academic);

        let t = Target::Url {
            url: "https://doi.org/10.1000/xyz".into(),
            reason: TargetReason::Manual,
        };
        assert_eq!(select_backend(&t), FetchBackend::Academic);
    }

    #[test]
    fn plain_urls_route_to_browser() {
        let t = Target::Url {
            url: "https://example.com/article".into(),
            reason: TargetReason::Manual,
        };
        assert_eq!(select_backend(&t), FetchBackend::Browser);
    }

    #[test]
    fn auth_walls_are_detected_in_bodies() {
        assert!(looks_like_auth_wall("<html>Please complete the CAPTCHA</html>"));
        assert!(looks_like_auth_wall("You must log in to continue reading"));
        assert!(!looks_like_auth_wall("<html><p>X reduces Y by 0.5</p></html>"));
    }

    #[test]
    fn domain_of_normalizes_host() {
        assert_eq!(
            FetchPool::domain_of("https://Example.COM/path").unwrap(),
            "example.com"
        );
        assert!(FetchPool::domain_of("not a url").is_err());
    }

    #[tokio::test]
    async fn blocked_domains_fail_fast() {
        let store = EvidenceStore::in_memory().await.unwrap();
        store
            .set_domain_auth_state("example.com", AuthState::Blocked)
            .await
            .unwrap();
        let pool = FetchPool::new(store, FetchConfig::default(), false, None).unwrap();
        let err = pool
            .fetch_url("https://example.com/paper", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "auth_blocked");
    }

    #[tokio::test]
    async fn cancellation_wins_over_gate_acquisition() {
        let store = EvidenceStore::in_memory().await.unwrap();
        let pool = FetchPool::new(store, FetchConfig::default(), false, None).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pool
            .fetch_url("https://example.com/paper", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }
}
