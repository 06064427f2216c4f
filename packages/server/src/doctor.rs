//! Doctor-style environment checks.
//!
//! Verifies that the pieces the runtime needs are actually reachable before
//! anyone queues work: the database opens and migrates, the inference
//! sidecar answers, and the search backend is configured.

use anyhow::Result;

use lyra_evidence::ml::SidecarClient;
use lyra_evidence::store::EvidenceStore;

use crate::config::Config;

pub struct CheckOutcome {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

/// Run all checks, printing one line per check. Returns false when any
/// check failed.
pub async fn run_checks(config: &Config) -> Result<bool> {
    let mut outcomes = Vec::new();

    outcomes.push(check_database(config).await);
    outcomes.push(check_sidecar(config).await);
    outcomes.push(check_search(config));
    outcomes.push(check_browser(config));

    let mut all_ok = true;
    for outcome in &outcomes {
        let mark = if outcome.ok { "ok" } else { "FAIL" };
        println!("{:<12} [{mark}] {}", outcome.name, outcome.detail);
        all_ok &= outcome.ok;
    }
    Ok(all_ok)
}

async fn check_database(config: &Config) -> CheckOutcome {
    match EvidenceStore::open(&config.database_url).await {
        Ok(_) => CheckOutcome {
            name: "database",
            ok: true,
            detail: format!("{} opens and migrates", config.database_url),
        },
        Err(e) => CheckOutcome {
            name: "database",
            ok: false,
            detail: format!("{}: {e}", config.database_url),
        },
    }
}

async fn check_sidecar(config: &Config) -> CheckOutcome {
    let client = SidecarClient::new(
        reqwest::Client::new(),
        config.sidecar_url.clone(),
        config.runtime.llm.model.clone(),
        1,
    );
    if client.healthy().await {
        CheckOutcome {
            name: "sidecar",
            ok: true,
            detail: format!("{} answers /healthz", config.sidecar_url),
        }
    } else {
        CheckOutcome {
            name: "sidecar",
            ok: false,
            detail: format!("{} unreachable", config.sidecar_url),
        }
    }
}

fn check_search(config: &Config) -> CheckOutcome {
    match &config.search_url {
        Some(url) => CheckOutcome {
            name: "search",
            ok: true,
            detail: format!("backend configured at {url}"),
        },
        None => CheckOutcome {
            name: "search",
            ok: false,
            detail: "LYRA_SEARCH_URL not set; query targets will fail".into(),
        },
    }
}

fn check_browser(config: &Config) -> CheckOutcome {
    match &config.browser_url {
        Some(url) => CheckOutcome {
            name: "browser",
            ok: true,
            detail: format!("sidecar configured at {url}"),
        },
        None => CheckOutcome {
            name: "browser",
            // Optional: URL fetches fall back to direct HTTP.
            ok: true,
            detail: "not configured; using direct HTTP fetches".into(),
        },
    }
}
