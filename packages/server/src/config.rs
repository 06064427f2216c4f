//! Application configuration loaded from environment variables.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use std::env;

use lyra_evidence::types::{
    FetchConfig, LlmConfig, NliConfig, NliThresholds, RuntimeConfig, SchedulerConfig, TaskConfig,
    WaybackConfig,
};

/// Server configuration: runtime tuning plus the endpoints of the external
/// collaborators.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub sidecar_url: String,
    pub search_url: Option<String>,
    pub search_api_key: Option<SecretString>,
    pub browser_url: Option<String>,
    pub academic_url: String,
    pub runtime: RuntimeConfig,
}

fn var_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{name} must be a valid value")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables, with `.env` support
    /// in development.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let runtime = RuntimeConfig {
            llm: LlmConfig {
                model: env::var("LYRA_LLM_MODEL").unwrap_or_else(|_| "lyra-extract-7b".into()),
            },
            nli: NliConfig {
                thresholds: NliThresholds {
                    entail: var_or("LYRA_NLI_THRESHOLD_ENTAIL", 0.6)?,
                    neutral: var_or("LYRA_NLI_THRESHOLD_NEUTRAL", 0.7)?,
                    contradict: var_or("LYRA_NLI_THRESHOLD_CONTRADICT", 0.6)?,
                },
                candidate_k: var_or("LYRA_NLI_CANDIDATE_K", 16usize)?,
            },
            fetch: FetchConfig {
                per_domain_concurrency: var_or("LYRA_FETCH_PER_DOMAIN_CONCURRENCY", 2usize)?,
                per_domain_rate: var_or("LYRA_FETCH_PER_DOMAIN_RATE", 1u32)?,
                timeout_secs: var_or("LYRA_FETCH_TIMEOUT_SECS", 30u64)?,
                max_attempts: var_or("LYRA_FETCH_MAX_ATTEMPTS", 3i64)?,
            },
            scheduler: SchedulerConfig {
                worker_pool_size: var_or("LYRA_WORKER_POOL_SIZE", 8usize)?,
                nli_pool_size: var_or("LYRA_NLI_POOL_SIZE", 2usize)?,
            },
            task: TaskConfig {
                default_budget: var_or("LYRA_TASK_DEFAULT_BUDGET", 200i64)?,
            },
            wayback: WaybackConfig {
                enabled: var_or("LYRA_WAYBACK_ENABLED", true)?,
            },
        };

        Ok(Self {
            database_url: env::var("LYRA_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:lyra.db?mode=rwc".into()),
            port: var_or("LYRA_PORT", 8080u16)?,
            sidecar_url: env::var("LYRA_SIDECAR_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9090".into()),
            search_url: env::var("LYRA_SEARCH_URL").ok(),
            search_api_key: env::var("LYRA_SEARCH_API_KEY").ok().map(SecretString::from),
            browser_url: env::var("LYRA_BROWSER_URL").ok(),
            academic_url: env::var("LYRA_ACADEMIC_URL")
                .unwrap_or_else(|_| "https://api.crossref.org".into()),
            runtime,
        })
    }
}
