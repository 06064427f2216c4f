//! Runtime tuning knobs.
//!
//! The server crate populates this from environment variables; tests build
//! it directly with tightened limits.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub llm: LlmConfig,
    pub nli: NliConfig,
    pub fetch: FetchConfig,
    pub scheduler: SchedulerConfig,
    pub task: TaskConfig,
    pub wayback: WaybackConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            nli: NliConfig::default(),
            fetch: FetchConfig::default(),
            scheduler: SchedulerConfig::default(),
            task: TaskConfig::default(),
            wayback: WaybackConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Identifier of the local model used for claim extraction.
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "lyra-extract-7b".into(),
        }
    }
}

/// Per-class minimum confidence for emitting an NLI edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NliThresholds {
    pub entail: f64,
    pub neutral: f64,
    pub contradict: f64,
}

impl Default for NliThresholds {
    fn default() -> Self {
        Self {
            entail: 0.6,
            neutral: 0.7,
            contradict: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NliConfig {
    pub thresholds: NliThresholds,
    /// Upper bound on candidate fragments scored per claim.
    pub candidate_k: usize,
}

impl Default for NliConfig {
    fn default() -> Self {
        Self {
            thresholds: NliThresholds::default(),
            candidate_k: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub per_domain_concurrency: usize,
    /// Sustained requests per second per domain.
    pub per_domain_rate: u32,
    pub timeout_secs: u64,
    pub max_attempts: i64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            per_domain_concurrency: 2,
            per_domain_rate: 1,
            timeout_secs: 30,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Fetch-bound worker count (exploration + citation phases).
    pub worker_pool_size: usize,
    /// NLI-bound worker count (verification phase).
    pub nli_pool_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 8,
            nli_pool_size: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Default per-task budget in fetch units.
    pub default_budget: i64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self { default_budget: 200 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaybackConfig {
    pub enabled: bool,
}

impl Default for WaybackConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
