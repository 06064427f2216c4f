//! Core record types for the evidence graph.
//!
//! Rows are shared across components by id, never by reference: workers hold
//! short-lived copies for the duration of a job and the store owns every
//! persistent row.

pub mod claim;
pub mod config;
pub mod domain;
pub mod edge;
pub mod job;
pub mod page;
pub mod target;
pub mod task;
pub mod work;

pub use claim::{normalize_claim_text, AdoptionStatus, Claim};
pub use config::{
    FetchConfig, LlmConfig, NliConfig, NliThresholds, RuntimeConfig, SchedulerConfig, TaskConfig,
    WaybackConfig,
};
pub use domain::{AuthState, DomainRecord, TrustLevel};
pub use edge::{Edge, NewEdge, NodeKind, Relation};
pub use job::{JobKind, JobPhase, JobPayload, JobRecord, JobState};
pub use page::{Fragment, FragmentDraft, NewPage, Page, FRAGMENT_MAX_CHARS};
pub use target::{Target, TargetReason};
pub use task::{Task, TaskStatus};
pub use work::{Author, Work, WorkRecord};
