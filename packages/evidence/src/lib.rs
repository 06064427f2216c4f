//! # Lyra Evidence Library
//!
//! The evidence graph and research pipeline behind the Lyra runtime:
//! fetching candidate documents, extracting fragments and claims,
//! cross-verifying claims with NLI scoring, and recording citation edges,
//! all over a single persistent store.
//!
//! ## Architecture
//!
//! ```text
//! FETCH → EXTRACT → STORE → VERIFY → CITE
//!
//! 1. FetchPool retrieves SERPs, pages, and academic records
//!    (per-domain rate limits, auth-block parking, archival fallback)
//! 2. Extractor turns one document into fragments + anchored claims,
//!    committed atomically per page
//! 3. EvidenceStore owns every persistent row and the named views
//! 4. NliVerifier scores independent fragments against each claim and
//!    maintains the confidence aggregate
//! 5. CitationIngestor records outbound references as CITES edges and
//!    user-gated citation candidates
//! ```
//!
//! ## Design rules
//!
//! | Rule | Consequence |
//! |------|-------------|
//! | Store owns the graph | components share rows by id, never by pointer |
//! | Independence | SUPPORTS/REFUTES edges never come from an ORIGIN page |
//! | Confidence is navigation | 0.5 prior, trust-weighted, not a probability |
//! | User gates the chase | citation candidates fetch only on selection |
//!
//! ## Modules
//!
//! - [`types`] - record types shared across the runtime
//! - [`store`] - SQLite-backed graph with views and vector search
//! - [`fetch`] - per-domain-coordinated retrieval backends
//! - [`extract`] - content cleaning, fragmentation, metadata, claims
//! - [`verify`] - cross-source NLI scoring and confidence updates
//! - [`citations`] - reference parsing and citation candidates
//! - [`ml`] - local inference sidecar traits and client
//! - [`testing`] - mock collaborators for tests

pub mod citations;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod ml;
pub mod store;
pub mod testing;
pub mod types;
pub mod verify;

pub use error::{Error, Result};
pub use store::{
    CitationCandidate, ClaimDraft, ClaimInsert, EvidenceStore, ExtractionCommit, ExtractionWrite,
    VectorHit, VectorTarget, ViewName, ViewPage,
};
pub use types::{
    AdoptionStatus, AuthState, Claim, DomainRecord, Edge, Fragment, FragmentDraft, JobKind,
    JobPayload, JobPhase, JobRecord, JobState, NewEdge, NewPage, NliConfig, NliThresholds,
    NodeKind, Page, Relation, RuntimeConfig, Target, TargetReason, Task, TaskStatus, TrustLevel,
    Work, WorkRecord,
};

pub use citations::{CitationIngestor, CitationOutcome};
pub use extract::{ExtractOutcome, Extractor};
pub use fetch::{
    select_backend, AcademicLookup, BrowserFetcher, FetchBackend, FetchPool, FetchedDocument,
    HttpAcademicClient, HttpBrowserClient, HttpWebSearcher, SearchHit, WebSearcher,
};
pub use ml::{ClaimModel, EmbeddingModel, NliClass, NliModel, NliScores, RawClaim, SidecarClient};
pub use verify::{NliVerifier, VerifyOutcome};
