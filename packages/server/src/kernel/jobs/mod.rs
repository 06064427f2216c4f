//! Job infrastructure: queue, worker pools, cancellation registry.
//!
//! ```text
//! API enqueues targets
//!     │
//!     └─► JobQueue (rows in the shared store)
//!
//! WorkerPool (fetch-bound)          WorkerPool (NLI-bound)
//!     │ claim exploration/citation      │ claim verification
//!     ├─► Scheduler.handle(job)         ├─► Scheduler.handle(job)
//!     ├─► enqueue follow-on jobs        │
//!     └─► mark completed/failed         └─► mark completed/failed
//! ```

pub mod queue;
pub mod worker;

pub use queue::{EnqueueResult, JobQueue, NewJob};
pub use worker::{JobHandler, TaskCancellations, WorkerPool};
