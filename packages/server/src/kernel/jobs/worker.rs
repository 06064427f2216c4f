//! Worker pools draining the job queue.
//!
//! Two pools run over the same queue with different phase sets: fetch-bound
//! workers take exploration and citation jobs, NLI-bound workers take
//! verification jobs. Each job runs under its task's cancellation token,
//! checked at every suspension point inside the handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lyra_evidence::error::Result;
use lyra_evidence::types::{JobPhase, JobRecord};

use super::queue::{JobQueue, NewJob};

/// Handler executing one claimed job. Returns the follow-on jobs the phase
/// graph demands.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobRecord, cancel: &CancellationToken) -> Result<Vec<NewJob>>;
}

/// Per-task cancellation tokens, child tokens of the runtime root.
#[derive(Default)]
pub struct TaskCancellations {
    root: CancellationToken,
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl TaskCancellations {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub async fn token_for(&self, task_id: Uuid) -> CancellationToken {
        let mut tokens = self.tokens.lock().await;
        tokens
            .entry(task_id)
            .or_insert_with(|| self.root.child_token())
            .clone()
    }

    /// Cancel a task's running jobs. Queued jobs are discarded separately.
    pub async fn cancel_task(&self, task_id: Uuid) {
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.remove(&task_id) {
            token.cancel();
        }
    }
}

const IDLE_POLL: Duration = Duration::from_millis(250);
const CLAIM_BATCH: i64 = 1;

/// A pool of identical workers over one phase set.
pub struct WorkerPool {
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    cancellations: Arc<TaskCancellations>,
    phases: Vec<JobPhase>,
    size: usize,
    name: &'static str,
}

impl WorkerPool {
    pub fn new(
        queue: JobQueue,
        handler: Arc<dyn JobHandler>,
        cancellations: Arc<TaskCancellations>,
        phases: Vec<JobPhase>,
        size: usize,
        name: &'static str,
    ) -> Self {
        Self {
            queue,
            handler,
            cancellations,
            phases,
            size: size.max(1),
            name,
        }
    }

    /// Spawn the workers. They run until `shutdown` fires, finishing the
    /// job in hand before exiting.
    pub fn spawn(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let pool = Arc::new(self);
        (0..pool.size)
            .map(|n| {
                let pool = pool.clone();
                let shutdown = shutdown.clone();
                let worker_id = format!("{}-{}", pool.name, n);
                tokio::spawn(async move {
                    pool.run_worker(&worker_id, shutdown).await;
                })
            })
            .collect()
    }

    async fn run_worker(&self, worker_id: &str, shutdown: CancellationToken) {
        tracing::debug!(worker = worker_id, phases = ?self.phases, "worker started");
        let notify = self.queue.notify();
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let claimed = match self.queue.claim(worker_id, &self.phases, CLAIM_BATCH).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!(worker = worker_id, error = %e, "claim failed");
                    tokio::time::sleep(IDLE_POLL).await;
                    continue;
                }
            };

            if claimed.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
                continue;
            }

            for job in claimed {
                self.process(worker_id, job).await;
            }
        }
        tracing::debug!(worker = worker_id, "worker stopped");
    }

    async fn process(&self, worker_id: &str, job: JobRecord) {
        let cancel = self.cancellations.token_for(job.task_id).await;
        tracing::debug!(worker = worker_id, job_id = %job.id, kind = ?job.kind, "job started");

        match self.handler.handle(&job, &cancel).await {
            Ok(follow_ons) => {
                for next in follow_ons {
                    if let Err(e) = self.queue.enqueue(next).await {
                        tracing::error!(job_id = %job.id, error = %e, "follow-on enqueue failed");
                    }
                }
                if let Err(e) = self.queue.mark_completed(job.id).await {
                    tracing::error!(job_id = %job.id, error = %e, "failed to mark completed");
                }
            }
            Err(error) => {
                if let Err(e) = self.queue.mark_failed(&job, &error).await {
                    tracing::error!(job_id = %job.id, error = %e, "failed to mark failed");
                }
            }
        }
    }
}
