//! Runtime kernel: wiring of store, fetch pool, pipeline, and workers.

pub mod jobs;
pub mod scheduler;

pub use scheduler::{
    CandidatePreview, CandidateSelection, Milestones, PhaseCounters, QueryMetrics, Scheduler,
    StatusDetail, TaskStatusReport, WaitingFor,
};

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lyra_evidence::error::Result;
use lyra_evidence::extract::Extractor;
use lyra_evidence::fetch::{
    AcademicLookup, BrowserFetcher, FetchPool, HttpAcademicClient, HttpBrowserClient,
    HttpWebSearcher, WebSearcher,
};
use lyra_evidence::ml::{ClaimModel, EmbeddingModel, NliModel, SidecarClient};
use lyra_evidence::store::EvidenceStore;
use lyra_evidence::types::{JobPhase, RuntimeConfig};
use lyra_evidence::verify::NliVerifier;

use crate::config::Config;
use jobs::{JobQueue, TaskCancellations, WorkerPool};

/// The assembled runtime: one store, one scheduler, two worker pools.
pub struct RuntimeKernel {
    pub store: EvidenceStore,
    pub scheduler: Arc<Scheduler>,
    embedder: Arc<dyn EmbeddingModel>,
    cancellations: Arc<TaskCancellations>,
    shutdown: CancellationToken,
    worker_pool_size: usize,
    nli_pool_size: usize,
}

/// External collaborators, injectable for tests.
pub struct Collaborators {
    pub searcher: Arc<dyn WebSearcher>,
    pub academic: Arc<dyn AcademicLookup>,
    pub browser: Option<Arc<dyn BrowserFetcher>>,
    pub claims: Arc<dyn ClaimModel>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub nli: Arc<dyn NliModel>,
}

impl Collaborators {
    /// Production wiring from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::new();
        let sidecar = Arc::new(SidecarClient::new(
            http.clone(),
            config.sidecar_url.clone(),
            config.runtime.llm.model.clone(),
            config.runtime.scheduler.nli_pool_size.max(2),
        ));

        let searcher: Arc<dyn WebSearcher> = Arc::new(HttpWebSearcher::new(
            http.clone(),
            config
                .search_url
                .clone()
                .unwrap_or_else(|| "http://127.0.0.1:9091".into()),
            config.search_api_key.clone(),
        ));
        let academic: Arc<dyn AcademicLookup> = Arc::new(HttpAcademicClient::new(
            http.clone(),
            config.academic_url.clone(),
        ));
        let browser: Option<Arc<dyn BrowserFetcher>> = config
            .browser_url
            .as_ref()
            .map(|url| Arc::new(HttpBrowserClient::new(http, url.clone())) as Arc<dyn BrowserFetcher>);

        Ok(Self {
            searcher,
            academic,
            browser,
            claims: sidecar.clone(),
            embedder: sidecar.clone(),
            nli: sidecar,
        })
    }
}

impl RuntimeKernel {
    /// Assemble the runtime over an opened store.
    pub fn assemble(
        store: EvidenceStore,
        runtime: RuntimeConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let notify = Arc::new(Notify::new());
        let queue = JobQueue::new(store.pool().clone(), notify);
        let cancellations = Arc::new(TaskCancellations::new(shutdown.clone()));

        let fetch = FetchPool::new(
            store.clone(),
            runtime.fetch.clone(),
            runtime.wayback.enabled,
            collaborators.browser.clone(),
        )?;
        let extractor = Extractor::new(
            collaborators.claims.clone(),
            collaborators.embedder.clone(),
            Some(collaborators.academic.clone()),
        );
        let verifier = NliVerifier::new(
            collaborators.nli.clone(),
            collaborators.embedder.clone(),
            runtime.nli.clone(),
        );

        let worker_pool_size = runtime.scheduler.worker_pool_size;
        let nli_pool_size = runtime.scheduler.nli_pool_size;
        let embedder = collaborators.embedder.clone();

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            queue,
            fetch,
            collaborators.searcher,
            collaborators.academic,
            extractor,
            verifier,
            cancellations.clone(),
            runtime,
        ));

        Ok(Self {
            store,
            scheduler,
            embedder,
            cancellations,
            shutdown,
            worker_pool_size,
            nli_pool_size,
        })
    }

    /// Embed a query and run nearest-neighbour search over claims or
    /// fragments.
    pub async fn vector_search(
        &self,
        query: &str,
        target: lyra_evidence::store::VectorTarget,
        task_id: Option<uuid::Uuid>,
        k: usize,
    ) -> Result<Vec<lyra_evidence::store::VectorHit>> {
        let vector = self.embedder.embed(query).await?;
        self.store.vector_search(&vector, target, task_id, k).await
    }

    /// Spawn the fetch-bound and NLI-bound worker pools.
    pub fn start_workers(&self) -> Vec<JoinHandle<()>> {
        let mut handles = WorkerPool::new(
            self.scheduler.queue().clone(),
            self.scheduler.clone(),
            self.cancellations.clone(),
            vec![JobPhase::Exploration, JobPhase::Citation],
            self.worker_pool_size,
            "fetch",
        )
        .spawn(self.shutdown.clone());

        handles.extend(
            WorkerPool::new(
                self.scheduler.queue().clone(),
                self.scheduler.clone(),
                self.cancellations.clone(),
                vec![JobPhase::Verification],
                self.nli_pool_size,
                "nli",
            )
            .spawn(self.shutdown.clone()),
        );
        handles
    }

    /// Signal all workers to finish their current job and exit.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
