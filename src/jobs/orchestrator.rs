//! Background execution of clustering jobs.
//!
//! `submit` validates the request, stores a `pending` job and answers with a
//! [`SubmitResponse`] at once. A tokio task then waits for a concurrency permit and runs the pipeline on
//! the blocking pool. Every progress event is folded into the stored job first and
//! then, if a callback URL was registered, mirrored to it. Only the stored job is
//! authoritative; callbacks are best-effort.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::job::{Job, JobId};
use super::store::{InMemoryJobStore, JobStore};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::pipeline::{ClusterParams, ClusteringEngine, ClusteringRun, VectorBatch};
use crate::progress::{JobStatus, ProgressEvent, ProgressReporter, WebhookReporter};

/// An asynchronous clustering request.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub batch: VectorBatch,
    pub params: ClusterParams,
    /// Caller's correlation id.
    pub external_ref: String,
    /// Where to POST progress events, if anywhere.
    pub callback_url: Option<String>,
}

impl SubmitRequest {
    pub fn new(batch: VectorBatch, external_ref: impl Into<String>) -> Self {
        Self {
            batch,
            params: ClusterParams::default(),
            external_ref: external_ref.into(),
            callback_url: None,
        }
    }

    pub fn with_params(mut self, params: ClusterParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }
}

/// Immediate answer to a submission: the new job's id, always `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Owns the job table and schedules jobs onto a tokio runtime.
pub struct JobOrchestrator {
    engine: ClusteringEngine,
    store: Arc<dyn JobStore>,
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    runtime: Handle,
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("engine", &self.engine)
            .field("jobs", &self.store.len())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

impl JobOrchestrator {
    /// Orchestrator with an [`InMemoryJobStore`].
    ///
    /// Must be called from within a tokio runtime; jobs are spawned onto it.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let store = Arc::new(InMemoryJobStore::new(config.retention));
        Self::with_store(config, store)
    }

    /// Orchestrator backed by a caller-provided store.
    pub fn with_store(config: EngineConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| Error::InvalidConfig(format!("no tokio runtime: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(config.callback_timeout())
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            engine: ClusteringEngine::from_config(&config),
            store,
            client,
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            runtime,
        })
    }

    /// Replace the pipeline engine (e.g. to plug in another reducer).
    pub fn with_engine(mut self, engine: ClusteringEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Accept a job and schedule it. Never waits for clustering work.
    ///
    /// # Errors
    ///
    /// Invalid parameters are rejected here and no job is created.
    pub fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse> {
        let SubmitRequest {
            batch,
            params,
            external_ref,
            callback_url,
        } = request;
        let run = self.engine.prepare(batch, &params)?;

        let job = Job::new(external_ref.clone(), callback_url.clone());
        let response = SubmitResponse {
            job_id: job.job_id,
            status: job.status,
        };
        let job_id = job.job_id;
        info!(
            %job_id,
            external_ref = %external_ref,
            n_points = run.n_points(),
            callback = callback_url.is_some(),
            "job submitted"
        );
        self.store.put(job);

        let task = JobTask {
            job_id,
            external_ref,
            callback_url,
            store: Arc::clone(&self.store),
            client: self.client.clone(),
        };
        let permits = Arc::clone(&self.permits);
        self.runtime.spawn(task.run(run, permits));
        Ok(response)
    }

    /// Latest state of a job.
    ///
    /// # Errors
    ///
    /// [`Error::JobNotFound`] for ids that were never issued or have been evicted.
    pub fn get_status(&self, job_id: &JobId) -> Result<Job> {
        self.store
            .get(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    /// Poll until the job is terminal.
    pub async fn wait_for_terminal(&self, job_id: &JobId, poll_interval: Duration) -> Result<Job> {
        loop {
            let job = self.get_status(job_id)?;
            if job.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Number of jobs currently held by the store.
    pub fn job_count(&self) -> usize {
        self.store.len()
    }
}

struct JobTask {
    job_id: JobId,
    external_ref: String,
    callback_url: Option<String>,
    store: Arc<dyn JobStore>,
    client: reqwest::Client,
}

impl JobTask {
    async fn run(self, run: ClusteringRun, permits: Arc<Semaphore>) {
        let JobTask {
            job_id,
            external_ref,
            callback_url,
            store,
            client,
        } = self;

        let (webhook, delivery) = match callback_url {
            Some(url) => {
                let (reporter, handle) = WebhookReporter::spawn(client, url, job_id, external_ref);
                (Some(reporter), Some(handle))
            }
            None => (None, None),
        };
        let reporter = Arc::new(JobReporter {
            job_id,
            store: Arc::clone(&store),
            webhook,
        });

        match permits.acquire_owned().await {
            Ok(_permit) => {
                let worker = Arc::clone(&reporter);
                let outcome = tokio::task::spawn_blocking(move || run.execute(&*worker)).await;
                match outcome {
                    Ok(Ok(result)) => info!(
                        %job_id,
                        clusters = result.cluster_count,
                        noise = result.noise_ids.len(),
                        "job completed"
                    ),
                    Ok(Err(e)) => info!(%job_id, error = %e, "job failed"),
                    Err(e) => {
                        error!(%job_id, error = %e, "clustering task aborted");
                        let progress = store.get(&job_id).map_or(0, |job| job.progress);
                        reporter.report(&ProgressEvent::failed(progress, format!("clustering task aborted: {e}")));
                    }
                }
            }
            Err(e) => {
                error!(%job_id, error = %e, "job scheduler closed");
                reporter.report(&ProgressEvent::failed(0, "job scheduler closed"));
            }
        }

        // Dropping the last reporter lets the delivery task drain and exit.
        drop(reporter);
        if let Some(delivery) = delivery {
            if let Err(e) = delivery.await {
                warn!(%job_id, error = %e, "callback delivery task aborted");
            }
        }
    }
}

/// Folds events into the stored job, then mirrors them to the callback.
struct JobReporter {
    job_id: JobId,
    store: Arc<dyn JobStore>,
    webhook: Option<WebhookReporter>,
}

impl ProgressReporter for JobReporter {
    fn report(&self, event: &ProgressEvent) {
        let mut applied = false;
        let known = self.store.update(&self.job_id, &mut |job| applied = job.apply(event));
        if !known {
            warn!(job_id = %self.job_id, "job vanished from the store");
        } else if !applied {
            warn!(job_id = %self.job_id, status = %event.status, "ignoring event for finished job");
            return;
        }
        if let Some(webhook) = &self.webhook {
            webhook.report(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::DistanceMetric;
    use crate::pipeline::ClusteringParams;

    fn batch() -> VectorBatch {
        let vectors = (0..10)
            .map(|i| if i < 5 { vec![0.0, 0.0] } else { vec![10.0, 10.0] })
            .collect();
        VectorBatch::new(vectors, (0..10).collect()).unwrap()
    }

    fn params() -> ClusterParams {
        ClusterParams {
            clustering: ClusteringParams {
                min_cluster_size: 2,
                distance_metric: DistanceMetric::Euclidean,
                ..ClusteringParams::default()
            },
            ..ClusterParams::default()
        }
    }

    #[test]
    fn new_requires_a_runtime() {
        let err = JobOrchestrator::new(EngineConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let config = EngineConfig {
            max_concurrent_jobs: 0,
            ..EngineConfig::default()
        };
        assert!(JobOrchestrator::new(config).is_err());
    }

    #[tokio::test]
    async fn submitted_job_completes() {
        let orchestrator = JobOrchestrator::new(EngineConfig::default()).unwrap();
        let job_id = orchestrator
            .submit(SubmitRequest::new(batch(), "album-1").with_params(params()))
            .unwrap()
            .job_id;
        let job = orchestrator
            .wait_for_terminal(&job_id, Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.external_ref, "album-1");
        assert_eq!(job.result.unwrap().cluster_count, 2);
        assert_eq!(orchestrator.job_count(), 1);
    }

    #[tokio::test]
    async fn submit_response_is_pending_on_the_wire() {
        let orchestrator = JobOrchestrator::new(EngineConfig::default()).unwrap();
        let response = orchestrator
            .submit(SubmitRequest::new(batch(), "album-2").with_params(params()))
            .unwrap();
        assert_eq!(response.status, JobStatus::Pending);

        let json = serde_json::to_value(response).unwrap();
        assert_eq!(json["job_id"], response.job_id.to_string());
        assert_eq!(json["status"], "pending");
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let orchestrator = JobOrchestrator::new(EngineConfig::default()).unwrap();
        let err = orchestrator.get_status(&JobId::new()).unwrap_err();
        assert!(matches!(err, Error::JobNotFound(_)));
    }
}
