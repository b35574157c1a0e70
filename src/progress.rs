//! Progress events and the reporters that deliver them.
//!
//! The pipeline emits a fixed sequence of checkpoints through a
//! [`ProgressReporter`] and never knows where they go:
//!
//! | progress | status       | when                                     |
//! |----------|--------------|------------------------------------------|
//! | 10       | `clustering` | reduction starting (only if it runs)     |
//! | 30       | `clustering` | reduction finished or fell back          |
//! | 60       | `clustering` | density clustering running               |
//! | 90       | `clustering` | assembling results                       |
//! | 100      | `completed`  | result attached                          |
//!
//! A failure produces one `failed` event at the last progress value reached, so the
//! sequence stays non-decreasing and always ends with exactly one terminal event.
//!
//! Two strategies are provided: [`ChannelReporter`] pushes events into a caller-owned
//! channel, [`WebhookReporter`] POSTs them to a remote URL.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::jobs::JobId;
use crate::pipeline::ClusteringResult;

/// Lifecycle state shared by progress events and jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, not started.
    Pending,
    /// A pipeline stage is running.
    Clustering,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// `completed` or `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Clustering => "clustering",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: JobStatus,
    /// Percentage in `[0, 100]`.
    pub progress: u8,
    pub message: String,
    /// Present only on `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ClusteringResult>,
    /// Present only on `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    /// A non-terminal checkpoint.
    pub fn running(progress: u8, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Clustering,
            progress: progress.min(99),
            message: message.into(),
            result: None,
            error: None,
        }
    }

    /// The successful terminal event.
    pub fn completed(result: ClusteringResult) -> Self {
        Self {
            status: JobStatus::Completed,
            progress: 100,
            message: format!("completed with {} clusters", result.cluster_count),
            result: Some(result),
            error: None,
        }
    }

    /// The failing terminal event, reported at the last progress value reached.
    pub fn failed(progress: u8, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status: JobStatus::Failed,
            progress: progress.min(100),
            message: format!("failed: {error}"),
            result: None,
            error: Some(error),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Receiver of pipeline progress events.
///
/// Implementations must not block for long: the pipeline calls `report` inline
/// between stages.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

impl<F> ProgressReporter for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Sink strategy: forwards events into a channel owned by the caller.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: &ProgressEvent) {
        // A dropped receiver means nobody is listening any more.
        if self.tx.send(event.clone()).is_err() {
            debug!(progress = event.progress, "progress receiver dropped");
        }
    }
}

/// A [`ChannelReporter`] and the receiving end of its channel.
pub fn channel() -> (ChannelReporter, UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelReporter::new(tx), rx)
}

/// Body of each remote notification.
#[derive(Debug, Serialize)]
pub struct CallbackPayload<'a> {
    pub job_id: JobId,
    pub external_ref: &'a str,
    #[serde(flatten)]
    pub event: &'a ProgressEvent,
}

/// Remote-callback strategy: POSTs every event to a caller-registered URL.
///
/// `report` only enqueues; a single delivery task sends events one at a time in
/// the order they were reported. Delivery is best-effort: a failed or timed-out
/// POST is logged and the next event is attempted. Nothing is retried.
///
/// The delivery task ends once every clone of the reporter has been dropped and
/// the queue is drained.
#[derive(Debug, Clone)]
pub struct WebhookReporter {
    tx: UnboundedSender<ProgressEvent>,
}

impl WebhookReporter {
    /// Start the delivery task on the current tokio runtime.
    ///
    /// The per-request timeout is whatever `client` was built with.
    pub fn spawn(
        client: reqwest::Client,
        url: String,
        job_id: JobId,
        external_ref: String,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let payload = CallbackPayload {
                    job_id,
                    external_ref: &external_ref,
                    event: &event,
                };
                let started = Instant::now();
                match deliver(&client, &url, &payload).await {
                    Ok(()) => debug!(
                        %job_id,
                        progress = event.progress,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "callback delivered"
                    ),
                    Err(e) => warn!(%job_id, %url, status = %event.status, error = %e, "dropping callback"),
                }
            }
        });
        (Self { tx }, handle)
    }
}

impl ProgressReporter for WebhookReporter {
    fn report(&self, event: &ProgressEvent) {
        if self.tx.send(event.clone()).is_err() {
            warn!(status = %event.status, "callback delivery task is gone");
        }
    }
}

async fn deliver(client: &reqwest::Client, url: &str, payload: &CallbackPayload<'_>) -> Result<()> {
    client
        .post(url)
        .json(payload)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map(drop)
        .map_err(|e| Error::CallbackDeliveryFailed(e.to_string()))
}
