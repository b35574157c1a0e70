use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::pipeline::ClusteringResult;
use crate::progress::{JobStatus, ProgressEvent};

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = Error;

    /// Malformed ids can never name a job, so they parse to [`Error::JobNotFound`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::JobNotFound(s.to_string()))
    }
}

/// State of one asynchronously submitted clustering job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ClusteringResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Caller's correlation id, echoed in callbacks.
    pub external_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A `pending` job at progress 0.
    pub fn new(external_ref: impl Into<String>, callback_url: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            status: JobStatus::Pending,
            progress: 0,
            message: "queued".to_string(),
            result: None,
            error: None,
            external_ref: external_ref.into(),
            callback_url,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fold `event` into the record.
    ///
    /// Returns `false`, leaving the job untouched, once the job is terminal.
    /// Progress never moves backwards.
    pub fn apply(&mut self, event: &ProgressEvent) -> bool {
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = event.status;
        self.progress = self.progress.max(event.progress);
        self.message.clone_from(&event.message);
        if event.result.is_some() {
            self.result.clone_from(&event.result);
        }
        if event.error.is_some() {
            self.error.clone_from(&event.error);
        }
        self.updated_at = now;
        if event.is_terminal() {
            self.finished_at = Some(now);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_pending() {
        let job = Job::new("album-1", None);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn apply_tracks_events_until_terminal() {
        let mut job = Job::new("album-1", None);
        assert!(job.apply(&ProgressEvent::running(60, "clustering")));
        assert_eq!(job.status, JobStatus::Clustering);
        assert_eq!(job.progress, 60);

        assert!(job.apply(&ProgressEvent::failed(60, "boom")));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.finished_at.is_some());

        let frozen = job.clone();
        assert!(!job.apply(&ProgressEvent::running(90, "late")));
        assert_eq!(job, frozen);
    }

    #[test]
    fn progress_does_not_regress() {
        let mut job = Job::new("x", None);
        job.apply(&ProgressEvent::running(60, "a"));
        job.apply(&ProgressEvent::running(30, "b"));
        assert_eq!(job.progress, 60);
    }

    #[test]
    fn job_id_round_trips_through_display() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!(matches!("nope".parse::<JobId>(), Err(Error::JobNotFound(_))));
    }

    #[test]
    fn serialized_job_uses_wire_names() {
        let job = Job::new("ext", None);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["job_id"], job.job_id.to_string());
        assert!(json.get("result").is_none());
    }
}
