use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::job::{Job, JobId};
use crate::config::RetentionPolicy;

/// Shared table of jobs.
///
/// Readers always see a whole job: `update` applies its closure under the store's
/// write lock, so concurrent polls never observe a half-applied event.
pub trait JobStore: Send + Sync {
    /// Insert or replace a job.
    fn put(&self, job: Job);

    /// Snapshot of a job.
    fn get(&self, job_id: &JobId) -> Option<Job>;

    /// Mutate a job in place. Returns `false` when the id is unknown.
    fn update(&self, job_id: &JobId, f: &mut dyn FnMut(&mut Job)) -> bool;

    /// Number of jobs held.
    fn len(&self) -> usize;
}

/// Process-local [`JobStore`] with bounded retention of finished jobs.
///
/// Eviction runs on every `put` and whenever an `update` finishes a job. `get`
/// never returns a job past its TTL, even before it has been evicted. Jobs still
/// pending or running are never evicted.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    retention: RetentionPolicy,
}

impl InMemoryJobStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Evict expired finished jobs, then the oldest beyond capacity.
    ///
    /// Returns the number of evicted jobs.
    pub fn prune(&self) -> usize {
        let mut jobs = self.jobs.write();
        prune_locked(&mut jobs, &self.retention)
    }
}

fn prune_locked(jobs: &mut HashMap<JobId, Job>, retention: &RetentionPolicy) -> usize {
    let before = jobs.len();
    let now = Utc::now();
    let ttl = retention.finished_ttl();
    jobs.retain(|_, job| !expired(job, now, ttl));

    let mut finished: Vec<_> = jobs
        .values()
        .filter_map(|job| job.finished_at.map(|at| (at, job.job_id)))
        .collect();
    if finished.len() > retention.max_finished_jobs {
        finished.sort_unstable_by_key(|&(at, _)| at);
        let excess = finished.len() - retention.max_finished_jobs;
        for (_, job_id) in finished.into_iter().take(excess) {
            jobs.remove(&job_id);
        }
    }

    let evicted = before - jobs.len();
    if evicted > 0 {
        debug!(evicted, remaining = jobs.len(), "evicted finished jobs");
    }
    evicted
}

fn expired(job: &Job, now: DateTime<Utc>, ttl: Duration) -> bool {
    match job.finished_at {
        // `to_std` fails for negative ages (clock skew); keep those.
        Some(finished) => (now - finished).to_std().is_ok_and(|age| age > ttl),
        None => false,
    }
}

impl JobStore for InMemoryJobStore {
    fn put(&self, job: Job) {
        let mut jobs = self.jobs.write();
        jobs.insert(job.job_id, job);
        prune_locked(&mut jobs, &self.retention);
    }

    fn get(&self, job_id: &JobId) -> Option<Job> {
        let ttl = self.retention.finished_ttl();
        self.jobs
            .read()
            .get(job_id)
            .filter(|job| !expired(job, Utc::now(), ttl))
            .cloned()
    }

    fn update(&self, job_id: &JobId, f: &mut dyn FnMut(&mut Job)) -> bool {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(job_id) else {
            return false;
        };
        let was_terminal = job.is_terminal();
        f(job);
        if !was_terminal && job.is_terminal() {
            prune_locked(&mut jobs, &self.retention);
        }
        true
    }

    fn len(&self) -> usize {
        self.jobs.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressEvent;
    use std::sync::Arc;

    fn finished(store: &InMemoryJobStore) -> JobId {
        let job = Job::new("x", None);
        let id = job.job_id;
        store.put(job);
        // Distinct finish times keep eviction order deterministic.
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(store.update(&id, &mut |j| {
            j.apply(&ProgressEvent::failed(0, "done"));
        }));
        id
    }

    #[test]
    fn put_get_update() {
        let store = InMemoryJobStore::default();
        let job = Job::new("album", None);
        let id = job.job_id;
        store.put(job);
        assert_eq!(store.len(), 1);

        assert!(store.update(&id, &mut |j| {
            j.apply(&ProgressEvent::running(60, "clustering"));
        }));
        assert_eq!(store.get(&id).unwrap().progress, 60);

        let unknown = JobId::new();
        assert!(store.get(&unknown).is_none());
        assert!(!store.update(&unknown, &mut |_| {}));
    }

    #[test]
    fn evicts_oldest_finished_beyond_capacity() {
        let store = InMemoryJobStore::new(RetentionPolicy {
            max_finished_jobs: 2,
            finished_ttl_secs: 3600,
        });
        let oldest = finished(&store);
        let middle = finished(&store);
        let running = Job::new("running", None);
        let running_id = running.job_id;
        store.put(running);
        assert_eq!(store.len(), 3);

        let newest = finished(&store);
        // Finishing `newest` pushed the finished count past capacity.
        assert_eq!(store.len(), 3);
        assert_eq!(store.prune(), 0);
        assert!(store.get(&oldest).is_none());
        assert!(store.get(&middle).is_some());
        assert!(store.get(&newest).is_some());
        assert!(store.get(&running_id).is_some());
    }

    #[test]
    fn evicts_expired_but_never_running_jobs() {
        let store = InMemoryJobStore::new(RetentionPolicy {
            max_finished_jobs: 10,
            finished_ttl_secs: 0,
        });
        let done = finished(&store);
        let running = Job::new("running", None);
        let running_id = running.job_id;
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.put(running);
        assert!(store.get(&done).is_none());
        assert!(store.get(&running_id).is_some());
    }

    #[test]
    fn expired_jobs_are_hidden_without_further_writes() {
        let store = InMemoryJobStore::new(RetentionPolicy {
            max_finished_jobs: 10,
            finished_ttl_secs: 0,
        });
        let job = Job::new("x", None);
        let id = job.job_id;
        store.put(job);
        assert!(store.update(&id, &mut |j| {
            j.apply(&ProgressEvent::running(30, "reducing"));
        }));
        assert!(store.get(&id).is_some());

        // Bypass `update` so the finished job is still in the table.
        store.jobs.write().get_mut(&id).unwrap().apply(&ProgressEvent::failed(30, "done"));
        assert_eq!(store.len(), 1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(store.get(&id).is_none());
        assert_eq!(store.prune(), 1);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = Arc::new(InMemoryJobStore::default());
        let ids: Vec<JobId> = (0..8)
            .map(|i| {
                let job = Job::new(format!("ref-{i}"), None);
                let id = job.job_id;
                store.put(job);
                id
            })
            .collect();

        let handles: Vec<_> = ids
            .iter()
            .copied()
            .map(|id| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for p in [10u8, 30, 60, 90] {
                        store.update(&id, &mut |j| {
                            j.apply(&ProgressEvent::running(p, "step"));
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for id in ids {
            assert_eq!(store.get(&id).unwrap().progress, 90);
        }
    }
}
