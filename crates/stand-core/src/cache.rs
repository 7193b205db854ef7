//! Last-seen provider status per job
//!
//! Lets the job monitor skip store writes when a poll returns the status it
//! already recorded. Entries are removed once a job is terminal or its poll
//! fails, so the next observation is always written.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use stand_state::JobStatus;

#[derive(Debug, Clone, Default)]
pub struct JobStatusCache {
    entries: Arc<Mutex<HashMap<i64, JobStatus>>>,
}

impl JobStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: i64) -> Option<JobStatus> {
        self.lock().get(&job_id).copied()
    }

    /// Whether `status` differs from the last recorded status of the job.
    pub fn is_new(&self, job_id: i64, status: JobStatus) -> bool {
        self.get(job_id) != Some(status)
    }

    pub fn record(&self, job_id: i64, status: JobStatus) {
        self.lock().insert(job_id, status);
    }

    pub fn clear(&self, job_id: i64) {
        self.lock().remove(&job_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, JobStatus>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_changes_are_new() {
        let cache = JobStatusCache::new();
        assert!(cache.is_new(7, JobStatus::Pending));
        cache.record(7, JobStatus::Pending);
        assert!(!cache.is_new(7, JobStatus::Pending));
        assert!(cache.is_new(7, JobStatus::Running));

        cache.clear(7);
        assert!(cache.is_empty());
        assert!(cache.is_new(7, JobStatus::Pending));
    }
}
