// src/registry/jobs.rs

use std::collections::HashMap;

use tracing::debug;

use crate::types::{BackendKind, Channel, JobId, JobState, SurfaceId};

/// One tracked request, from `start` until its terminal event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub channel: Channel,
    pub requester: SurfaceId,
    pub backend: BackendKind,
    pub state: JobState,
}

/// Authoritative table of in-flight jobs.
///
/// A job is present iff it has not reached [`JobState::Terminal`]. Every
/// lookup for an unknown id returns `None` instead of failing, since cancel
/// and natural exit can race to finalize the same job.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending job under a fresh id.
    pub fn create(
        &mut self,
        channel: Channel,
        requester: SurfaceId,
        backend: BackendKind,
    ) -> JobId {
        let id = loop {
            let candidate = JobId::generate();
            if !self.jobs.contains_key(&candidate) {
                break candidate;
            }
        };

        debug!(job_id = %id, %channel, %requester, %backend, "job registered");
        self.jobs.insert(
            id.clone(),
            Job {
                id: id.clone(),
                channel,
                requester,
                backend,
                state: JobState::Pending,
            },
        );
        id
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Update the state of a live job. Returns `false` for unknown ids.
    pub fn set_state(&mut self, id: &JobId, state: JobState) -> bool {
        match self.jobs.get_mut(id) {
            Some(job) => {
                job.state = state;
                true
            }
            None => false,
        }
    }

    /// Remove a job; a second removal of the same id is a no-op.
    pub fn remove(&mut self, id: &JobId) -> Option<Job> {
        let removed = self.jobs.remove(id);
        if removed.is_some() {
            debug!(job_id = %id, "job removed from registry");
        }
        removed
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &JobId> {
        self.jobs.keys()
    }
}
