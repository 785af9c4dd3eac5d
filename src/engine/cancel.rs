// src/engine/cancel.rs

//! Cancellation coordinator.
//!
//! Turns a surface's cancel request into a backend-specific termination
//! request (process kill or service `cancel` command). Runs inside the
//! runtime loop like every other event, so a cancel can never interleave
//! with the handling of the same job's natural exit.

use tracing::{info, warn};

use crate::exec::BackendSet;
use crate::protocol::{Envelope, event};
use crate::types::{Channel, JobId};

use super::core::{CoreCommand, CoreRuntime};

/// Message carried by the `error` delivered when a cancel cannot be issued.
pub const CANCEL_FAILED: &str = "failed to cancel job";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Termination was requested and the job is finished from the surface's
    /// point of view.
    Cancelled,
    /// The backend could not be reached; the job stays registered until the
    /// backend itself reports an exit.
    Failed,
    /// Unknown, already terminal, or belongs to another channel.
    NotFound,
}

impl CancelOutcome {
    /// The boolean surfaces see.
    pub fn succeeded(&self) -> bool {
        matches!(self, CancelOutcome::Cancelled)
    }
}

/// Cancel `job_id` on `channel`.
pub fn coordinate_cancel(
    core: &mut CoreRuntime,
    backends: &mut BackendSet,
    channel: Channel,
    job_id: &JobId,
) -> (CancelOutcome, Vec<CoreCommand>) {
    let Some(job) = core.job(job_id) else {
        return (CancelOutcome::NotFound, Vec::new());
    };
    if job.channel != channel {
        warn!(
            job_id = %job_id,
            requested = %channel,
            actual = %job.channel,
            "cancel requested on the wrong channel"
        );
        return (CancelOutcome::NotFound, Vec::new());
    }
    let backend = job.backend;
    let previous = job.state;

    core.mark_terminating(job_id);
    if backends.get_mut(backend).cancel(job_id) {
        info!(job_id = %job_id, %backend, "job cancelled");
        let commands = core.finalize_with(job_id, Envelope::for_job(job_id, event::CANCELLED));
        return (CancelOutcome::Cancelled, commands);
    }

    warn!(job_id = %job_id, %backend, "backend could not cancel job");
    // Leave the job as it was; the backend's own exit will finalize it.
    core.set_state(job_id, previous);
    let commands = core.notify(
        job_id,
        Envelope::for_job(job_id, event::ERROR).with("message", CANCEL_FAILED),
    );
    (CancelOutcome::Failed, commands)
}

