// src/engine/core.rs

//! Pure core bookkeeping.
//!
//! [`CoreRuntime`] owns the job registry and the service slot table. It
//! consumes decoded envelopes and exit notifications and produces
//! [`CoreCommand`]s describing what the IO shell should do next (deliver an
//! envelope to a surface, release backend resources).
//!
//! It has **no** channels, no Tokio types, and does not perform any IO, so
//! every terminal path can be unit tested without processes.

use tracing::{debug, info, warn};

use crate::protocol::{Envelope, event};
use crate::registry::{Job, JobRegistry, SlotTable};
use crate::types::{BackendKind, Channel, JobId, JobState, SurfaceId};

/// Message carried by the synthetic `error` emitted for jobs lost in a
/// service crash.
pub const BACKEND_TERMINATED: &str = "backend terminated unexpectedly";

/// Command produced by the core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    /// Hand this envelope to the requester's subscriptions on `channel`.
    Deliver {
        requester: SurfaceId,
        channel: Channel,
        envelope: Envelope,
    },
    /// The job is terminal; the backend may drop anything it keeps for it.
    Release { job_id: JobId, backend: BackendKind },
}

#[derive(Debug, Default)]
pub struct CoreRuntime {
    jobs: JobRegistry,
    slots: SlotTable,
}

impl CoreRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Record a new pending job.
    pub fn register(
        &mut self,
        channel: Channel,
        requester: SurfaceId,
        backend: BackendKind,
    ) -> JobId {
        self.jobs.create(channel, requester, backend)
    }

    /// The backend accepted the job: mark it running and, for service jobs,
    /// occupy a slot on the instance `generation` it was handed to.
    pub fn accept(&mut self, id: &JobId, generation: Option<u64>) -> bool {
        let Some(job) = self.jobs.get(id) else {
            return false;
        };
        if job.backend == BackendKind::Service {
            self.slots
                .insert(id.clone(), job.requester, generation.unwrap_or_default());
        }
        self.jobs.set_state(id, JobState::Running)
    }

    /// The backend refused the job (spawn failure): forget it silently.
    pub fn abort(&mut self, id: &JobId) {
        self.slots.remove(id);
        self.jobs.remove(id);
    }

    pub fn mark_terminating(&mut self, id: &JobId) -> bool {
        self.set_state(id, JobState::Terminating)
    }

    pub fn set_state(&mut self, id: &JobId, state: JobState) -> bool {
        self.jobs.set_state(id, state)
    }

    /// An envelope from an ephemeral job's own process.
    pub fn on_job_output(&mut self, job_id: &JobId, envelope: Envelope) -> Vec<CoreCommand> {
        let Some(job) = self.jobs.get(job_id) else {
            debug!(
                job_id = %job_id,
                event = envelope.event(),
                "output for unknown or finished job; discarding"
            );
            return Vec::new();
        };
        let requester = job.requester;
        self.route(job_id, requester, envelope)
    }

    /// An envelope from the shared service: demultiplex by `jobId`.
    pub fn on_service_output(&mut self, envelope: Envelope) -> Vec<CoreCommand> {
        let Some(job_id) = envelope.job_id() else {
            if envelope.is_event(event::SERVICE_ERROR) {
                warn!(envelope = %envelope.to_line(), "service reported an error");
            } else {
                debug!(envelope = %envelope.to_line(), "service output without jobId");
            }
            return Vec::new();
        };

        let Some(requester) = self.slots.requester_of(&job_id) else {
            debug!(
                job_id = %job_id,
                event = envelope.event(),
                "service output for a job without a slot; discarding"
            );
            return Vec::new();
        };

        self.route(&job_id, requester, envelope)
    }

    /// A service instance is gone. Every job still slotted on that generation
    /// gets an `error` followed by an `exit`, then both tables forget it.
    /// Jobs already handed to a newer instance are left alone.
    pub fn on_service_exit(
        &mut self,
        generation: u64,
        code: Option<i32>,
        signal: Option<i32>,
    ) -> Vec<CoreCommand> {
        let lost = self.slots.drain_generation(generation);
        if !lost.is_empty() {
            warn!(
                jobs = lost.len(),
                generation,
                ?code,
                ?signal,
                "service exited with jobs in flight; failing them"
            );
        } else {
            info!(generation, ?code, ?signal, "service exited");
        }

        let mut commands = Vec::new();
        for (job_id, requester) in lost {
            let Some(job) = self.jobs.remove(&job_id) else {
                continue;
            };

            commands.push(CoreCommand::Deliver {
                requester,
                channel: job.channel,
                envelope: Envelope::for_job(&job_id, event::ERROR)
                    .with("message", BACKEND_TERMINATED),
            });
            commands.push(CoreCommand::Deliver {
                requester,
                channel: job.channel,
                envelope: exit_envelope(&job_id, code, signal),
            });
            commands.push(CoreCommand::Release {
                job_id,
                backend: job.backend,
            });
        }
        commands
    }

    /// Remove a job and emit a final envelope on its behalf (used by the
    /// cancellation coordinator).
    pub fn finalize_with(&mut self, job_id: &JobId, envelope: Envelope) -> Vec<CoreCommand> {
        let Some(job) = self.jobs.remove(job_id) else {
            return Vec::new();
        };
        self.slots.remove(job_id);

        vec![
            CoreCommand::Deliver {
                requester: job.requester,
                channel: job.channel,
                envelope,
            },
            CoreCommand::Release {
                job_id: job.id,
                backend: job.backend,
            },
        ]
    }

    /// Deliver a non-terminal envelope to a live job's requester.
    pub fn notify(&self, job_id: &JobId, envelope: Envelope) -> Vec<CoreCommand> {
        match self.jobs.get(job_id) {
            Some(job) => vec![CoreCommand::Deliver {
                requester: job.requester,
                channel: job.channel,
                envelope,
            }],
            None => Vec::new(),
        }
    }

    /// Forget everything (shutdown teardown).
    pub fn clear(&mut self) -> usize {
        let ids: Vec<JobId> = self.jobs.ids().cloned().collect();
        for id in &ids {
            self.jobs.remove(id);
        }
        self.slots.drain();
        ids.len()
    }

    fn route(&mut self, job_id: &JobId, requester: SurfaceId, envelope: Envelope) -> Vec<CoreCommand> {
        let Some(job) = self.jobs.get(job_id) else {
            return Vec::new();
        };
        let (channel, state) = (job.channel, job.state);

        if envelope.is_event(event::EXIT) {
            debug!(job_id = %job_id, "exit observed; job is terminal");
            let mut commands = vec![CoreCommand::Deliver {
                requester,
                channel,
                envelope,
            }];
            if let Some(job) = self.jobs.remove(job_id) {
                self.slots.remove(job_id);
                commands.push(CoreCommand::Release {
                    job_id: job.id,
                    backend: job.backend,
                });
            }
            return commands;
        }

        if envelope.is_outcome() {
            self.jobs.set_state(job_id, JobState::Terminating);
        } else if state == JobState::Pending {
            self.jobs.set_state(job_id, JobState::Running);
        }

        vec![CoreCommand::Deliver {
            requester,
            channel,
            envelope,
        }]
    }
}

/// Terminal `exit` envelope with the process's exit code and, where the
/// platform reports one, the terminating signal.
pub fn exit_envelope(job_id: &JobId, code: Option<i32>, signal: Option<i32>) -> Envelope {
    Envelope::for_job(job_id, event::EXIT)
        .with("code", code)
        .with("signal", signal)
}
