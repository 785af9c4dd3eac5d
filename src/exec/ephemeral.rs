// src/exec/ephemeral.rs

//! One worker process per job.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, WorkerConfig};
use crate::engine::RuntimeEvent;
use crate::engine::core::exit_envelope;
use crate::errors::{ControlError, Result};
use crate::types::{BackendKind, Channel, JobId};

use super::backend::{Backend, JobSpec};
use super::invocation::worker_args;
use super::process::{Launch, drain_pump, exit_details, spawn_pump};

/// Environment variable carrying the job id into the worker.
pub const JOB_ID_ENV: &str = "ANONCTL_JOB_ID";

/// How long shutdown waits for killed workers to report their exit.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// Internal handle for a currently-running job process.
///
/// - `cancel` asks the supervising task to kill the process.
/// - `handle` is the Tokio task supervising the process.
struct ActiveProcess {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

pub struct EphemeralBackend {
    worker: WorkerConfig,
    scripts: HashMap<Channel, String>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    active: HashMap<JobId, ActiveProcess>,
}

impl EphemeralBackend {
    pub fn new(config: &ConfigFile, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        let scripts = Channel::ALL
            .iter()
            .map(|c| (*c, config.channel(*c).script.clone()))
            .collect();
        Self {
            worker: config.worker.clone(),
            scripts,
            runtime_tx,
            active: HashMap::new(),
        }
    }

    /// The exact invocation used for `job`.
    pub fn launch_for(&self, job: &JobSpec) -> Launch {
        let script = self
            .scripts
            .get(&job.channel)
            .map(String::as_str)
            .unwrap_or_default();
        Launch::for_script(&self.worker, script)
            .args(worker_args(job.channel, &job.payload))
            .env(JOB_ID_ENV, job.id.as_str())
    }

    /// Number of processes still being supervised.
    pub fn active_count(&self) -> usize {
        self.active
            .values()
            .filter(|p| !p.handle.is_finished())
            .count()
    }
}

impl Backend for EphemeralBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ephemeral
    }

    fn start(&mut self, job: &JobSpec) -> Result<()> {
        let launch = self.launch_for(job);
        info!(
            job_id = %job.id,
            channel = %job.channel,
            cmd = %launch.display(),
            "starting worker process"
        );

        let child = launch.command(false).spawn().map_err(|e| {
            ControlError::Spawn(format!("spawning worker for job '{}': {e}", job.id))
        })?;

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(supervise(
            job.id.clone(),
            child,
            self.runtime_tx.clone(),
            cancel_rx,
        ));

        self.active.insert(
            job.id.clone(),
            ActiveProcess {
                cancel: Some(cancel_tx),
                handle,
            },
        );
        Ok(())
    }

    fn cancel(&mut self, job_id: &JobId) -> bool {
        let Some(process) = self.active.get_mut(job_id) else {
            debug!(job_id = %job_id, "cancel for unknown job process");
            return false;
        };
        if process.handle.is_finished() {
            debug!(job_id = %job_id, "process already finished while cancelling");
            return false;
        }

        match process.cancel.take() {
            Some(cancel) => {
                info!(job_id = %job_id, "cancellation requested; killing worker process");
                cancel.send(()).is_ok()
            }
            None => {
                debug!(job_id = %job_id, "kill already requested for this process");
                true
            }
        }
    }

    fn release(&mut self, job_id: &JobId) {
        self.active.remove(job_id);
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let active: Vec<(JobId, ActiveProcess)> = self.active.drain().collect();
            if active.is_empty() {
                return;
            }
            info!(processes = active.len(), "terminating remaining worker processes");

            for (job_id, mut process) in active {
                if let Some(cancel) = process.cancel.take() {
                    let _ = cancel.send(());
                }
                let abort = process.handle.abort_handle();
                if tokio::time::timeout(SHUTDOWN_WAIT, process.handle).await.is_err() {
                    warn!(job_id = %job_id, "worker did not stop in time; abandoning it");
                    abort.abort();
                }
            }
        })
    }
}

/// Supervise one worker process until it exits.
///
/// Stdout envelopes are stamped with the job id; stderr lines are always
/// forwarded as `log` diagnostics tagged `stream: "stderr"`. Once the process
/// has exited and both streams are drained, a final `exit` envelope is
/// emitted.
async fn supervise(
    job_id: JobId,
    mut child: Child,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let stdout_pump = child.stdout.take().map(|stdout| {
        let id = job_id.clone();
        spawn_pump(stdout, runtime_tx.clone(), format!("{job_id}/stdout"), move |mut envelope| {
            envelope.stamp_job_id(&id);
            RuntimeEvent::JobOutput {
                job_id: id.clone(),
                envelope,
            }
        })
    });
    let stderr_pump = child.stderr.take().map(|stderr| {
        let id = job_id.clone();
        spawn_pump(stderr, runtime_tx.clone(), format!("{job_id}/stderr"), move |envelope| {
            let mut envelope = envelope.into_diagnostic("stderr");
            envelope.stamp_job_id(&id);
            RuntimeEvent::JobOutput {
                job_id: id.clone(),
                envelope,
            }
        })
    });

    // Either the process exits on its own, or a cancel request arrives and
    // we kill it first. A dropped cancel sender is not a cancellation.
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut cancel_rx => {
            if let Err(e) = child.start_kill() {
                warn!(job_id = %job_id, error = %e, "failed to kill worker process");
            }
            child.wait().await
        }
    };

    if let Some(pump) = stdout_pump {
        drain_pump(pump, "stdout").await;
    }
    if let Some(pump) = stderr_pump {
        drain_pump(pump, "stderr").await;
    }

    let (code, signal) = match &status {
        Ok(status) => exit_details(status),
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "waiting for worker process failed");
            (None, None)
        }
    };
    info!(job_id = %job_id, ?code, ?signal, "worker process exited");

    let envelope = exit_envelope(&job_id, code, signal);
    let _ = runtime_tx
        .send(RuntimeEvent::JobOutput { job_id, envelope })
        .await;
}
