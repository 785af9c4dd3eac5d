// src/exec/service.rs

//! The persistent anonymization service shared by many jobs.
//!
//! At most one instance is alive at a time. It is spawned lazily by the first
//! `start` while absent, reused by every later `start`, and becomes absent
//! again only once the runtime has observed its exit (see
//! [`Backend::observe_exit`]). Each instance gets a fresh generation number
//! so a late exit from an old instance never affects a newer one.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::ConfigFile;
use crate::engine::RuntimeEvent;
use crate::errors::{ControlError, Result};
use crate::protocol::ServiceCommand;
use crate::types::{BackendKind, JobId};

use super::backend::{Backend, JobSpec};
use super::process::{Launch, drain_pump, exit_details, spawn_diagnostics_pump, spawn_pump};

struct ServiceInstance {
    generation: u64,
    commands: mpsc::UnboundedSender<ServiceCommand>,
    kill: Option<oneshot::Sender<()>>,
    exited: Option<oneshot::Receiver<()>>,
}

impl ServiceInstance {
    /// The process is gone, even if the runtime has not observed the exit yet.
    fn has_exited(&mut self) -> bool {
        match self.exited.as_mut() {
            Some(exited) => !matches!(exited.try_recv(), Err(TryRecvError::Empty)),
            None => true,
        }
    }
}

pub struct ServiceBackend {
    launch: Launch,
    shutdown_grace: Duration,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    instance: Option<ServiceInstance>,
    generation: u64,
}

impl ServiceBackend {
    pub fn new(config: &ConfigFile, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        let launch = Launch::for_script(&config.worker, &config.service.script);
        Self::with_launch(launch, config.service.shutdown_grace, runtime_tx)
    }

    pub fn with_launch(
        launch: Launch,
        shutdown_grace: Duration,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        Self {
            launch,
            shutdown_grace,
            runtime_tx,
            instance: None,
            generation: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.instance.is_some()
    }

    /// Generation of the current (or most recent) instance; also the number
    /// of service processes spawned so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn ensure_alive(&mut self) -> Result<&ServiceInstance> {
        if let Some(instance) = self.instance.as_mut() {
            if instance.has_exited() {
                // Its `ServiceExited` is still on the way; the runtime fails
                // that generation's jobs when it arrives.
                debug!(
                    generation = instance.generation,
                    "service exited before its exit was observed; replacing it"
                );
                self.instance = None;
            }
        }
        if self.instance.is_none() {
            let instance = self.spawn_instance()?;
            self.instance = Some(instance);
        }
        self.instance
            .as_ref()
            .ok_or_else(|| ControlError::Spawn("service instance unavailable".to_string()))
    }

    fn spawn_instance(&mut self) -> Result<ServiceInstance> {
        let generation = self.generation + 1;
        info!(generation, cmd = %self.launch.display(), "spawning persistent service");

        let mut child = self
            .launch
            .command(true)
            .spawn()
            .map_err(|e| ControlError::Spawn(format!("spawning service: {e}")))?;
        self.generation = generation;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ControlError::Spawn("service stdin was not piped".to_string()))?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel::<ServiceCommand>();
        tokio::spawn(write_commands(generation, stdin, commands_rx));

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exited_tx, exited_rx) = oneshot::channel::<()>();
        tokio::spawn(supervise(
            generation,
            child,
            self.runtime_tx.clone(),
            kill_rx,
            exited_tx,
        ));

        Ok(ServiceInstance {
            generation,
            commands: commands_tx,
            kill: Some(kill_tx),
            exited: Some(exited_rx),
        })
    }

    fn send(&self, command: ServiceCommand) -> bool {
        match &self.instance {
            Some(instance) => instance.commands.send(command).is_ok(),
            None => false,
        }
    }
}

impl Backend for ServiceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Service
    }

    fn start(&mut self, job: &JobSpec) -> Result<()> {
        let instance = self.ensure_alive()?;
        let generation = instance.generation;

        let command = ServiceCommand::Start {
            job_id: job.id.clone(),
            payload: job.payload.clone(),
        };
        if !self.send(command) {
            return Err(ControlError::Spawn(format!(
                "service generation {generation} is not accepting commands"
            )));
        }

        info!(job_id = %job.id, generation, "job dispatched to service");
        Ok(())
    }

    fn cancel(&mut self, job_id: &JobId) -> bool {
        if !self.send(ServiceCommand::Cancel {
            job_id: job_id.clone(),
        }) {
            warn!(job_id = %job_id, "cannot cancel: service is not running");
            return false;
        }
        debug!(job_id = %job_id, "cancel command queued for service");
        true
    }

    fn instance_generation(&self) -> Option<u64> {
        self.instance.as_ref().map(|i| i.generation)
    }

    fn observe_exit(&mut self, generation: u64) {
        if self
            .instance
            .as_ref()
            .is_some_and(|i| i.generation == generation)
        {
            debug!(generation, "service marked absent");
            self.instance = None;
        }
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Some(mut instance) = self.instance.take() else {
                return;
            };
            let grace = self.shutdown_grace;
            info!(generation = instance.generation, "shutting down persistent service");

            let _ = instance.commands.send(ServiceCommand::Shutdown);
            let Some(mut exited) = instance.exited.take() else {
                return;
            };

            if tokio::time::timeout(grace, &mut exited).await.is_ok() {
                debug!(generation = instance.generation, "service exited gracefully");
                return;
            }

            warn!(
                generation = instance.generation,
                ?grace,
                "service did not exit in time; killing it"
            );
            if let Some(kill) = instance.kill.take() {
                let _ = kill.send(());
            }
            if tokio::time::timeout(grace, exited).await.is_err() {
                error!(generation = instance.generation, "service still running after kill");
            }
        })
    }
}

/// Serialize queued commands onto the service's stdin.
async fn write_commands(
    generation: u64,
    mut stdin: ChildStdin,
    mut commands: mpsc::UnboundedReceiver<ServiceCommand>,
) {
    while let Some(command) = commands.recv().await {
        let line = match command.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!(generation, error = %e, "failed to serialize service command");
                continue;
            }
        };
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };
        if let Err(e) = written.await {
            warn!(generation, error = %e, "writing to service stdin failed");
            break;
        }
    }
    debug!(generation, "service command writer finished");
}

/// Supervise the service process: pump its output, wait for it to exit
/// (or kill it on request), then report the exit to the runtime.
async fn supervise(
    generation: u64,
    mut child: Child,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut kill_rx: oneshot::Receiver<()>,
    exited_tx: oneshot::Sender<()>,
) {
    let stdout_pump = child.stdout.take().map(|stdout| {
        spawn_pump(
            stdout,
            runtime_tx.clone(),
            format!("service-{generation}/stdout"),
            move |envelope| RuntimeEvent::ServiceOutput {
                generation,
                envelope,
            },
        )
    });
    let stderr_pump = child
        .stderr
        .take()
        .map(|stderr| spawn_diagnostics_pump(stderr, format!("service-{generation}/stderr")));

    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill_rx => {
            if let Err(e) = child.start_kill() {
                warn!(generation, error = %e, "failed to kill service process");
            }
            child.wait().await
        }
    };
    let _ = exited_tx.send(());

    if let Some(pump) = stdout_pump {
        drain_pump(pump, "service stdout").await;
    }
    if let Some(pump) = stderr_pump {
        drain_pump(pump, "service stderr").await;
    }

    let (code, signal) = match &status {
        Ok(status) => exit_details(status),
        Err(e) => {
            warn!(generation, error = %e, "waiting for service process failed");
            (None, None)
        }
    };
    info!(generation, ?code, ?signal, "service process exited");

    let _ = runtime_tx
        .send(RuntimeEvent::ServiceExited {
            generation,
            code,
            signal,
        })
        .await;
}
