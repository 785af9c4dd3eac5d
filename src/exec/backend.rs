// src/exec/backend.rs

//! Pluggable backend abstraction.
//!
//! The runtime talks to a `Backend` instead of raw processes. Both execution
//! strategies implement it:
//!
//! - [`EphemeralBackend`](super::EphemeralBackend) spawns one worker process
//!   per job.
//! - [`ServiceBackend`](super::ServiceBackend) multiplexes jobs over a single
//!   persistent service process.
//!
//! Tests can provide their own `Backend` that records requests and emits
//! `RuntimeEvent`s directly, without spawning anything.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::config::ConfigFile;
use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::request::Payload;
use crate::types::{BackendKind, Channel, JobId};

use super::ephemeral::EphemeralBackend;
use super::service::ServiceBackend;

/// Everything a backend needs to run one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub id: JobId,
    pub channel: Channel,
    pub payload: Payload,
}

/// One execution strategy.
///
/// `start` and `cancel` are synchronous: they only spawn processes or queue
/// writes, never wait on a worker. Output and exits come back to the runtime
/// as [`RuntimeEvent`]s.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// Hand a job to the backend. An error means nothing was started.
    fn start(&mut self, job: &JobSpec) -> Result<()>;

    /// Request termination of a job. `false` if the request could not be
    /// issued (unknown job, backend unreachable).
    fn cancel(&mut self, job_id: &JobId) -> bool;

    /// The job is terminal; drop any per-job resources.
    fn release(&mut self, _job_id: &JobId) {}

    /// A service instance of this generation has exited.
    fn observe_exit(&mut self, _generation: u64) {}

    /// Generation of the live instance jobs are currently sent to, for
    /// backends that multiplex over one.
    fn instance_generation(&self) -> Option<u64> {
        None
    }

    /// Stop everything this backend runs, gracefully first.
    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// The two strategies side by side, addressed by [`BackendKind`].
pub struct BackendSet {
    ephemeral: Box<dyn Backend>,
    service: Box<dyn Backend>,
}

impl BackendSet {
    pub fn new(ephemeral: Box<dyn Backend>, service: Box<dyn Backend>) -> Self {
        Self { ephemeral, service }
    }

    /// Production backends built from configuration, reporting to `runtime_tx`.
    pub fn from_config(config: &ConfigFile, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            ephemeral: Box::new(EphemeralBackend::new(config, runtime_tx.clone())),
            service: Box::new(ServiceBackend::new(config, runtime_tx)),
        }
    }

    pub fn get_mut(&mut self, kind: BackendKind) -> &mut dyn Backend {
        match kind {
            BackendKind::Ephemeral => self.ephemeral.as_mut(),
            BackendKind::Service => self.service.as_mut(),
        }
    }

    pub async fn shutdown_all(&mut self) {
        self.service.shutdown().await;
        self.ephemeral.shutdown().await;
    }
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSet")
            .field("ephemeral", &self.ephemeral.kind())
            .field("service", &self.service.kind())
            .finish()
    }
}
