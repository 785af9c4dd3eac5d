// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::{BackendSet, JobSpec};
use crate::request::{Payload, validate_request};
use crate::router::EventRouter;
use crate::types::{BackendKind, Channel, JobId, SurfaceId};

use super::cancel::coordinate_cancel;
use super::core::{CoreCommand, CoreRuntime};
use super::{ControlRequest, RuntimeEvent};

/// Chooses the backend a channel's jobs run on.
pub type BackendSelector = Box<dyn Fn(Channel) -> BackendKind + Send>;

/// Drives the job bookkeeping in response to surface requests and backend
/// events, and delegates process work to a [`BackendSet`].
///
/// Every request and event is handled to completion before the next one is
/// read, so registry, slot table and router are only ever touched from this
/// single loop.
pub struct Runtime {
    core: CoreRuntime,
    router: EventRouter,
    backends: BackendSet,
    select_backend: BackendSelector,
    request_rx: mpsc::Receiver<ControlRequest>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(
        backends: BackendSet,
        select_backend: BackendSelector,
        request_rx: mpsc::Receiver<ControlRequest>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
    ) -> Self {
        Self {
            core: CoreRuntime::new(),
            router: EventRouter::new(),
            backends,
            select_backend,
            request_rx,
            event_rx,
        }
    }

    /// Main event loop.
    ///
    /// Runs until a `Shutdown` request arrives or every surface handle has
    /// been dropped, then tears the backends down.
    pub async fn run(mut self) -> Result<()> {
        info!("anonctl runtime started");

        loop {
            tokio::select! {
                request = self.request_rx.recv() => {
                    match request {
                        Some(ControlRequest::Shutdown { reply }) => {
                            self.shutdown().await;
                            let _ = reply.send(());
                            return Ok(());
                        }
                        Some(request) => self.handle_request(request),
                        None => {
                            info!("all control handles dropped; shutting down");
                            break;
                        }
                    }
                }
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn handle_request(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::OpenSurface { reply } => {
                let id = self.router.open_surface();
                debug!(surface = %id, "surface opened");
                let _ = reply.send(id);
            }
            ControlRequest::CloseSurface { surface } => {
                self.router.close_surface(surface);
            }
            ControlRequest::Subscribe {
                surface,
                channel,
                tx,
                reply,
            } => {
                let _ = reply.send(self.router.subscribe(surface, channel, tx));
            }
            ControlRequest::Unsubscribe {
                surface,
                channel,
                id,
            } => {
                self.router.unsubscribe(surface, channel, id);
            }
            ControlRequest::Start {
                surface,
                channel,
                payload,
                reply,
            } => {
                let _ = reply.send(self.start_job(surface, channel, payload));
            }
            ControlRequest::Cancel {
                channel,
                job_id,
                reply,
            } => {
                let (outcome, commands) =
                    coordinate_cancel(&mut self.core, &mut self.backends, channel, &job_id);
                debug!(job_id = %job_id, ?outcome, "cancel handled");
                self.execute(commands);
                let _ = reply.send(outcome.succeeded());
            }
            ControlRequest::Shutdown { reply } => {
                // Handled in `run`; answer anyway if it ever lands here.
                let _ = reply.send(());
            }
        }
    }

    /// Validate, register and dispatch a job.
    ///
    /// Validation and spawn failures are returned to the caller and leave no
    /// trace in the registry.
    fn start_job(&mut self, surface: SurfaceId, channel: Channel, payload: Payload) -> Result<JobId> {
        let payload = validate_request(channel, payload)?;
        let kind = (self.select_backend)(channel);

        let job_id = self.core.register(channel, surface, kind);
        let spec = JobSpec {
            id: job_id.clone(),
            channel,
            payload,
        };

        let backend = self.backends.get_mut(kind);
        match backend.start(&spec) {
            Ok(()) => {
                let generation = backend.instance_generation();
                self.core.accept(&job_id, generation);
                info!(job_id = %job_id, %channel, backend = %kind, %surface, "job started");
                Ok(job_id)
            }
            Err(e) => {
                warn!(job_id = %job_id, %channel, error = %e, "backend refused job");
                self.core.abort(&job_id);
                Err(e)
            }
        }
    }

    fn handle_event(&mut self, event: RuntimeEvent) {
        let commands = match event {
            RuntimeEvent::JobOutput { job_id, envelope } => {
                self.core.on_job_output(&job_id, envelope)
            }
            RuntimeEvent::ServiceOutput {
                generation,
                envelope,
            } => {
                debug!(generation, event = envelope.event(), "service output");
                self.core.on_service_output(envelope)
            }
            RuntimeEvent::ServiceExited {
                generation,
                code,
                signal,
            } => {
                self.backends
                    .get_mut(BackendKind::Service)
                    .observe_exit(generation);
                self.core.on_service_exit(generation, code, signal)
            }
        };
        self.execute(commands);
    }

    fn execute(&mut self, commands: Vec<CoreCommand>) {
        for command in commands {
            match command {
                CoreCommand::Deliver {
                    requester,
                    channel,
                    envelope,
                } => {
                    self.router.deliver(requester, channel, envelope);
                }
                CoreCommand::Release { job_id, backend } => {
                    self.backends.get_mut(backend).release(&job_id);
                }
            }
        }
    }

    /// Graceful teardown: stop the service and any worker processes, then
    /// forget whatever jobs were still registered.
    async fn shutdown(&mut self) {
        info!(jobs = self.core.jobs().len(), "runtime shutting down");
        self.backends.shutdown_all().await;
        let dropped = self.core.clear();
        if dropped > 0 {
            debug!(dropped, "discarded jobs still registered at shutdown");
        }
        info!("runtime exiting");
    }
}
