// src/engine/handle.rs

//! Client side of the runtime: what UI surfaces hold.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ConfigFile;
use crate::errors::{ControlError, Result};
use crate::exec::BackendSet;
use crate::protocol::Envelope;
use crate::request::Payload;
use crate::router::SubscriptionId;
use crate::types::{BackendKind, Channel, JobId, SurfaceId};

use super::runtime::{BackendSelector, Runtime};
use super::{ControlRequest, RuntimeEvent};

const REQUEST_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// A running control plane: the handle to talk to it and the task driving it.
pub struct ControlPlane {
    pub handle: ControlHandle,
    pub task: JoinHandle<Result<()>>,
}

impl ControlPlane {
    /// Start the runtime with the production backends described by `config`.
    pub fn spawn(config: &ConfigFile) -> Self {
        let config = config.clone();
        let select: BackendSelector = {
            let config = config.clone();
            Box::new(move |channel| config.backend_for(channel))
        };
        Self::spawn_with(move |runtime_tx| BackendSet::from_config(&config, runtime_tx), select)
    }

    /// Start the runtime with caller-provided backends.
    ///
    /// `make_backends` receives the sender backends report their output on.
    pub fn spawn_with<F>(make_backends: F, select_backend: BackendSelector) -> Self
    where
        F: FnOnce(mpsc::Sender<RuntimeEvent>) -> BackendSet,
    {
        let (request_tx, request_rx) = mpsc::channel::<ControlRequest>(REQUEST_BUFFER);
        let (event_tx, event_rx) = mpsc::channel::<RuntimeEvent>(EVENT_BUFFER);

        let backends = make_backends(event_tx);
        let runtime = Runtime::new(backends, select_backend, request_rx, event_rx);
        let task = tokio::spawn(runtime.run());

        Self {
            handle: ControlHandle { tx: request_tx },
            task,
        }
    }

    /// Shut down gracefully and wait for the runtime task to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.join().await
    }

    /// Wait for the runtime task to end without asking it to.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| ControlError::Other(anyhow::anyhow!("runtime task failed: {e}")))?
    }
}

/// Convenience selector routing every channel to one backend kind.
pub fn fixed_backend(kind: BackendKind) -> BackendSelector {
    Box::new(move |_| kind)
}

#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlRequest>,
}

impl ControlHandle {
    /// Register a new surface that can start jobs and receive their events.
    pub async fn open_surface(&self) -> Result<Surface> {
        let (reply, rx) = oneshot::channel();
        self.request(ControlRequest::OpenSurface { reply }).await?;
        let id = rx.await.map_err(|_| ControlError::Shutdown)?;
        Ok(Surface {
            id,
            tx: self.tx.clone(),
        })
    }

    /// Stop the service and every worker process, then end the runtime.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(ControlRequest::Shutdown { reply }).await?;
        rx.await.map_err(|_| ControlError::Shutdown)
    }

    async fn request(&self, request: ControlRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| ControlError::Shutdown)
    }
}

/// One addressable UI surface. Closing (or dropping) it makes every later
/// delivery addressed to it a no-op; its jobs keep running.
#[derive(Debug)]
pub struct Surface {
    id: SurfaceId,
    tx: mpsc::Sender<ControlRequest>,
}

impl Surface {
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// Start a job on `channel`. Rejected synchronously if the payload is
    /// invalid or the backend could not be launched.
    pub async fn start(&self, channel: Channel, payload: Payload) -> Result<JobId> {
        let (reply, rx) = oneshot::channel();
        self.request(ControlRequest::Start {
            surface: self.id,
            channel,
            payload,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ControlError::Shutdown)?
    }

    /// Cancel a job. `false` means it was unknown, already finished, or the
    /// backend could not be reached.
    pub async fn cancel(&self, channel: Channel, job_id: &JobId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(ControlRequest::Cancel {
            channel,
            job_id: job_id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ControlError::Shutdown)
    }

    /// Receive every envelope of this surface's jobs on `channel`.
    pub async fn subscribe(&self, channel: Channel) -> Result<Subscription> {
        let (env_tx, env_rx) = mpsc::unbounded_channel();
        let (reply, rx) = oneshot::channel();
        self.request(ControlRequest::Subscribe {
            surface: self.id,
            channel,
            tx: env_tx,
            reply,
        })
        .await?;
        let id = rx
            .await
            .map_err(|_| ControlError::Shutdown)?
            .ok_or(ControlError::Shutdown)?;

        Ok(Subscription {
            id,
            surface: self.id,
            channel,
            rx: env_rx,
            tx: self.tx.clone(),
        })
    }

    pub async fn close(self) {
        let _ = self
            .tx
            .send(ControlRequest::CloseSurface { surface: self.id })
            .await;
    }

    async fn request(&self, request: ControlRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| ControlError::Shutdown)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // Best effort; a closed runtime has nothing left to forget.
        let _ = self
            .tx
            .try_send(ControlRequest::CloseSurface { surface: self.id });
    }
}

/// Stream of envelopes for one surface and channel.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    surface: SurfaceId,
    channel: Channel,
    rx: mpsc::UnboundedReceiver<Envelope>,
    tx: mpsc::Sender<ControlRequest>,
}

impl Subscription {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Next envelope; `None` once the surface or runtime is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving. Dropping the subscription has the same effect.
    pub async fn unsubscribe(self) {
        let _ = self
            .tx
            .send(ControlRequest::Unsubscribe {
                surface: self.surface,
                channel: self.channel,
                id: self.id,
            })
            .await;
    }
}
