use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use anonctl::engine::{BackendSelector, ControlPlane, RuntimeEvent};
use anonctl::errors::{ControlError, Result};
use anonctl::exec::{Backend, BackendSet, JobSpec};
use anonctl::protocol::Envelope;
use anonctl::types::{BackendKind, JobId};

/// What a [`FakeBackend`] was asked to do, and how it should answer.
#[derive(Debug, Default)]
pub struct FakeState {
    pub started: Vec<JobSpec>,
    pub cancelled: Vec<JobId>,
    pub released: Vec<JobId>,
    pub observed_exits: Vec<u64>,
    pub shutdowns: usize,
    /// Make the next `start` calls fail as if the process could not spawn.
    pub fail_start: bool,
    /// Make `cancel` report that the backend could not be reached.
    pub refuse_cancel: bool,
    /// Instance generation a service-kind fake reports for accepted jobs.
    pub generation: u64,
}

pub type SharedState = Arc<Mutex<FakeState>>;

/// A backend that spawns nothing:
/// - records every call in a shared [`FakeState`]
/// - answers `start` / `cancel` according to that state.
///
/// Output is injected separately through a [`FakeWorker`].
pub struct FakeBackend {
    kind: BackendKind,
    state: SharedState,
}

impl FakeBackend {
    pub fn new(kind: BackendKind) -> (Self, SharedState) {
        let state = Arc::new(Mutex::new(FakeState {
            generation: 1,
            ..FakeState::default()
        }));
        (
            Self {
                kind,
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl Backend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn start(&mut self, job: &JobSpec) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_start {
            return Err(ControlError::Spawn("fake spawn failure".to_string()));
        }
        state.started.push(job.clone());
        Ok(())
    }

    fn cancel(&mut self, job_id: &JobId) -> bool {
        let mut state = self.state.lock().unwrap();
        state.cancelled.push(job_id.clone());
        !state.refuse_cancel
    }

    fn release(&mut self, job_id: &JobId) {
        self.state.lock().unwrap().released.push(job_id.clone());
    }

    fn instance_generation(&self) -> Option<u64> {
        match self.kind {
            BackendKind::Service => Some(self.state.lock().unwrap().generation),
            BackendKind::Ephemeral => None,
        }
    }

    fn observe_exit(&mut self, generation: u64) {
        self.state.lock().unwrap().observed_exits.push(generation);
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.state.lock().unwrap().shutdowns += 1;
        Box::pin(async {})
    }
}

/// Plays the part of worker processes by sending `RuntimeEvent`s straight
/// into the runtime.
#[derive(Debug, Clone)]
pub struct FakeWorker {
    tx: mpsc::Sender<RuntimeEvent>,
}

impl FakeWorker {
    pub fn new(tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { tx }
    }

    /// An envelope from an ephemeral job's own process.
    pub async fn job_output(&self, job_id: &JobId, event: &str) {
        self.job_envelope(job_id, Envelope::for_job(job_id, event))
            .await;
    }

    pub async fn job_envelope(&self, job_id: &JobId, envelope: Envelope) {
        self.tx
            .send(RuntimeEvent::JobOutput {
                job_id: job_id.clone(),
                envelope,
            })
            .await
            .expect("runtime is gone");
    }

    /// An envelope from the persistent service.
    pub async fn service_output(&self, generation: u64, envelope: Envelope) {
        self.tx
            .send(RuntimeEvent::ServiceOutput {
                generation,
                envelope,
            })
            .await
            .expect("runtime is gone");
    }

    pub async fn service_exited(&self, generation: u64, code: Option<i32>) {
        self.tx
            .send(RuntimeEvent::ServiceExited {
                generation,
                code,
                signal: None,
            })
            .await
            .expect("runtime is gone");
    }
}

/// A control plane running on two fake backends.
pub struct FakePlane {
    pub plane: ControlPlane,
    pub worker: FakeWorker,
    pub ephemeral: SharedState,
    pub service: SharedState,
}

/// Spawn a runtime whose backends are both [`FakeBackend`]s.
pub fn spawn_fake_plane(select_backend: BackendSelector) -> FakePlane {
    let (ephemeral, ephemeral_state) = FakeBackend::new(BackendKind::Ephemeral);
    let (service, service_state) = FakeBackend::new(BackendKind::Service);

    let mut runtime_tx = None;
    let plane = ControlPlane::spawn_with(
        |tx| {
            runtime_tx = Some(tx);
            BackendSet::new(Box::new(ephemeral), Box::new(service))
        },
        select_backend,
    );

    FakePlane {
        plane,
        worker: FakeWorker::new(runtime_tx.expect("backends were built")),
        ephemeral: ephemeral_state,
        service: service_state,
    }
}
