// src/engine/mod.rs

//! Orchestration engine for anonctl.
//!
//! This module ties together:
//! - the job registry and the service slot table
//! - the event router
//! - the cancellation coordinator
//! - the main runtime loop that reacts to:
//!   - start / cancel / subscribe requests from surfaces
//!   - envelopes decoded from worker output
//!   - worker and service exits
//!   - shutdown
//!
//! The pure bookkeeping lives in [`core`]; the async/IO shell is implemented
//! in [`runtime`], and [`handle`] is the client side surfaces talk to.

use tokio::sync::{mpsc, oneshot};

use crate::errors::Result;
use crate::protocol::Envelope;
use crate::request::Payload;
use crate::router::SubscriptionId;
use crate::types::{Channel, JobId, SurfaceId};

/// Events flowing into the runtime from backend processes.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// An envelope from an ephemeral job's process, already stamped with its id.
    JobOutput { job_id: JobId, envelope: Envelope },
    /// An envelope from the persistent service's stdout.
    ServiceOutput { generation: u64, envelope: Envelope },
    /// The persistent service process exited (gracefully or not).
    ServiceExited {
        generation: u64,
        code: Option<i32>,
        signal: Option<i32>,
    },
}

/// Requests flowing into the runtime from surfaces.
#[derive(Debug)]
pub enum ControlRequest {
    OpenSurface {
        reply: oneshot::Sender<SurfaceId>,
    },
    CloseSurface {
        surface: SurfaceId,
    },
    Subscribe {
        surface: SurfaceId,
        channel: Channel,
        tx: mpsc::UnboundedSender<Envelope>,
        reply: oneshot::Sender<Option<SubscriptionId>>,
    },
    Unsubscribe {
        surface: SurfaceId,
        channel: Channel,
        id: SubscriptionId,
    },
    Start {
        surface: SurfaceId,
        channel: Channel,
        payload: Payload,
        reply: oneshot::Sender<Result<JobId>>,
    },
    Cancel {
        channel: Channel,
        job_id: JobId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub mod cancel;
pub mod core;
pub mod handle;
pub mod runtime;

pub use cancel::{CancelOutcome, coordinate_cancel};
pub use self::core::{CoreCommand, CoreRuntime};
pub use handle::{ControlHandle, ControlPlane, Subscription, Surface, fixed_backend};
pub use runtime::{BackendSelector, Runtime};
