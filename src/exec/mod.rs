// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running worker processes, using
//! `tokio::process::Command`, and reporting back to the runtime via
//! `RuntimeEvent`s.
//!
//! - [`backend`] provides the `Backend` trait both strategies implement and
//!   the `BackendSet` the runtime dispatches through.
//! - [`ephemeral`] runs one worker process per job.
//! - [`service`] drives the shared persistent service process.
//! - [`invocation`] turns a job payload into worker arguments.
//! - [`process`] holds the shared command building and stream pumps.

pub mod backend;
pub mod ephemeral;
pub mod invocation;
pub mod process;
pub mod service;

pub use backend::{Backend, BackendSet, JobSpec};
pub use ephemeral::EphemeralBackend;
pub use process::Launch;
pub use service::ServiceBackend;
