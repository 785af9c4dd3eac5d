// src/registry/mod.rs

//! Bookkeeping for in-flight jobs.
//!
//! - [`jobs`] is the authoritative job table.
//! - [`slots`] maps jobs assigned to the persistent service to their
//!   requesting surface and the service generation running them.
//!
//! Neither table does any IO; both are owned by the engine core.

pub mod jobs;
pub mod slots;

pub use jobs::{Job, JobRegistry};
pub use slots::{Slot, SlotTable};
