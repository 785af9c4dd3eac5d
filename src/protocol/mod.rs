// src/protocol/mod.rs

//! Line-delimited JSON wire protocol spoken with worker processes.
//!
//! - [`codec`] turns raw output chunks into [`Envelope`]s.
//! - [`envelope`] is the decoded, schema-free event unit.
//! - [`command`] holds the commands written to the persistent service.

pub mod codec;
pub mod command;
pub mod envelope;

pub use codec::{LineCodec, decode_line};
pub use command::ServiceCommand;
pub use envelope::{EVENT_KEY, Envelope, JOB_ID_KEY, event};
