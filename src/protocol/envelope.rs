// src/protocol/envelope.rs

//! The decoded unit of the worker protocol.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::JobId;

/// Key carrying the event discriminator.
pub const EVENT_KEY: &str = "event";
/// Key carrying the job correlation id.
pub const JOB_ID_KEY: &str = "jobId";

/// Event names the control plane recognises. Workers may emit others; those
/// pass through untouched.
pub mod event {
    pub const STARTED: &str = "started";
    pub const METADATA: &str = "metadata";
    pub const PROGRESS: &str = "progress";
    pub const LOG: &str = "log";
    pub const FINALIZING: &str = "finalizing";
    pub const FINALIZED: &str = "finalized";
    pub const COMPLETED: &str = "completed";
    pub const ERROR: &str = "error";
    pub const CANCELLED: &str = "cancelled";
    pub const EXIT: &str = "exit";
    pub const SERVICE_ERROR: &str = "service_error";
}

/// One JSON object from (or synthesized on behalf of) a worker.
///
/// Always carries a string `event`; `jobId` is present for job-scoped events.
/// Every other key is schema-free and preserved as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// A bare envelope with only the `event` key.
    pub fn new(event: &str) -> Self {
        let mut map = Map::new();
        map.insert(EVENT_KEY.to_string(), Value::String(event.to_string()));
        Envelope(map)
    }

    /// A job-scoped envelope, `jobId` first.
    pub fn for_job(job_id: &JobId, event: &str) -> Self {
        let mut map = Map::new();
        map.insert(JOB_ID_KEY.to_string(), Value::String(job_id.to_string()));
        map.insert(EVENT_KEY.to_string(), Value::String(event.to_string()));
        Envelope(map)
    }

    /// Synthetic `log` envelope carrying a raw line of text.
    pub fn log(message: impl Into<String>) -> Self {
        Envelope::new(event::LOG).with("message", message.into())
    }

    /// Recast a line read from a diagnostic stream as a `log` envelope
    /// tagged with `stream`. A decoded object is kept whole under `data`, so
    /// its `event` never reaches job bookkeeping.
    pub fn into_diagnostic(self, stream: &str) -> Self {
        let is_plain_log = self.is_event(event::LOG)
            && self.0.len() == 2
            && self.0.get("message").is_some_and(Value::is_string);
        let envelope = if is_plain_log {
            self
        } else {
            Envelope::log(self.to_line()).with("data", Value::Object(self.0))
        };
        envelope.with("stream", stream)
    }

    /// Accept a decoded JSON value if it is an object with a string `event`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) if map.get(EVENT_KEY).is_some_and(Value::is_string) => {
                Some(Envelope(map))
            }
            _ => None,
        }
    }

    pub fn event(&self) -> &str {
        self.0
            .get(EVENT_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.0
            .get(JOB_ID_KEY)
            .and_then(Value::as_str)
            .map(JobId::from)
    }

    /// Set `jobId` unless the worker already provided one.
    pub fn stamp_job_id(&mut self, job_id: &JobId) {
        if !self.0.contains_key(JOB_ID_KEY) {
            self.0
                .insert(JOB_ID_KEY.to_string(), Value::String(job_id.to_string()));
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn is_event(&self, name: &str) -> bool {
        self.event() == name
    }

    /// `completed`, `error` or `cancelled` reported by a backend: the job has
    /// an outcome but its `exit` is still to come.
    pub fn is_outcome(&self) -> bool {
        matches!(
            self.event(),
            event::COMPLETED | event::ERROR | event::CANCELLED
        )
    }

    /// Serialize as a single protocol line (without the trailing newline).
    pub fn to_line(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}
