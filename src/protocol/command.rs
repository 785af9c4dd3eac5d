// src/protocol/command.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::JobId;

/// Commands written to the persistent service's stdin, one JSON per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServiceCommand {
    Start {
        #[serde(rename = "jobId")]
        job_id: JobId,
        payload: Map<String, Value>,
    },
    Cancel {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    Shutdown,
}

impl ServiceCommand {
    /// Serialize as a protocol line, newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
