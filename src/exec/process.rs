// src/exec/process.rs

//! Shared process plumbing: building worker commands and pumping their
//! output streams through a [`LineCodec`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::engine::RuntimeEvent;
use crate::protocol::{Envelope, LineCodec};

const READ_CHUNK: usize = 8 * 1024;

/// How long to wait for an output pump to reach end-of-stream after its
/// process exited. A grandchild holding the pipe open would otherwise keep
/// the exit notification back forever.
pub const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Fully resolved worker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl Launch {
    /// `program base_args.. script` plus the worker environment.
    pub fn for_script(worker: &WorkerConfig, script: &str) -> Self {
        let mut args = worker.base_args.clone();
        args.push(script.to_string());
        Self {
            program: worker.program.clone(),
            args,
            env: worker.env.clone(),
            working_dir: worker.working_dir.clone(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Build the Tokio command with piped stdout/stderr.
    ///
    /// The child is killed if its handle is dropped, so an aborted supervisor
    /// task never leaks a worker.
    pub fn command(&self, pipe_stdin: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Read `reader` to the end, decoding every line and forwarding each
/// envelope to the runtime as `to_event(envelope)`.
///
/// Any unterminated trailing text is decoded once the stream closes.
pub fn spawn_pump<R, F>(
    reader: R,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    label: String,
    to_event: F,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: Fn(Envelope) -> RuntimeEvent + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        let mut codec = LineCodec::new();
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    for envelope in codec.feed(&buf[..n]) {
                        if runtime_tx.send(to_event(envelope)).await.is_err() {
                            debug!(stream = %label, "runtime gone; stopping pump");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(stream = %label, error = %e, "error reading worker output");
                    break;
                }
            }
        }

        if let Some(envelope) = codec.finish() {
            let _ = runtime_tx.send(to_event(envelope)).await;
        }
        debug!(stream = %label, "output stream ended");
    })
}

/// Decode a diagnostics stream and log it instead of routing it anywhere.
pub fn spawn_diagnostics_pump<R>(reader: R, label: String) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        let mut codec = LineCodec::new();
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    for envelope in codec.feed(&buf[..n]) {
                        log_diagnostic(&label, &envelope);
                    }
                }
            }
        }
        if let Some(envelope) = codec.finish() {
            log_diagnostic(&label, &envelope);
        }
    })
}

fn log_diagnostic(label: &str, envelope: &Envelope) {
    match envelope.get("message").and_then(|m| m.as_str()) {
        Some(message) => debug!(stream = %label, "{}", message),
        None => debug!(stream = %label, "{}", envelope.to_line()),
    }
}

/// Wait for a pump to drain, giving up after [`PUMP_DRAIN_TIMEOUT`].
pub async fn drain_pump(handle: JoinHandle<()>, label: &str) {
    let abort = handle.abort_handle();
    if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, handle).await.is_err() {
        warn!(stream = %label, "output stream still open after process exit; abandoning it");
        abort.abort();
    }
}

/// Exit code and (on Unix) terminating signal of a finished process.
pub fn exit_details(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    (status.code(), signal)
}
