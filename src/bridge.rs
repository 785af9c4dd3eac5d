// src/bridge.rs

//! Line-oriented surface bridge used by `anonctl serve`.
//!
//! A headless front end writes one request per line and reads replies and
//! job envelopes back, one JSON object per line. All jobs started through
//! one bridge share a single surface.

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{ControlHandle, Surface};
use crate::errors::{ControlError, Result};
use crate::request::Payload;
use crate::types::{Channel, JobId};

/// One request line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum BridgeRequest {
    Start {
        channel: Channel,
        #[serde(default)]
        payload: Payload,
    },
    Cancel {
        channel: Channel,
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
}

/// Serve requests from `input` until EOF, then shut the control plane down.
///
/// Replies look like `{"op":"start","ok":true,"jobId":..}`,
/// `{"op":"cancel","ok":false,"jobId":..}` or, for unparseable lines,
/// `{"ok":false,"error":..}`. Envelopes are written as they arrive.
pub async fn serve<R, W>(handle: ControlHandle, input: R, output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(output, out_rx));

    let surface = handle.open_surface().await?;
    let mut forwarders = Vec::new();
    for channel in Channel::ALL {
        let mut subscription = surface.subscribe(channel).await?;
        let out = out_tx.clone();
        forwarders.push(tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                if out.send(envelope.to_line()).is_err() {
                    break;
                }
            }
        }));
    }
    info!(surface = %surface.id(), "bridge ready");

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<BridgeRequest>(line) {
            Ok(request) => handle_request(&surface, request).await?,
            Err(e) => {
                warn!(error = %e, "unparseable bridge request");
                json!({ "ok": false, "error": e.to_string() })
            }
        };
        if out_tx.send(reply.to_string()).is_err() {
            break;
        }
    }

    debug!("bridge input closed; shutting down");
    handle.shutdown().await?;
    drop(surface);
    drop(out_tx);
    for forwarder in forwarders {
        let _ = forwarder.await;
    }
    writer
        .await
        .map_err(|e| ControlError::Other(anyhow::anyhow!("bridge writer failed: {e}")))??;
    Ok(())
}

async fn handle_request(surface: &Surface, request: BridgeRequest) -> Result<Value> {
    let reply = match request {
        BridgeRequest::Start { channel, payload } => match surface.start(channel, payload).await {
            Ok(job_id) => json!({ "op": "start", "ok": true, "jobId": job_id }),
            Err(ControlError::Shutdown) => return Err(ControlError::Shutdown),
            Err(e) => json!({ "op": "start", "ok": false, "error": e.to_string() }),
        },
        BridgeRequest::Cancel { channel, job_id } => {
            let ok = surface.cancel(channel, &job_id).await?;
            json!({ "op": "cancel", "ok": ok, "jobId": job_id })
        }
    };
    Ok(reply)
}

async fn write_lines<W>(mut output: W, mut lines: mpsc::UnboundedReceiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(())
}
