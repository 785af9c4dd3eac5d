// src/lib.rs

pub mod bridge;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod request;
pub mod router;
pub mod types;

use std::path::Path;

use anyhow::{Context, Result, bail};
use tokio::io::BufReader;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::{ConfigFile, load_or_default};
use crate::engine::ControlPlane;
use crate::protocol::event;
use crate::request::Payload;
use crate::types::Channel;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the control plane runtime and its backends
/// - the chosen front end (`run` or `serve`)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_or_default(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    match args.command {
        Some(Command::Run {
            channel,
            payload,
            payload_file,
        }) => {
            let payload = read_payload(payload.as_deref(), payload_file.as_deref())?;
            run_job(&cfg, channel, payload).await
        }
        Some(Command::Serve) => {
            let plane = ControlPlane::spawn(&cfg);
            let stdin = BufReader::new(tokio::io::stdin());
            bridge::serve(plane.handle.clone(), stdin, tokio::io::stdout()).await?;
            plane.join().await?;
            Ok(())
        }
        None => bail!("no command given (try `anonctl run --help` or `anonctl serve`)"),
    }
}

/// Run one job to completion, printing its envelopes to stdout.
///
/// Ctrl-C cancels the job; a second Ctrl-C is ignored while the
/// cancellation is confirmed.
async fn run_job(cfg: &ConfigFile, channel: Channel, payload: Payload) -> Result<()> {
    let plane = ControlPlane::spawn(cfg);
    let surface = plane.handle.open_surface().await?;
    let mut events = surface.subscribe(channel).await?;
    let job_id = surface.start(channel, payload).await?;
    info!(job_id = %job_id, %channel, "job submitted");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;
    let mut exit_code: Option<i64> = None;
    let mut cancelled = false;

    loop {
        tokio::select! {
            envelope = events.recv() => {
                let Some(envelope) = envelope else {
                    warn!(job_id = %job_id, "event stream closed before the job finished");
                    break;
                };
                if envelope.job_id().as_ref() != Some(&job_id) {
                    continue;
                }
                println!("{}", envelope.to_line());
                if envelope.is_event(event::EXIT) {
                    exit_code = envelope.get("code").and_then(|c| c.as_i64());
                    break;
                }
                if envelope.is_event(event::CANCELLED) {
                    cancelled = true;
                    break;
                }
            }
            res = &mut ctrl_c, if !cancel_requested => {
                cancel_requested = true;
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                    continue;
                }
                info!(job_id = %job_id, "Ctrl+C received; cancelling job");
                if !surface.cancel(channel, &job_id).await? {
                    warn!(job_id = %job_id, "job could not be cancelled");
                }
            }
        }
    }

    drop(events);
    drop(surface);
    plane.shutdown().await?;

    if cancelled {
        bail!("job {job_id} was cancelled");
    }
    match exit_code {
        Some(0) => Ok(()),
        Some(code) => bail!("job {job_id} exited with code {code}"),
        None => bail!("job {job_id} ended without an exit code"),
    }
}

fn read_payload(inline: Option<&str>, file: Option<&Path>) -> Result<Payload> {
    let text = match (inline, file) {
        (Some(text), _) => text.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading payload file {}", path.display()))?,
        (None, None) => bail!("a payload is required (--payload or --payload-file)"),
    };
    let payload: Payload =
        serde_json::from_str(&text).context("payload must be a JSON object")?;
    Ok(payload)
}

/// Simple dry-run output: print the resolved configuration.
fn print_dry_run(cfg: &ConfigFile) {
    println!("anonctl dry-run");
    println!(
        "  worker.program = {} {}",
        cfg.worker.program,
        cfg.worker.base_args.join(" ")
    );
    if let Some(ref dir) = cfg.worker.working_dir {
        println!("  worker.working_dir = {}", dir.display());
    }
    for (key, value) in &cfg.worker.env {
        println!("  worker.env.{key} = {value}");
    }
    println!("  service.script = {}", cfg.service.script);
    println!("  service.shutdown_grace = {:?}", cfg.service.shutdown_grace);
    println!();

    println!("channels ({}):", Channel::ALL.len());
    for channel in Channel::ALL {
        let ch = cfg.channel(channel);
        println!("  - {channel}");
        println!("      script: {}", ch.script);
        println!("      backend: {}", ch.backend);
    }

    debug!("dry-run complete (no execution)");
}
