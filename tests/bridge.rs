// tests/bridge.rs

mod common;
use crate::common::builders::PayloadBuilder;
use crate::common::{init_tracing, touch, with_timeout};

use std::error::Error;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

use anonctl::bridge::serve;
use anonctl::engine::fixed_backend;
use anonctl::protocol::event;
use anonctl::types::{BackendKind, JobId};
use anonctl_test_utils::fake_backend::spawn_fake_plane;

type TestResult = Result<(), Box<dyn Error>>;

/// Read output lines until one matches `pred`, returning it. Non-matching
/// lines are kept in `skipped`.
async fn read_until(
    lines: &mut Lines<BufReader<DuplexStream>>,
    skipped: &mut Vec<Value>,
    pred: impl Fn(&Value) -> bool,
) -> Value {
    loop {
        let line = lines
            .next_line()
            .await
            .expect("read bridge output")
            .expect("bridge output ended early");
        let value: Value = serde_json::from_str(&line).expect("bridge writes JSON lines");
        if pred(&value) {
            return value;
        }
        skipped.push(value);
    }
}

#[tokio::test]
async fn bridge_starts_reports_and_cancels_jobs() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fake = spawn_fake_plane(fixed_backend(BackendKind::Ephemeral));

    let (mut client_in, server_in) = tokio::io::duplex(64 * 1024);
    let (server_out, client_out) = tokio::io::duplex(64 * 1024);
    let bridge = tokio::spawn(serve(
        fake.plane.handle.clone(),
        BufReader::new(server_in),
        server_out,
    ));
    let mut lines = BufReader::new(client_out).lines();
    let mut skipped = Vec::new();

    let payload = PayloadBuilder::new()
        .input(&touch(dir.path(), "a.mp4"))
        .data_pack(&touch(dir.path(), "a.pack"))
        .aes_key("00ff")
        .build();
    let start = json!({ "op": "start", "channel": "restore", "payload": payload });
    client_in
        .write_all(format!("{start}\n").as_bytes())
        .await?;

    let reply = with_timeout(read_until(&mut lines, &mut skipped, |v| v["op"] == "start")).await;
    assert_eq!(reply["ok"], json!(true));
    let job_id = JobId::from(reply["jobId"].as_str().expect("jobId in reply"));

    fake.worker.job_output(&job_id, event::STARTED).await;
    let started =
        with_timeout(read_until(&mut lines, &mut skipped, |v| v["event"] == "started")).await;
    assert_eq!(started["jobId"], json!(job_id.as_str()));

    let cancel = json!({ "op": "cancel", "channel": "restore", "jobId": job_id.as_str() });
    client_in
        .write_all(format!("{cancel}\n").as_bytes())
        .await?;
    let reply = with_timeout(read_until(&mut lines, &mut skipped, |v| v["op"] == "cancel")).await;
    assert_eq!(reply["ok"], json!(true));

    client_in.write_all(b"this is not a request\n").await?;
    let error = with_timeout(read_until(&mut lines, &mut skipped, |v| {
        v["ok"] == json!(false) && v.get("op").is_none()
    }))
    .await;
    assert!(error["error"].is_string());

    // EOF on input shuts everything down and closes the output.
    drop(client_in);
    while let Some(line) = with_timeout(lines.next_line()).await? {
        skipped.push(serde_json::from_str(&line)?);
    }
    with_timeout(bridge).await??;
    with_timeout(fake.plane.join()).await?;

    let cancelled = skipped
        .iter()
        .filter(|v| v["event"] == "cancelled" && v["jobId"] == json!(job_id.as_str()))
        .count();
    assert_eq!(cancelled, 1);
    Ok(())
}

#[tokio::test]
async fn bridge_reports_rejected_starts() -> TestResult {
    init_tracing();
    let fake = spawn_fake_plane(fixed_backend(BackendKind::Ephemeral));

    let (mut client_in, server_in) = tokio::io::duplex(64 * 1024);
    let (server_out, client_out) = tokio::io::duplex(64 * 1024);
    let bridge = tokio::spawn(serve(
        fake.plane.handle.clone(),
        BufReader::new(server_in),
        server_out,
    ));
    let mut lines = BufReader::new(client_out).lines();
    let mut skipped = Vec::new();

    client_in
        .write_all(b"{\"op\":\"start\",\"channel\":\"anonymize\",\"payload\":{}}\n")
        .await?;
    let reply = with_timeout(read_until(&mut lines, &mut skipped, |v| v["op"] == "start")).await;
    assert_eq!(reply["ok"], json!(false));
    assert!(reply["error"].as_str().unwrap().contains("inputPath"));

    drop(client_in);
    while with_timeout(lines.next_line()).await?.is_some() {}
    with_timeout(bridge).await??;
    with_timeout(fake.plane.join()).await?;

    assert!(fake.ephemeral.lock().unwrap().started.is_empty());
    Ok(())
}
