// tests/runtime_fake_backend.rs

mod common;
use crate::common::builders::PayloadBuilder;
use crate::common::{collect_until_terminal, events, init_tracing, touch, with_timeout};

use std::error::Error;
use std::path::Path;

use serde_json::json;

use anonctl::engine::{BackendSelector, fixed_backend};
use anonctl::errors::ControlError;
use anonctl::protocol::{Envelope, event};
use anonctl::request::Payload;
use anonctl::types::{BackendKind, Channel};
use anonctl_test_utils::fake_backend::spawn_fake_plane;

type TestResult = Result<(), Box<dyn Error>>;

fn by_default() -> BackendSelector {
    Box::new(|channel| match channel {
        Channel::Anonymize => BackendKind::Service,
        Channel::Restore => BackendKind::Ephemeral,
    })
}

fn anonymize_payload(dir: &Path) -> Payload {
    PayloadBuilder::new().input(&touch(dir, "clip.mp4")).build()
}

fn restore_payload(dir: &Path) -> Payload {
    PayloadBuilder::new()
        .input(&touch(dir, "clip_anonymized.mp4"))
        .data_pack(&touch(dir, "clip.pack"))
        .aes_key("00ff")
        .build()
}

#[tokio::test]
async fn service_job_events_reach_the_requester() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fake = spawn_fake_plane(by_default());

    let surface = fake.plane.handle.open_surface().await?;
    let mut sub = surface.subscribe(Channel::Anonymize).await?;
    let job_id = surface
        .start(Channel::Anonymize, anonymize_payload(dir.path()))
        .await?;

    {
        let state = fake.service.lock().unwrap();
        assert_eq!(state.started.len(), 1);
        assert_eq!(state.started[0].id, job_id);
        assert!(state.started[0].payload.contains_key("outputPath"));
    }

    fake.worker
        .service_output(1, Envelope::for_job(&job_id, event::STARTED))
        .await;
    fake.worker
        .service_output(
            1,
            Envelope::for_job(&job_id, event::PROGRESS).with("processed", 10),
        )
        .await;
    fake.worker
        .service_output(1, Envelope::for_job(&job_id, event::COMPLETED))
        .await;
    fake.worker
        .service_output(1, Envelope::for_job(&job_id, event::EXIT).with("code", 0))
        .await;

    let seen = with_timeout(collect_until_terminal(&mut sub)).await;
    assert_eq!(events(&seen), ["started", "progress", "completed", "exit"]);
    assert_eq!(seen[1].get("processed"), Some(&json!(10)));
    assert!(seen.iter().all(|e| e.job_id().as_ref() == Some(&job_id)));

    with_timeout(fake.plane.shutdown()).await?;
    assert_eq!(fake.service.lock().unwrap().released, vec![job_id]);
    assert_eq!(fake.service.lock().unwrap().shutdowns, 1);
    assert_eq!(fake.ephemeral.lock().unwrap().shutdowns, 1);
    Ok(())
}

#[tokio::test]
async fn events_never_reach_other_surfaces() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fake = spawn_fake_plane(by_default());

    let owner = fake.plane.handle.open_surface().await?;
    let bystander = fake.plane.handle.open_surface().await?;
    let mut owner_sub = owner.subscribe(Channel::Restore).await?;
    let mut bystander_sub = bystander.subscribe(Channel::Restore).await?;

    let job_id = owner.start(Channel::Restore, restore_payload(dir.path())).await?;
    fake.worker.job_output(&job_id, event::STARTED).await;
    fake.worker.job_output(&job_id, event::EXIT).await;

    let seen = with_timeout(collect_until_terminal(&mut owner_sub)).await;
    assert_eq!(events(&seen), ["started", "exit"]);
    assert!(bystander_sub.try_recv().is_none());

    with_timeout(fake.plane.shutdown()).await?;
    Ok(())
}

#[tokio::test]
async fn cancel_delivers_one_cancelled_and_then_reports_not_found() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fake = spawn_fake_plane(by_default());

    let surface = fake.plane.handle.open_surface().await?;
    let mut sub = surface.subscribe(Channel::Restore).await?;
    let job_id = surface
        .start(Channel::Restore, restore_payload(dir.path()))
        .await?;
    fake.worker.job_output(&job_id, event::STARTED).await;
    let first = with_timeout(sub.recv()).await.expect("started envelope");
    assert_eq!(first.event(), event::STARTED);

    assert!(surface.cancel(Channel::Restore, &job_id).await?);
    assert!(!surface.cancel(Channel::Restore, &job_id).await?);

    // The killed process still reports its exit; it must be swallowed.
    fake.worker.job_output(&job_id, event::EXIT).await;

    let seen = with_timeout(collect_until_terminal(&mut sub)).await;
    assert_eq!(events(&seen), ["cancelled"]);

    with_timeout(fake.plane.shutdown()).await?;
    assert!(sub.try_recv().is_none());
    assert_eq!(fake.ephemeral.lock().unwrap().cancelled, vec![job_id.clone()]);
    assert_eq!(fake.ephemeral.lock().unwrap().released, vec![job_id]);
    Ok(())
}

#[tokio::test]
async fn refused_cancel_reports_error_and_job_finishes_normally() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fake = spawn_fake_plane(by_default());
    fake.service.lock().unwrap().refuse_cancel = true;

    let surface = fake.plane.handle.open_surface().await?;
    let mut sub = surface.subscribe(Channel::Anonymize).await?;
    let job_id = surface
        .start(Channel::Anonymize, anonymize_payload(dir.path()))
        .await?;

    assert!(!surface.cancel(Channel::Anonymize, &job_id).await?);
    fake.worker
        .service_output(1, Envelope::for_job(&job_id, event::EXIT))
        .await;

    let seen = with_timeout(collect_until_terminal(&mut sub)).await;
    assert_eq!(events(&seen), ["error", "exit"]);

    with_timeout(fake.plane.shutdown()).await?;
    Ok(())
}

#[tokio::test]
async fn service_crash_fails_in_flight_jobs() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fake = spawn_fake_plane(by_default());

    let first = fake.plane.handle.open_surface().await?;
    let second = fake.plane.handle.open_surface().await?;
    let mut first_sub = first.subscribe(Channel::Anonymize).await?;
    let mut second_sub = second.subscribe(Channel::Anonymize).await?;

    let a = first
        .start(Channel::Anonymize, anonymize_payload(dir.path()))
        .await?;
    let b = second
        .start(Channel::Anonymize, anonymize_payload(dir.path()))
        .await?;

    fake.worker.service_exited(1, None).await;

    let seen_a = with_timeout(collect_until_terminal(&mut first_sub)).await;
    let seen_b = with_timeout(collect_until_terminal(&mut second_sub)).await;
    assert_eq!(events(&seen_a), ["error", "exit"]);
    assert_eq!(events(&seen_b), ["error", "exit"]);
    assert_eq!(seen_a[0].job_id(), Some(a.clone()));
    assert_eq!(seen_b[0].job_id(), Some(b.clone()));
    assert_eq!(
        seen_a[0].get("message"),
        Some(&json!("backend terminated unexpectedly"))
    );

    // Both jobs are gone: cancelling them now finds nothing.
    assert!(!first.cancel(Channel::Anonymize, &a).await?);
    assert!(!second.cancel(Channel::Anonymize, &b).await?);

    with_timeout(fake.plane.shutdown()).await?;
    assert_eq!(fake.service.lock().unwrap().observed_exits, vec![1]);
    Ok(())
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_dispatch() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fake = spawn_fake_plane(by_default());
    let surface = fake.plane.handle.open_surface().await?;

    let missing = PayloadBuilder::new()
        .input(&dir.path().join("nope.mp4"))
        .build();
    match surface.start(Channel::Anonymize, missing).await {
        Err(ControlError::MissingInput(_)) => {}
        other => panic!("Expected MissingInput, got: {:?}", other),
    }

    match surface.start(Channel::Restore, Payload::new()).await {
        Err(ControlError::InvalidRequest(_)) => {}
        other => panic!("Expected InvalidRequest, got: {:?}", other),
    }

    assert!(fake.service.lock().unwrap().started.is_empty());
    assert!(fake.ephemeral.lock().unwrap().started.is_empty());

    with_timeout(fake.plane.shutdown()).await?;
    Ok(())
}

#[tokio::test]
async fn spawn_failure_is_reported_synchronously() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fake = spawn_fake_plane(fixed_backend(BackendKind::Ephemeral));
    fake.ephemeral.lock().unwrap().fail_start = true;

    let surface = fake.plane.handle.open_surface().await?;
    match surface
        .start(Channel::Anonymize, anonymize_payload(dir.path()))
        .await
    {
        Err(ControlError::Spawn(_)) => {}
        other => panic!("Expected Spawn error, got: {:?}", other),
    }

    with_timeout(fake.plane.shutdown()).await?;
    Ok(())
}

#[tokio::test]
async fn closed_surface_stops_receiving_but_job_keeps_running() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fake = spawn_fake_plane(by_default());

    let surface = fake.plane.handle.open_surface().await?;
    let mut sub = surface.subscribe(Channel::Restore).await?;
    let job_id = surface
        .start(Channel::Restore, restore_payload(dir.path()))
        .await?;
    surface.close().await;
    // Requests are handled in order, so this round trip means the close landed.
    let _other = fake.plane.handle.open_surface().await?;

    fake.worker.job_output(&job_id, event::PROGRESS).await;
    fake.worker.job_output(&job_id, event::EXIT).await;

    // The router dropped the subscription with the surface.
    assert!(with_timeout(sub.recv()).await.is_none());

    with_timeout(fake.plane.shutdown()).await?;
    assert!(fake.ephemeral.lock().unwrap().cancelled.is_empty());
    assert_eq!(fake.ephemeral.lock().unwrap().released, vec![job_id]);
    Ok(())
}

#[tokio::test]
async fn requests_after_shutdown_fail() -> TestResult {
    init_tracing();
    let fake = spawn_fake_plane(by_default());
    let handle = fake.plane.handle.clone();

    with_timeout(fake.plane.shutdown()).await?;
    assert!(matches!(
        handle.open_surface().await,
        Err(ControlError::Shutdown)
    ));
    Ok(())
}
