// tests/core_runtime.rs

mod common;
use crate::common::init_tracing;

use serde_json::json;

use anonctl::engine::cancel::CANCEL_FAILED;
use anonctl::engine::core::BACKEND_TERMINATED;
use anonctl::engine::{CancelOutcome, CoreCommand, CoreRuntime, coordinate_cancel};
use anonctl::exec::BackendSet;
use anonctl::protocol::{Envelope, event};
use anonctl::types::{BackendKind, Channel, JobId, JobState, SurfaceId};
use anonctl_test_utils::fake_backend::{FakeBackend, SharedState};

fn fake_backends() -> (BackendSet, SharedState, SharedState) {
    let (ephemeral, ephemeral_state) = FakeBackend::new(BackendKind::Ephemeral);
    let (service, service_state) = FakeBackend::new(BackendKind::Service);
    (
        BackendSet::new(Box::new(ephemeral), Box::new(service)),
        ephemeral_state,
        service_state,
    )
}

fn started(core: &mut CoreRuntime, channel: Channel, surface: u64, backend: BackendKind) -> JobId {
    started_on(core, channel, surface, backend, 1)
}

fn started_on(
    core: &mut CoreRuntime,
    channel: Channel,
    surface: u64,
    backend: BackendKind,
    generation: u64,
) -> JobId {
    let id = core.register(channel, SurfaceId(surface), backend);
    assert!(core.accept(&id, Some(generation)));
    id
}

fn delivered(commands: &[CoreCommand]) -> Vec<(SurfaceId, Envelope)> {
    commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::Deliver {
                requester,
                envelope,
                ..
            } => Some((*requester, envelope.clone())),
            CoreCommand::Release { .. } => None,
        })
        .collect()
}

#[test]
fn accept_occupies_a_slot_only_for_service_jobs() {
    let mut core = CoreRuntime::new();
    let svc = started(&mut core, Channel::Anonymize, 1, BackendKind::Service);
    let eph = started(&mut core, Channel::Restore, 1, BackendKind::Ephemeral);

    assert!(core.slots().contains(&svc));
    assert!(!core.slots().contains(&eph));
    assert_eq!(core.job(&svc).unwrap().state, JobState::Running);
}

#[test]
fn exit_removes_the_job_and_releases_the_backend() {
    init_tracing();
    let mut core = CoreRuntime::new();
    let id = started(&mut core, Channel::Restore, 4, BackendKind::Ephemeral);

    let cmds = core.on_job_output(&id, Envelope::for_job(&id, event::PROGRESS).with("processed", 1));
    assert_eq!(delivered(&cmds).len(), 1);

    let cmds = core.on_job_output(&id, Envelope::for_job(&id, event::COMPLETED));
    assert_eq!(core.job(&id).unwrap().state, JobState::Terminating);
    assert_eq!(delivered(&cmds)[0].0, SurfaceId(4));

    let cmds = core.on_job_output(&id, Envelope::for_job(&id, event::EXIT).with("code", 0));
    assert!(core.job(&id).is_none());
    assert_eq!(
        cmds.last(),
        Some(&CoreCommand::Release {
            job_id: id.clone(),
            backend: BackendKind::Ephemeral,
        })
    );

    // Anything after the exit is discarded.
    assert!(core.on_job_output(&id, Envelope::for_job(&id, event::LOG)).is_empty());
}

#[test]
fn service_output_is_demultiplexed_by_job_id() {
    let mut core = CoreRuntime::new();
    let a = started(&mut core, Channel::Anonymize, 1, BackendKind::Service);
    let b = started(&mut core, Channel::Anonymize, 2, BackendKind::Service);

    let cmds = core.on_service_output(Envelope::for_job(&b, event::STARTED));
    let out = delivered(&cmds);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, SurfaceId(2));

    let cmds = core.on_service_output(Envelope::for_job(&a, event::PROGRESS));
    assert_eq!(delivered(&cmds)[0].0, SurfaceId(1));

    assert!(core.on_service_output(Envelope::for_job(&JobId::from("nobody"), event::PROGRESS)).is_empty());
    assert!(core.on_service_output(Envelope::new(event::SERVICE_ERROR).with("message", "boom")).is_empty());
    assert!(core.on_service_output(Envelope::log("model loaded")).is_empty());
}

#[test]
fn service_exit_fails_every_slotted_job() {
    init_tracing();
    let mut core = CoreRuntime::new();
    let a = started(&mut core, Channel::Anonymize, 1, BackendKind::Service);
    let b = started(&mut core, Channel::Anonymize, 2, BackendKind::Service);
    let eph = started(&mut core, Channel::Restore, 3, BackendKind::Ephemeral);

    let cmds = core.on_service_exit(1, Some(137), None);
    let out = delivered(&cmds);

    // Two envelopes per lost job: error, then exit.
    assert_eq!(out.len(), 4);
    for id in [&a, &b] {
        let mine: Vec<&Envelope> = out
            .iter()
            .filter(|(_, e)| e.job_id().as_ref() == Some(id))
            .map(|(_, e)| e)
            .collect();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].event(), event::ERROR);
        assert_eq!(mine[0].get("message"), Some(&json!(BACKEND_TERMINATED)));
        assert_eq!(mine[1].event(), event::EXIT);
        assert_eq!(mine[1].get("code"), Some(&json!(137)));
    }
    assert!(out.iter().all(|(s, _)| *s != SurfaceId(3)));

    assert!(core.slots().is_empty());
    assert!(core.job(&a).is_none());
    assert!(core.job(&b).is_none());
    assert!(core.job(&eph).is_some(), "ephemeral jobs are unaffected");
}

#[test]
fn service_exit_with_no_jobs_is_quiet() {
    let mut core = CoreRuntime::new();
    assert!(core.on_service_exit(1, Some(0), None).is_empty());
}

#[test]
fn late_exit_of_an_old_service_spares_jobs_on_the_new_one() {
    init_tracing();
    let mut core = CoreRuntime::new();
    let old = started_on(&mut core, Channel::Anonymize, 1, BackendKind::Service, 1);
    let new = started_on(&mut core, Channel::Anonymize, 2, BackendKind::Service, 2);
    assert_eq!(core.slots().generation_of(&new), Some(2));

    let out = delivered(&core.on_service_exit(1, Some(7), None));
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|(s, e)| *s == SurfaceId(1) && e.job_id() == Some(old.clone())));

    assert!(core.job(&old).is_none());
    assert_eq!(core.job(&new).unwrap().state, JobState::Running);
    assert!(core.slots().contains(&new));

    let cmds = core.on_service_output(Envelope::for_job(&new, event::PROGRESS));
    assert_eq!(delivered(&cmds)[0].0, SurfaceId(2));
}

#[test]
fn cancel_synthesizes_cancelled_and_second_cancel_is_not_found() {
    init_tracing();
    let mut core = CoreRuntime::new();
    let (mut backends, ephemeral, _service) = fake_backends();
    let id = started(&mut core, Channel::Restore, 7, BackendKind::Ephemeral);

    let (outcome, cmds) = coordinate_cancel(&mut core, &mut backends, Channel::Restore, &id);
    assert_eq!(outcome, CancelOutcome::Cancelled);
    let out = delivered(&cmds);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, SurfaceId(7));
    assert_eq!(out[0].1.event(), event::CANCELLED);
    assert!(core.job(&id).is_none());
    assert_eq!(ephemeral.lock().unwrap().cancelled, vec![id.clone()]);

    let (again, cmds) = coordinate_cancel(&mut core, &mut backends, Channel::Restore, &id);
    assert_eq!(again, CancelOutcome::NotFound);
    assert!(cmds.is_empty());

    // The process's own exit arrives later and is dropped.
    assert!(core.on_job_output(&id, Envelope::for_job(&id, event::EXIT)).is_empty());
}

#[test]
fn cancel_of_a_service_job_frees_its_slot() {
    let mut core = CoreRuntime::new();
    let (mut backends, _ephemeral, service) = fake_backends();
    let id = started(&mut core, Channel::Anonymize, 1, BackendKind::Service);

    let (outcome, cmds) = coordinate_cancel(&mut core, &mut backends, Channel::Anonymize, &id);
    assert!(outcome.succeeded());
    assert!(!core.slots().contains(&id));
    assert!(cmds.contains(&CoreCommand::Release {
        job_id: id.clone(),
        backend: BackendKind::Service,
    }));
    assert_eq!(service.lock().unwrap().cancelled.len(), 1);
}

#[test]
fn failed_cancel_reports_error_and_keeps_the_job() {
    let mut core = CoreRuntime::new();
    let (mut backends, _ephemeral, service) = fake_backends();
    service.lock().unwrap().refuse_cancel = true;
    let id = started(&mut core, Channel::Anonymize, 5, BackendKind::Service);

    let (outcome, cmds) = coordinate_cancel(&mut core, &mut backends, Channel::Anonymize, &id);
    assert_eq!(outcome, CancelOutcome::Failed);
    assert!(!outcome.succeeded());

    let out = delivered(&cmds);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].1.event(), event::ERROR);
    assert_eq!(out[0].1.get("message"), Some(&json!(CANCEL_FAILED)));

    let job = core.job(&id).expect("job stays registered");
    assert_eq!(job.state, JobState::Running);
    assert!(core.slots().contains(&id));
}

#[test]
fn cancel_on_the_wrong_channel_is_not_found() {
    let mut core = CoreRuntime::new();
    let (mut backends, ephemeral, _service) = fake_backends();
    let id = started(&mut core, Channel::Restore, 1, BackendKind::Ephemeral);

    let (outcome, cmds) = coordinate_cancel(&mut core, &mut backends, Channel::Anonymize, &id);
    assert_eq!(outcome, CancelOutcome::NotFound);
    assert!(cmds.is_empty());
    assert!(core.job(&id).is_some());
    assert!(ephemeral.lock().unwrap().cancelled.is_empty());
}

#[test]
fn clear_forgets_everything() {
    let mut core = CoreRuntime::new();
    started(&mut core, Channel::Anonymize, 1, BackendKind::Service);
    started(&mut core, Channel::Restore, 1, BackendKind::Ephemeral);

    assert_eq!(core.clear(), 2);
    assert!(core.jobs().is_empty());
    assert!(core.slots().is_empty());
}
