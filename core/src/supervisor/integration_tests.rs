//! Supervisor scenarios on a manual clock with the mock process adapter

use super::state_machine::tests::RecordingRegistry;
use super::*;
use crate::capabilities::Capabilities;
use crate::clock::TickClock;
use crate::logging::snapshot_shared;
use schema::{
    ControlCode, CustomAction, CustomActionBinding, DrainStrategy, ExitCodeOverride,
    ProcessState, RestartDecision, RunMode, SupervisorSpec, SupervisorState, UrgentFlag,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    ctx: SupervisorContext,
    handles: SupervisorHandles,
    clock: TickClock,
    adapter: MockProcessAdapter,
    registry: Arc<RecordingRegistry>,
}

fn test_spec() -> SupervisorSpec {
    SupervisorSpec::for_command("app", vec!["--serve".to_string()])
}

fn harness_at(spec: SupervisorSpec, mode: RunMode, start: u32) -> Harness {
    let clock = TickClock::manual(spec.timing.tick_ms, start);
    let adapter = MockProcessAdapter::with_clock(clock.clone());
    adapter.set_fallback(MockInstruction::long_running());
    let registry = Arc::new(RecordingRegistry::default());
    let (ctx, handles) = SupervisorContext::new(
        spec,
        mode,
        clock.clone(),
        Arc::new(adapter.clone()),
        registry.clone(),
        Capabilities::none(),
    );
    Harness {
        ctx,
        handles,
        clock,
        adapter,
        registry,
    }
}

fn harness(spec: SupervisorSpec) -> Harness {
    harness_at(spec, RunMode::Console, 0)
}

#[tokio::test]
async fn clean_exit_stops_supervisor() {
    let mut h = harness(test_spec());
    h.adapter
        .add_instruction(MockInstruction::exits_with(0, Duration::from_secs(1)))
        .await;

    assert_eq!(h.ctx.step().await, None);
    assert_eq!(h.ctx.state(), SupervisorState::Started);
    assert_eq!(h.ctx.process().state(), ProcessState::Up);

    h.clock.advance_secs(1);
    assert_eq!(h.ctx.step().await, Some(RunOutcome::Clean));
    assert_eq!(h.ctx.process().state(), ProcessState::Down);
    assert_eq!(h.ctx.process().consecutive_failures(), 0);
    assert_eq!(h.adapter.spawn_count(), 1);
    assert_eq!(
        h.registry.states(),
        vec![
            SupervisorState::Starting,
            SupervisorState::Started,
            SupervisorState::Stopping,
            SupervisorState::Stopped
        ]
    );
}

#[tokio::test]
async fn crashes_back_off_then_give_up() {
    let mut spec = test_spec();
    spec.restart.backoff.first_delay_secs = 1;
    spec.restart.backoff.multiplier = 2.0;
    spec.restart.backoff.max_delay_secs = 30;
    spec.restart.max_retries = 5;
    let mut h = harness(spec);
    h.adapter
        .set_fallback(MockInstruction::killed_by(libc::SIGSEGV, Duration::ZERO));

    assert_eq!(h.ctx.step().await, None);
    for (i, delay) in [1u32, 2, 4, 8, 16].into_iter().enumerate() {
        let failures = i as u32 + 1;
        assert_eq!(h.ctx.step().await, None);
        assert_eq!(h.ctx.process().consecutive_failures(), failures);
        assert_eq!(h.ctx.process().state(), ProcessState::Down);

        h.clock.advance_secs(delay - 1);
        assert_eq!(h.ctx.step().await, None);
        assert_eq!(h.adapter.spawn_count(), failures, "launched before backoff");

        h.clock.advance_secs(1);
        assert_eq!(h.ctx.step().await, None);
        assert_eq!(h.adapter.spawn_count(), failures + 1);
    }

    assert_eq!(h.ctx.step().await, Some(RunOutcome::SupervisorFailure));
    assert_eq!(h.ctx.process().consecutive_failures(), 6);
    assert_eq!(h.ctx.process().restarts(), 5);
}

#[tokio::test]
async fn stable_run_resets_failures_across_wraparound() {
    let mut spec = test_spec();
    spec.restart.stable_after_secs = 5;
    let mut h = harness_at(spec, RunMode::Console, u32::MAX - 100);
    h.adapter
        .add_instruction(MockInstruction::killed_by(libc::SIGABRT, Duration::ZERO))
        .await;

    h.ctx.step().await;
    h.ctx.step().await;
    assert_eq!(h.ctx.process().consecutive_failures(), 1);

    h.clock.advance_secs(1);
    h.ctx.step().await;
    assert_eq!(h.ctx.process().state(), ProcessState::Up);

    h.clock.advance_secs(4);
    h.ctx.step().await;
    assert_eq!(h.ctx.process().consecutive_failures(), 1);

    h.clock.advance_secs(1);
    h.ctx.step().await;
    assert_eq!(h.ctx.process().consecutive_failures(), 0);
}

#[tokio::test]
async fn second_interrupt_after_delay_forces_kill() {
    let mut h = harness(test_spec());
    h.adapter.set_fallback(MockInstruction {
        responds_to_signals: false,
        ..MockInstruction::long_running()
    });

    h.ctx.step().await;
    let pid = h.ctx.process().pid().expect("running");

    h.handles.urgent.set_urgent(UrgentFlag::Interrupt);
    assert_eq!(h.ctx.step().await, None);
    assert_eq!(h.ctx.state(), SupervisorState::Stopping);

    h.clock.advance_secs(1);
    h.handles.urgent.set_urgent(UrgentFlag::Interrupt);
    assert_eq!(h.ctx.step().await, None);
    assert_eq!(h.ctx.state(), SupervisorState::Stopping);

    h.clock.advance_secs(1);
    h.handles.urgent.set_urgent(UrgentFlag::Interrupt);
    assert_eq!(h.ctx.step().await, Some(RunOutcome::Clean));
    assert_eq!(
        h.adapter.signals_sent(),
        vec![(pid, libc::SIGTERM), (pid, libc::SIGKILL)]
    );
}

#[tokio::test]
async fn shutdown_timeout_kills_group() {
    let mut spec = test_spec();
    spec.timing.shutdown_timeout_secs = 10;
    let mut h = harness(spec);
    h.adapter.set_fallback(MockInstruction {
        responds_to_signals: false,
        ..MockInstruction::long_running()
    });

    h.ctx.step().await;
    h.handles.urgent.set_urgent(UrgentFlag::Shutdown);
    h.ctx.step().await;
    assert_eq!(h.ctx.state(), SupervisorState::Stopping);

    h.clock.advance_secs(9);
    assert_eq!(h.ctx.step().await, None);

    h.clock.advance_secs(1);
    assert_eq!(h.ctx.step().await, Some(RunOutcome::Clean));
    let signals: Vec<i32> = h.adapter.signals_sent().into_iter().map(|(_, s)| s).collect();
    assert_eq!(signals, vec![libc::SIGTERM, libc::SIGKILL]);
}

#[tokio::test]
async fn pause_and_resume_relaunch() {
    let mut h = harness(test_spec());
    h.ctx.step().await;

    assert!(h.handles.producer.try_enqueue(ControlCode::Pause));
    h.ctx.step().await;
    assert_eq!(h.ctx.state(), SupervisorState::Paused);
    assert_eq!(h.ctx.process().state(), ProcessState::Down);

    h.clock.advance_secs(5);
    h.ctx.step().await;
    assert_eq!(h.adapter.spawn_count(), 1, "no launch while paused");

    assert!(h.handles.producer.try_enqueue(ControlCode::Resume));
    h.ctx.step().await;
    assert_eq!(h.ctx.state(), SupervisorState::Started);
    assert_eq!(h.ctx.process().state(), ProcessState::Up);
    assert_eq!(h.adapter.spawn_count(), 2);
    assert_eq!(h.ctx.process().consecutive_failures(), 0);
    assert_eq!(
        h.registry.states(),
        vec![
            SupervisorState::Starting,
            SupervisorState::Started,
            SupervisorState::Pausing,
            SupervisorState::Paused,
            SupervisorState::Resuming,
            SupervisorState::Started
        ]
    );
}

#[tokio::test]
async fn resume_without_pause_is_ignored() {
    let mut h = harness(test_spec());
    h.ctx.step().await;
    h.handles.producer.try_enqueue(ControlCode::Resume);
    h.ctx.step().await;
    assert_eq!(h.ctx.state(), SupervisorState::Started);
    assert_eq!(h.adapter.spawn_count(), 1);
}

#[tokio::test]
async fn restart_event_relaunches_without_backoff() {
    let mut h = harness(test_spec());
    h.ctx.step().await;
    let first = h.ctx.process().pid();

    h.handles.producer.try_enqueue(ControlCode::Restart);
    h.ctx.step().await;
    assert_eq!(h.ctx.process().state(), ProcessState::Up);
    assert_ne!(h.ctx.process().pid(), first);
    assert_eq!(h.ctx.process().restarts(), 1);
    assert_eq!(h.ctx.process().consecutive_failures(), 0);
}

#[tokio::test]
async fn restart_exit_code_relaunches_immediately() {
    let mut spec = test_spec();
    spec.exit_policy.restart_exit_code = Some(75);
    let mut h = harness(spec);
    h.adapter
        .add_instruction(MockInstruction::exits_with(75, Duration::ZERO))
        .await;

    h.ctx.step().await;
    h.ctx.step().await;
    assert_eq!(h.adapter.spawn_count(), 2);
    assert_eq!(h.ctx.process().state(), ProcessState::Up);
    assert_eq!(h.ctx.process().consecutive_failures(), 1);
}

#[tokio::test]
async fn immediate_restarts_count_toward_max_retries() {
    let mut spec = test_spec();
    spec.restart.max_retries = 2;
    spec.exit_policy.on_ordinary = RestartDecision::Restart;
    let mut h = harness(spec);
    h.adapter.set_fallback(MockInstruction::exits_with(3, Duration::ZERO));

    let mut outcome = None;
    for _ in 0..40 {
        outcome = h.ctx.step().await;
        if outcome.is_some() {
            break;
        }
    }

    assert_eq!(outcome, Some(RunOutcome::SupervisorFailure));
    assert_eq!(h.adapter.spawn_count(), 3);
    assert_eq!(h.ctx.process().consecutive_failures(), 3);
}

#[tokio::test]
async fn stop_override_returns_application_code() {
    let mut spec = test_spec();
    spec.exit_policy.codes.push(ExitCodeOverride {
        code: 3,
        action: RestartDecision::Stop,
    });
    let mut h = harness(spec);
    h.adapter
        .add_instruction(MockInstruction::exits_with(3, Duration::ZERO))
        .await;

    h.ctx.step().await;
    let outcome = h.ctx.step().await.expect("stopped");
    assert_eq!(outcome, RunOutcome::ManagedExit(3));
    assert_eq!(outcome.exit_code(1), 3);
}

#[tokio::test]
async fn spawn_failure_is_fatal_by_default() {
    let mut h = harness(test_spec());
    h.adapter.add_instruction(MockInstruction::spawn_failure()).await;

    assert_eq!(h.ctx.step().await, None);
    assert_eq!(h.ctx.state(), SupervisorState::Stopping);
    assert_eq!(h.ctx.step().await, Some(RunOutcome::SupervisorFailure));
    assert_eq!(h.adapter.spawn_count(), 1);
}

#[tokio::test]
async fn spawn_failure_can_be_retried() {
    let mut spec = test_spec();
    spec.restart.restart_on_spawn_failure = true;
    let mut h = harness(spec);
    h.adapter.add_instruction(MockInstruction::spawn_failure()).await;

    h.ctx.step().await;
    assert_eq!(h.ctx.state(), SupervisorState::Started);
    assert_eq!(h.ctx.process().consecutive_failures(), 1);

    h.clock.advance_secs(1);
    h.ctx.step().await;
    assert_eq!(h.ctx.process().state(), ProcessState::Up);
    assert_eq!(h.adapter.spawn_count(), 2);
}

#[tokio::test]
async fn overflow_is_visible_in_status() {
    let mut spec = test_spec();
    spec.control_queue_capacity = 2;
    let mut h = harness(spec);

    let accepted = (0..5)
        .filter(|_| h.handles.producer.try_enqueue(ControlCode::Interrogate))
        .count();
    assert_eq!(accepted, 2);

    h.ctx.step().await;
    let status = h.handles.status_rx.borrow().clone();
    assert_eq!(status.dropped_events, 3);
    assert_eq!(status.supervisor_state, SupervisorState::Started);
    assert_eq!(status.process_state, ProcessState::Up);
    assert!(status.pid.is_some());
}

#[tokio::test]
async fn custom_codes_follow_bindings() {
    let mut spec = test_spec();
    spec.custom_actions.push(CustomActionBinding {
        code: 200,
        action: CustomAction::Stop,
    });
    let mut h = harness(spec);
    h.ctx.step().await;

    h.handles.producer.try_enqueue(ControlCode::Custom(201));
    h.ctx.step().await;
    assert_eq!(h.ctx.state(), SupervisorState::Started);

    h.handles.producer.try_enqueue(ControlCode::Custom(200));
    assert_eq!(h.ctx.step().await, Some(RunOutcome::Clean));
}

#[tokio::test]
async fn dump_event_writes_file_and_forwards_sigquit() {
    let dir = tempfile::tempdir().unwrap();
    let mut spec = test_spec();
    spec.paths.dump_directory = Some(dir.path().to_string_lossy().into_owned());
    let mut h = harness(spec);
    h.ctx.step().await;
    let pid = h.ctx.process().pid().unwrap();

    h.handles.producer.try_enqueue(ControlCode::Dump);
    h.ctx.step().await;
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    assert!(h.adapter.signals_sent().contains(&(pid, libc::SIGQUIT)));
    assert_eq!(h.ctx.state(), SupervisorState::Started);
}

#[tokio::test]
async fn logoff_depends_on_run_mode() {
    let mut service = harness_at(test_spec(), RunMode::Service, 0);
    service.ctx.step().await;
    service.handles.urgent.set_urgent(UrgentFlag::Logoff);
    service.ctx.step().await;
    assert_eq!(service.ctx.state(), SupervisorState::Started);

    let mut console = harness(test_spec());
    console.ctx.step().await;
    console.handles.urgent.set_urgent(UrgentFlag::Logoff);
    assert_eq!(console.ctx.step().await, Some(RunOutcome::Clean));
}

#[tokio::test]
async fn polled_output_reaches_ring() {
    let mut spec = test_spec();
    spec.output.drain = DrainStrategy::Poll;
    let mut h = harness(spec);
    h.adapter
        .add_instruction(MockInstruction {
            stdout: Some("hello\nworld\n"),
            ..MockInstruction::long_running()
        })
        .await;

    h.ctx.step().await;
    h.ctx.step().await;
    let lines: Vec<String> = snapshot_shared(&h.handles.ring)
        .into_iter()
        .map(|e| e.content)
        .collect();
    assert_eq!(lines, vec!["hello", "world"]);
}
