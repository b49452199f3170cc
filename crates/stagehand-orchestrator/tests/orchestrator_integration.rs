//! End-to-end runs against real processes and real sockets.

#![cfg(unix)]

use stagehand_orchestrator::{FailureCause, Orchestrator, Phase, RunConfig};
use stagehand_process_state::ProcessState;
use stagehand_supervisor::StopOutcome;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

/// Reserve an ephemeral port and return it closed.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn config(yaml: &str) -> RunConfig {
    RunConfig::load_from_string(yaml).unwrap()
}

async fn wait_for_phase(orch: &Orchestrator, phase: Phase, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while orch.phase() != phase {
        assert!(
            Instant::now() < deadline,
            "never reached {:?}, still {:?}",
            phase,
            orch.phase()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_two_stage_run_reaches_running_then_shuts_down_cleanly() {
    // The test owns the listening sockets; the processes themselves only
    // need to stay alive.
    let ml_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ml_port = ml_listener.local_addr().unwrap().port();
    let web_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let web_port = web_listener.local_addr().unwrap().port();

    let yaml = format!(
        r#"
stages:
  - name: backend
    processes:
      - name: ml-service
        executable: /bin/sh
        args: ["-c", "sleep 30"]
        listen_port: {ml_port}
        readiness_timeout: 5s
  - name: frontend
    processes:
      - name: web
        executable: /bin/sh
        args: ["-c", "sleep 30"]
        listen_port: {web_port}
        readiness_timeout: 5s
probe:
  poll_interval: 25ms
shutdown:
  grace_period: 2s
"#
    );

    let orch = Arc::new(Orchestrator::new(config(&yaml)));
    let handle = orch.shutdown_handle();
    let runner = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.run().await })
    };

    wait_for_phase(&orch, Phase::Running, Duration::from_secs(10)).await;

    // Second trigger while shutting down must be a harmless no-op.
    handle.trigger();
    handle.trigger();

    let report = runner.await.unwrap();
    assert_eq!(orch.phase(), Phase::Terminated);
    assert!(report.failure.is_none());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.stages.len(), 2);
    assert!(report.stages.iter().all(|s| s.start.all_spawned()));
    assert!(report
        .stages
        .iter()
        .flat_map(|s| &s.probes)
        .all(|p| p.ready));
    assert!(report
        .shutdown
        .iter()
        .all(|r| r.outcome == StopOutcome::StoppedGracefully));
}

#[tokio::test]
async fn test_readiness_timeout_aborts_before_stage_two() {
    let never_opens = closed_port().await;
    let yaml = format!(
        r#"
stages:
  - processes:
      - name: ml-service
        executable: /bin/sh
        args: ["-c", "sleep 30"]
        listen_port: {never_opens}
        readiness_timeout: 300ms
  - processes:
      - name: web
        executable: /bin/sh
        args: ["-c", "sleep 30"]
probe:
  poll_interval: 25ms
shutdown:
  grace_period: 2s
"#
    );

    let orch = Orchestrator::new(config(&yaml));
    let report = orch.run().await;

    match report.failure {
        Some(FailureCause::ReadinessTimeout { ref process, port, .. }) => {
            assert_eq!(process, "ml-service");
            assert_eq!(port, never_opens);
        }
        ref other => panic!("expected readiness timeout, got {:?}", other),
    }
    assert_eq!(report.exit_code(), 1);

    // Stage two was never reached, its process never spawned.
    assert_eq!(report.stages.len(), 1);
    assert!(orch.supervisor().process("web").is_none());

    // The slow process is not treated as crashed; it still gets (and
    // honors) the polite stop.
    let ml = report
        .shutdown
        .iter()
        .find(|r| r.name == "ml-service")
        .unwrap();
    assert_eq!(ml.outcome, StopOutcome::StoppedGracefully);
    assert_eq!(ml.exit_info.as_ref().unwrap().signal, Some(15));
}

#[tokio::test]
async fn test_spawn_failure_shuts_down_spawned_siblings() {
    let yaml = r#"
stages:
  - processes:
      - name: healthy
        executable: /bin/sh
        args: ["-c", "sleep 30"]
      - name: broken
        executable: /nonexistent/executable
shutdown:
  grace_period: 2s
"#;

    let orch = Orchestrator::new(config(yaml));
    let report = orch.run().await;

    match report.failure {
        Some(FailureCause::SpawnFailed { ref processes, .. }) => {
            assert_eq!(processes, &vec!["broken".to_string()]);
        }
        ref other => panic!("expected spawn failure, got {:?}", other),
    }
    assert_eq!(report.exit_code(), 1);

    let healthy = report
        .shutdown
        .iter()
        .find(|r| r.name == "healthy")
        .unwrap();
    assert_eq!(healthy.outcome, StopOutcome::StoppedGracefully);
    assert_eq!(
        orch.supervisor().process("healthy").unwrap().state(),
        ProcessState::Stopped
    );
}

#[tokio::test]
async fn test_unexpected_exit_while_running_stops_the_group() {
    let yaml = r#"
stages:
  - processes:
      - name: flaky
        executable: /bin/sh
        args: ["-c", "sleep 0.2"]
      - name: steady
        executable: /bin/sh
        args: ["-c", "sleep 30"]
shutdown:
  grace_period: 2s
"#;

    let orch = Orchestrator::new(config(yaml));
    let report = orch.run().await;

    match report.failure {
        Some(FailureCause::UnexpectedExit { ref process, .. }) => {
            assert_eq!(process, "flaky");
        }
        ref other => panic!("expected unexpected exit, got {:?}", other),
    }
    assert_eq!(report.exit_code(), 1);

    let steady = report.shutdown.iter().find(|r| r.name == "steady").unwrap();
    assert_eq!(steady.outcome, StopOutcome::StoppedGracefully);
}

#[tokio::test]
async fn test_pre_step_failure_aborts_before_any_stage() {
    let yaml = r#"
pre_step:
  executable: /bin/sh
  args: ["-c", "exit 7"]
stages:
  - processes:
      - name: never-started
        executable: /bin/sh
        args: ["-c", "sleep 30"]
"#;

    let orch = Orchestrator::new(config(yaml));
    let report = orch.run().await;

    assert!(matches!(
        report.failure,
        Some(FailureCause::PreStepFailed { .. })
    ));
    assert_eq!(report.exit_code(), 1);
    assert!(report.stages.is_empty());
    assert!(orch.supervisor().names().is_empty());
}

#[tokio::test]
async fn test_interrupt_during_startup_runs_shutdown_path() {
    let never_opens = closed_port().await;
    let yaml = format!(
        r#"
stages:
  - processes:
      - name: slow
        executable: /bin/sh
        args: ["-c", "sleep 30"]
        listen_port: {never_opens}
        readiness_timeout: 30s
probe:
  poll_interval: 25ms
shutdown:
  grace_period: 2s
"#
    );

    let orch = Arc::new(Orchestrator::new(config(&yaml)));
    let handle = orch.shutdown_handle();
    let runner = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.run().await })
    };

    wait_for_phase(&orch, Phase::Probing(0), Duration::from_secs(5)).await;
    handle.trigger();

    let started = Instant::now();
    let report = runner.await.unwrap();
    // Interrupt cuts the 30s probe short.
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(matches!(report.failure, Some(FailureCause::Interrupted)));
    assert_eq!(report.exit_code(), 1);
    assert_eq!(
        report.shutdown.iter().find(|r| r.name == "slow").unwrap().outcome,
        StopOutcome::StoppedGracefully
    );
}

#[tokio::test]
async fn test_term_ignoring_process_is_force_killed_within_bounds() {
    let yaml = r#"
stages:
  - processes:
      - name: stubborn
        executable: /bin/sh
        args: ["-c", "trap '' TERM; while :; do sleep 0.05; done"]
shutdown:
  grace_period: 500ms
  force_kill_timeout: 3s
"#;

    let orch = Arc::new(Orchestrator::new(config(yaml)));
    let handle = orch.shutdown_handle();
    let runner = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.run().await })
    };

    wait_for_phase(&orch, Phase::Running, Duration::from_secs(5)).await;
    handle.trigger();

    let started = Instant::now();
    let report = runner.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let stubborn = report
        .shutdown
        .iter()
        .find(|r| r.name == "stubborn")
        .unwrap();
    assert_eq!(stubborn.outcome, StopOutcome::StoppedForcibly);
    // A forced stop is still a clean shutdown for exit-code purposes.
    assert_eq!(report.exit_code(), 0);
}
