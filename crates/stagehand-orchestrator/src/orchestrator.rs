//! The run driver: staged startup gated on readiness, the shutdown trigger,
//! and overall run lifecycle.
//!
//! Phase machine:
//! `Idle → StartingStage(n) → Probing(n) → Running → ShuttingDown →
//! Terminated`, with an error edge from any startup phase straight into
//! `ShuttingDown`. Whatever was registered by the time of the failure is
//! always shut down; the run never leaves processes behind.

use crate::config::{CommandConfig, ProcessEntry, RunConfig};
use crate::report::{FailureCause, ProbeReport, RunReport, StageReport};
use chrono::Utc;
use parking_lot::Mutex;
use stagehand_readiness::{ProbeOutcome, ReadinessProbe};
use stagehand_relay::{LogSink, TracingSink};
use stagehand_supervisor::{ProcessSpec, ProcessSupervisor, ShutdownPolicy};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Where the orchestrator is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    StartingStage(usize),
    Probing(usize),
    Running,
    ShuttingDown,
    Terminated,
}

/// Cloneable trigger for the orchestrator's shutdown path.
///
/// Triggering is idempotent: a second call while already shutting down is a
/// no-op. Signal plumbing in the binary calls this; the orchestrator itself
/// has no dependency on how the trigger is delivered.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown triggered");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Drives one run from configuration to a [`RunReport`].
pub struct Orchestrator {
    config: RunConfig,
    supervisor: ProcessSupervisor,
    probe: ReadinessProbe,
    phase: Mutex<Phase>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: RunConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    pub fn with_sink(config: RunConfig, sink: Arc<dyn LogSink>) -> Self {
        let probe = ReadinessProbe::new(config.probe.host.clone())
            .with_poll_interval(config.probe.poll_interval)
            .with_connect_timeout(config.probe.connect_timeout);
        Self {
            config,
            supervisor: ProcessSupervisor::new(sink),
            probe,
            phase: Mutex::new(Phase::Idle),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }

    /// Execute the run to completion: pre-step, staged startup with
    /// readiness gates, the running wait, and the full shutdown. Always
    /// returns a report; failures are part of the report, not errors.
    pub async fn run(&self) -> RunReport {
        let started_at = Utc::now();
        let mut stages = Vec::new();

        let mut failure = self.run_pre_step().await;
        if failure.is_none() {
            failure = self.start_stages(&mut stages).await;
        }

        if failure.is_none() {
            self.set_phase(Phase::Running);
            info!("all stages ready; running");
            failure = self.wait_for_trigger().await;
        }

        self.set_phase(Phase::ShuttingDown);
        // Settles the trigger so late signal deliveries are no-ops.
        self.shutdown.cancel();

        let policy = ShutdownPolicy {
            grace_period: self.config.shutdown.grace_period,
            force_kill_timeout: self.config.shutdown.force_kill_timeout,
        };
        let shutdown = self.supervisor.stop_all(&policy).await;

        self.set_phase(Phase::Terminated);
        if let Some(cause) = &failure {
            error!(cause = %cause.describe(), "run failed");
        }

        RunReport {
            started_at,
            finished_at: Utc::now(),
            stages,
            shutdown,
            failure,
        }
    }

    /// Run the optional pre-step command to completion. Non-zero exit
    /// aborts the run before any stage starts.
    async fn run_pre_step(&self) -> Option<FailureCause> {
        let pre_step = self.config.pre_step.as_ref()?;
        info!(command = %pre_step.executable, "running pre-step");

        match run_command(pre_step).await {
            Ok(status) if status.success() => None,
            Ok(status) => Some(FailureCause::PreStepFailed {
                command: pre_step.executable.clone(),
                status: status.to_string(),
            }),
            Err(e) => Some(FailureCause::PreStepFailed {
                command: pre_step.executable.clone(),
                status: e.to_string(),
            }),
        }
    }

    /// Start stages strictly sequentially: stage N+1 never begins before
    /// every readiness check of stage N has resolved.
    async fn start_stages(&self, stages: &mut Vec<StageReport>) -> Option<FailureCause> {
        for (idx, stage) in self.config.stages.iter().enumerate() {
            let label = stage.label(idx);
            self.set_phase(Phase::StartingStage(idx));

            let names: Vec<String> =
                stage.processes.iter().map(|p| p.name.clone()).collect();
            for entry in &stage.processes {
                if let Err(e) = self.supervisor.add_managed(to_spec(entry)) {
                    // Names are unique by config validation; anything here
                    // is unexpected and fatal to the stage.
                    error!(process = %entry.name, error = %e, "failed to register process");
                    return Some(FailureCause::SpawnFailed {
                        stage: label,
                        processes: vec![entry.name.clone()],
                    });
                }
            }

            let start = match self.supervisor.start_stage(&names).await {
                Ok(start) => start,
                Err(e) => {
                    error!(stage = %label, error = %e, "stage launch failed");
                    return Some(FailureCause::SpawnFailed {
                        stage: label,
                        processes: names,
                    });
                }
            };

            let all_spawned = start.all_spawned();
            let failed: Vec<String> =
                start.failed_names().iter().map(|s| s.to_string()).collect();
            let mut report = StageReport {
                index: idx,
                label: label.clone(),
                start,
                probes: Vec::new(),
            };

            if !all_spawned {
                stages.push(report);
                return Some(FailureCause::SpawnFailed {
                    stage: label,
                    processes: failed,
                });
            }

            self.set_phase(Phase::Probing(idx));
            for entry in &stage.processes {
                let Some(port) = entry.listen_port else {
                    // No declared endpoint; ready as soon as it spawned.
                    continue;
                };

                let outcome = tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        warn!(stage = %label, "startup interrupted while probing");
                        stages.push(report);
                        return Some(FailureCause::Interrupted);
                    }
                    outcome = self.probe.wait_until_ready(port, entry.readiness_timeout) => outcome,
                };

                match outcome {
                    ProbeOutcome::Ready { elapsed } => {
                        info!(process = %entry.name, port, ?elapsed, "process ready");
                        report.probes.push(ProbeReport {
                            process: entry.name.clone(),
                            port,
                            ready: true,
                            waited_ms: elapsed.as_millis(),
                        });
                    }
                    ProbeOutcome::TimedOut { waited } => {
                        report.probes.push(ProbeReport {
                            process: entry.name.clone(),
                            port,
                            ready: false,
                            waited_ms: waited.as_millis(),
                        });
                        stages.push(report);
                        return Some(FailureCause::ReadinessTimeout {
                            process: entry.name.clone(),
                            port,
                            waited,
                        });
                    }
                }
            }

            stages.push(report);
        }
        None
    }

    /// The resting state: block until the external trigger fires or a
    /// running process exits on its own.
    async fn wait_for_trigger(&self) -> Option<FailureCause> {
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            exited = self.supervisor.unexpected_exit() => {
                let process = exited?;
                let status = self
                    .supervisor
                    .process(&process)
                    .and_then(|p| p.exit_info())
                    .map(|info| info.describe())
                    .unwrap_or_else(|| "unknown exit status".to_string());
                Some(FailureCause::UnexpectedExit { process, status })
            }
        }
    }
}

fn to_spec(entry: &ProcessEntry) -> ProcessSpec {
    ProcessSpec {
        name: entry.name.clone(),
        executable: entry.executable.clone(),
        args: entry.args.clone(),
        working_directory: entry.working_directory.clone(),
        environment: entry.environment.clone(),
    }
}

async fn run_command(config: &CommandConfig) -> std::io::Result<std::process::ExitStatus> {
    let mut cmd = tokio::process::Command::new(&config.executable);
    cmd.args(&config.args);
    if let Some(ref dir) = config.working_directory {
        cmd.current_dir(dir);
    }
    for (key, value) in &config.environment {
        cmd.env(key, value);
    }
    cmd.status().await
}
