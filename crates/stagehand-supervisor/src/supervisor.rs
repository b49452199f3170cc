//! Process group supervision.
//!
//! The supervisor owns the set of managed processes for one run: it spawns
//! stages concurrently, attaches output relays, surfaces unexpected exits,
//! and runs the bounded two-phase shutdown escalation.

use crate::control::{ProcessControl, StopOutcome, WaitOutcome};
use crate::managed::{ManagedProcess, ProcessSpec};
use parking_lot::Mutex;
use serde::Serialize;
use stagehand_common::{ExitInfo, ProcessError, ProcessResult, StreamSource};
use stagehand_relay::{spawn_relay, LogSink, TracingSink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timings for the two-phase shutdown escalation.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownPolicy {
    /// How long a process gets to exit after the polite request.
    pub grace_period: Duration,
    /// How long to wait for the exit after a forced kill.
    pub force_kill_timeout: Duration,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            force_kill_timeout: Duration::from_secs(3),
        }
    }
}

/// Result of launching one process within a stage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum SpawnOutcome {
    Spawned { pid: u32 },
    Failed { error: String },
}

impl SpawnOutcome {
    pub fn is_spawned(&self) -> bool {
        matches!(self, SpawnOutcome::Spawned { .. })
    }
}

/// Per-stage launch report, in the stage's declared process order.
#[derive(Debug, Clone, Serialize)]
pub struct StageStartReport {
    pub results: Vec<(String, SpawnOutcome)>,
}

impl StageStartReport {
    pub fn all_spawned(&self) -> bool {
        self.results.iter().all(|(_, o)| o.is_spawned())
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, o)| !o.is_spawned())
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

/// Per-process shutdown result.
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub name: String,
    pub outcome: StopOutcome,
    pub exit_info: Option<ExitInfo>,
}

/// Owner of the process group for one run.
///
/// Processes are held in registration order, which is the order every
/// report is emitted in. Shutdown outcomes are recorded on first
/// resolution, so repeated `stop_all` calls replay results instead of
/// re-signalling.
pub struct ProcessSupervisor {
    processes: Mutex<Vec<(String, Arc<dyn ProcessControl>)>>,
    sink: Arc<dyn LogSink>,
    relay_cancel: CancellationToken,
    relay_tasks: Mutex<Vec<JoinHandle<()>>>,
    failure_tx: mpsc::UnboundedSender<String>,
    failure_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    stop_outcomes: Mutex<HashMap<String, StopOutcome>>,
}

impl ProcessSupervisor {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        Self {
            processes: Mutex::new(Vec::new()),
            sink,
            relay_cancel: CancellationToken::new(),
            relay_tasks: Mutex::new(Vec::new()),
            failure_tx,
            failure_rx: tokio::sync::Mutex::new(failure_rx),
            stop_outcomes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_tracing_sink() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    /// Register a process under its unique name.
    pub fn register(&self, process: Arc<dyn ProcessControl>) -> ProcessResult<()> {
        let name = process.name().to_string();
        let mut processes = self.processes.lock();
        if processes.iter().any(|(n, _)| n == &name) {
            return Err(ProcessError::already_exists(name));
        }
        debug!(process = %name, "registered process");
        processes.push((name, process));
        Ok(())
    }

    /// Create and register a [`ManagedProcess`] wired to this supervisor's
    /// unexpected-exit channel.
    pub fn add_managed(&self, spec: ProcessSpec) -> ProcessResult<()> {
        let process = ManagedProcess::new(spec, Some(self.failure_tx.clone()));
        self.register(Arc::new(process))
    }

    pub fn process(&self, name: &str) -> Option<Arc<dyn ProcessControl>> {
        self.processes
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| Arc::clone(p))
    }

    pub fn names(&self) -> Vec<String> {
        self.processes.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Spawn the named registered processes concurrently and attach output
    /// relays to each that launched.
    ///
    /// A spawn failure never touches siblings: the other processes of the
    /// stage keep running, and the failure is reported per process.
    pub async fn start_stage(&self, names: &[String]) -> ProcessResult<StageStartReport> {
        let mut targets = Vec::with_capacity(names.len());
        for name in names {
            let process = self
                .process(name)
                .ok_or_else(|| ProcessError::not_found(name))?;
            targets.push((name.clone(), process));
        }

        info!(processes = ?names, "starting stage");

        let mut tasks = JoinSet::new();
        for (idx, (name, process)) in targets.iter().enumerate() {
            let name = name.clone();
            let process = Arc::clone(process);
            tasks.spawn(async move {
                let outcome = match process.spawn().await {
                    Ok(pid) => SpawnOutcome::Spawned { pid },
                    Err(e) => SpawnOutcome::Failed {
                        error: e.to_string(),
                    },
                };
                (idx, name, outcome)
            });
        }

        let mut results: Vec<Option<(String, SpawnOutcome)>> = vec![None; targets.len()];
        while let Some(joined) = tasks.join_next().await {
            let (idx, name, outcome) = joined.map_err(|e| {
                ProcessError::spawn_failed("stage", format!("spawn task panicked: {}", e))
            })?;
            results[idx] = Some((name, outcome));
        }

        for (name, process) in &targets {
            if let Some(streams) = process.take_output() {
                self.attach_relays(name, streams);
            }
        }

        let results: Vec<(String, SpawnOutcome)> = results.into_iter().flatten().collect();
        for (name, outcome) in &results {
            match outcome {
                SpawnOutcome::Spawned { pid } => {
                    debug!(process = %name, pid, "stage member running")
                }
                SpawnOutcome::Failed { error } => {
                    warn!(process = %name, error = %error, "stage member failed to launch")
                }
            }
        }

        Ok(StageStartReport { results })
    }

    fn attach_relays(&self, name: &str, streams: crate::control::OutputStreams) {
        let mut tasks = self.relay_tasks.lock();
        if let Some(stdout) = streams.stdout {
            tasks.push(spawn_relay(
                name.to_string(),
                StreamSource::Stdout,
                stdout,
                Arc::clone(&self.sink),
                self.relay_cancel.child_token(),
            ));
        }
        if let Some(stderr) = streams.stderr {
            tasks.push(spawn_relay(
                name.to_string(),
                StreamSource::Stderr,
                stderr,
                Arc::clone(&self.sink),
                self.relay_cancel.child_token(),
            ));
        }
    }

    /// Wait for the next process that exits on its own while `Running`.
    ///
    /// Returns `None` only if the supervisor itself is being torn down.
    pub async fn unexpected_exit(&self) -> Option<String> {
        self.failure_rx.lock().await.recv().await
    }

    /// Stop every registered process with the two-phase escalation, all
    /// processes concurrently. Bounded by
    /// `grace_period + force_kill_timeout` per process, and idempotent:
    /// outcomes resolved by an earlier call are replayed without
    /// re-signalling.
    pub async fn stop_all(&self, policy: &ShutdownPolicy) -> Vec<StopReport> {
        let targets: Vec<(String, Arc<dyn ProcessControl>)> = self
            .processes
            .lock()
            .iter()
            .map(|(n, p)| (n.clone(), Arc::clone(p)))
            .collect();

        info!(count = targets.len(), "stopping all processes");

        let mut tasks = JoinSet::new();
        for (name, process) in &targets {
            let recorded = self.stop_outcomes.lock().get(name).copied();
            let name = name.clone();
            let process = Arc::clone(process);
            let policy = *policy;
            tasks.spawn(async move {
                let outcome = match recorded {
                    Some(outcome) => outcome,
                    None => escalate(process.as_ref(), &policy).await,
                };
                (name, outcome, process.exit_info())
            });
        }

        let mut by_name: HashMap<String, StopReport> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok((name, outcome, exit_info)) = joined {
                self.stop_outcomes.lock().insert(name.clone(), outcome);
                by_name.insert(
                    name.clone(),
                    StopReport {
                        name,
                        outcome,
                        exit_info,
                    },
                );
            }
        }

        // Streams are closed by now for anything that exited; cancelling
        // sweeps up relays of survivors.
        self.relay_cancel.cancel();
        for task in self.relay_tasks.lock().drain(..) {
            task.abort();
        }

        let reports: Vec<StopReport> = targets
            .iter()
            .filter_map(|(name, _)| by_name.remove(name))
            .collect();

        for report in &reports {
            info!(process = %report.name, outcome = %report.outcome, "shutdown outcome");
        }
        reports
    }
}

/// Two-phase escalation for one process.
///
/// Phase one sends the polite request and waits out the grace period.
/// Phase two force-kills and waits the kill timeout. A survivor of both
/// phases is reported as [`StopOutcome::StillRunning`], never retried.
async fn escalate(process: &dyn ProcessControl, policy: &ShutdownPolicy) -> StopOutcome {
    let state = process.state();
    if state.is_terminal() || state == stagehand_process_state::ProcessState::Pending {
        // Nothing to signal; already settled or never launched.
        return StopOutcome::StoppedGracefully;
    }

    if let Err(e) = process.request_stop().await {
        warn!(process = %process.name(), error = %e, "polite stop request failed");
    }
    if process.await_exit(policy.grace_period).await == WaitOutcome::Terminal {
        return StopOutcome::StoppedGracefully;
    }

    if let Err(e) = process.force_stop().await {
        warn!(process = %process.name(), error = %e, "force stop failed");
    }
    if process.await_exit(policy.force_kill_timeout).await == WaitOutcome::Terminal {
        return StopOutcome::StoppedForcibly;
    }

    // Exit observation can lag the kernel; trust the pid check over the
    // state snapshot before reporting a survivor.
    if let Some(pid) = process.pid() {
        if matches!(stagehand_process::process_exists(pid), Ok(false)) {
            return StopOutcome::StoppedForcibly;
        }
    }

    warn!(process = %process.name(), "process survived forced kill");
    StopOutcome::StillRunning
}
