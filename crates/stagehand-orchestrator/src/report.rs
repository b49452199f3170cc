//! Machine-checkable per-run report.
//!
//! Every run produces one [`RunReport`]: stage launch results, probe
//! results, per-process shutdown outcomes, and the failure cause if the run
//! did not complete cleanly. The report maps directly to the process exit
//! code.

use chrono::{DateTime, Utc};
use serde::Serialize;
use stagehand_supervisor::{StageStartReport, StopOutcome, StopReport};
use std::time::Duration;

/// Result of one readiness check.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub process: String,
    pub port: u16,
    pub ready: bool,
    /// Time to readiness, or the full wait on timeout.
    pub waited_ms: u128,
}

/// Launch and readiness results for one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub index: usize,
    pub label: String,
    pub start: StageStartReport,
    pub probes: Vec<ProbeReport>,
}

/// Why a run failed, naming the process/stage/port involved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureCause {
    PreStepFailed { command: String, status: String },
    SpawnFailed { stage: String, processes: Vec<String> },
    ReadinessTimeout { process: String, port: u16, waited: Duration },
    UnexpectedExit { process: String, status: String },
    /// Shutdown was requested before the startup sequence finished.
    Interrupted,
}

impl FailureCause {
    pub fn describe(&self) -> String {
        match self {
            FailureCause::PreStepFailed { command, status } => {
                format!("pre-step command {} failed ({})", command, status)
            }
            FailureCause::SpawnFailed { stage, processes } => {
                format!("stage {} failed to launch: {}", stage, processes.join(", "))
            }
            FailureCause::ReadinessTimeout { process, port, waited } => format!(
                "process {} never opened port {} within {:?}",
                process, port, waited
            ),
            FailureCause::UnexpectedExit { process, status } => {
                format!("process {} exited unexpectedly ({})", process, status)
            }
            FailureCause::Interrupted => "interrupted during startup".to_string(),
        }
    }
}

/// The full machine-checkable output of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    pub shutdown: Vec<StopReport>,
    pub failure: Option<FailureCause>,
}

impl RunReport {
    /// Exit code contract: `0` clean run and clean shutdown, `1` run
    /// failure, `2` a process survived the forced phase. `2` takes
    /// precedence when both apply.
    pub fn exit_code(&self) -> i32 {
        if self
            .shutdown
            .iter()
            .any(|r| r.outcome == StopOutcome::StillRunning)
        {
            return 2;
        }
        if self.failure.is_some() {
            return 1;
        }
        0
    }
}
