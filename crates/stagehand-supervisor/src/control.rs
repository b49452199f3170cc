//! ProcessControl trait - interface for single-process lifecycle control.
//!
//! The supervisor orchestrates a group of processes through this trait; the
//! real implementation is [`crate::ManagedProcess`]. Tests substitute
//! scripted fakes to exercise escalation paths deterministically.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagehand_common::{ExitInfo, ProcessResult};
use stagehand_process_state::ProcessState;
use std::fmt;
use std::time::Duration;
use tokio::process::{ChildStderr, ChildStdout};

/// Captured output handles of a spawned process. Taken once by the
/// supervisor to attach relays; exclusively owned thereafter.
#[derive(Debug)]
pub struct OutputStreams {
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// Result of waiting for a process to reach a terminal state.
///
/// Timing out is a normal, reportable outcome, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The process reached `Stopped` or `Failed`.
    Terminal,
    /// The wait deadline elapsed first.
    TimedOut,
}

/// Per-process result of a shutdown escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Exited within the grace period of the polite request (or had
    /// already exited before escalation was needed).
    StoppedGracefully,
    /// Required a forced kill, then exited.
    StoppedForcibly,
    /// Survived both phases. Reported, never retried.
    StillRunning,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::StoppedGracefully => write!(f, "stopped gracefully"),
            StopOutcome::StoppedForcibly => write!(f, "stopped forcibly"),
            StopOutcome::StillRunning => write!(f, "still running"),
        }
    }
}

/// Interface for controlling one process's lifecycle.
///
/// State is owned exclusively by the implementation; callers observe it
/// through snapshot reads and `await_exit`, never by mutating it directly.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// The process's unique name within the run.
    fn name(&self) -> &str;

    /// Launch the OS process. Returns the PID on success; on failure the
    /// process is left `Failed` with the launch error captured.
    async fn spawn(&self) -> ProcessResult<u32>;

    /// Send a polite termination request if the process is `Starting` or
    /// `Running`. A no-op success in any other state, so each process
    /// receives at most one polite request.
    async fn request_stop(&self) -> ProcessResult<()>;

    /// Send a forceful, non-ignorable kill. Allowed from any non-terminal
    /// state.
    async fn force_stop(&self) -> ProcessResult<()>;

    /// Wait until the process reaches a terminal state or `timeout`
    /// elapses.
    async fn await_exit(&self, timeout: Duration) -> WaitOutcome;

    /// Snapshot of the current lifecycle state.
    fn state(&self) -> ProcessState;

    /// Exit details, populated only once a terminal state is reached.
    fn exit_info(&self) -> Option<ExitInfo>;

    /// PID while a live handle exists.
    fn pid(&self) -> Option<u32>;

    /// Take the captured output streams, once. Fakes return `None`.
    fn take_output(&self) -> Option<OutputStreams> {
        None
    }
}
