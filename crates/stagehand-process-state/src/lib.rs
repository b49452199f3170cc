use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagehand_common::{ProcessError, ProcessResult};
use std::fmt;

/// Process lifecycle states.
///
/// The only legal path is
/// `Pending → Starting → {Running | Failed}`, with `Stopping` entered from
/// `Starting` or `Running` once a stop has been requested, and `Stopped` or
/// `Failed` as the terminal states. A process never returns to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Defined but not yet spawned.
    Pending,
    /// Spawn in progress.
    Starting,
    /// Spawned and presumed alive.
    Running,
    /// Termination requested, exit not yet observed.
    Stopping,
    /// Exited after a stop request (or forced kill).
    Stopped,
    /// Spawn failed, or the process exited on its own.
    Failed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Pending => write!(f, "pending"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Failed => write!(f, "failed"),
        }
    }
}

impl ProcessState {
    /// Check if the process is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Failed)
    }

    /// States in which the process holds a live OS handle.
    pub fn has_handle(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }

    /// States from which a polite stop request makes sense.
    pub fn can_request_stop(&self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Running)
    }
}

/// A recorded state transition with timestamp and optional reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: ProcessState,
    pub to_state: ProcessState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Validated state machine for one managed process.
///
/// Owned exclusively by the process's own lifecycle operations; other
/// components only ever see snapshot reads.
#[derive(Debug, Clone)]
pub struct ProcessStateMachine {
    process_name: String,
    current_state: ProcessState,
    history: Vec<StateTransition>,
    last_transition_time: DateTime<Utc>,
}

const MAX_HISTORY: usize = 64;

impl ProcessStateMachine {
    pub fn new(process_name: &str) -> Self {
        Self {
            process_name: process_name.to_string(),
            current_state: ProcessState::Pending,
            history: Vec::new(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn current_state(&self) -> ProcessState {
        self.current_state
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn last_transition_time(&self) -> DateTime<Utc> {
        self.last_transition_time
    }

    /// Check if a transition from the current state to `target` is valid.
    pub fn is_valid_transition(&self, target: ProcessState) -> bool {
        use ProcessState::*;
        match (self.current_state, target) {
            (Pending, Starting) => true,

            (Starting, Running) => true,
            (Starting, Failed) => true,
            // Cancel a startup still in flight.
            (Starting, Stopping) => true,

            (Running, Stopping) => true,
            (Running, Failed) => true,

            (Stopping, Stopped) => true,
            (Stopping, Failed) => true,

            // Same state is a no-op.
            (state, target) if state == target => true,

            _ => false,
        }
    }

    /// Transition to `target`, recording the reason.
    pub fn transition_to(
        &mut self,
        target: ProcessState,
        reason: Option<String>,
    ) -> ProcessResult<()> {
        if !self.is_valid_transition(target) {
            return Err(ProcessError::invalid_state(
                &self.process_name,
                format!("{}", target),
                format!("{}", self.current_state),
            ));
        }

        if self.current_state == target {
            return Ok(());
        }

        let now = Utc::now();
        self.history.push(StateTransition {
            from_state: self.current_state,
            to_state: target,
            timestamp: now,
            reason,
        });
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }

        tracing::debug!(
            process = %self.process_name,
            from = %self.current_state,
            to = %target,
            "process state transition"
        );

        self.current_state = target;
        self.last_transition_time = now;
        Ok(())
    }

    pub fn transition_to_starting(&mut self) -> ProcessResult<()> {
        self.transition_to(ProcessState::Starting, Some("spawn requested".to_string()))
    }

    pub fn transition_to_running(&mut self) -> ProcessResult<()> {
        self.transition_to(ProcessState::Running, Some("spawn succeeded".to_string()))
    }

    pub fn transition_to_stopping(&mut self) -> ProcessResult<()> {
        self.transition_to(ProcessState::Stopping, Some("stop requested".to_string()))
    }

    pub fn transition_to_stopped(&mut self) -> ProcessResult<()> {
        self.transition_to(ProcessState::Stopped, Some("exit observed".to_string()))
    }

    pub fn transition_to_failed(&mut self, reason: String) -> ProcessResult<()> {
        self.transition_to(ProcessState::Failed, Some(reason))
    }
}
