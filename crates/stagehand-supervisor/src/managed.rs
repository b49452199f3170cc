//! ManagedProcess - the real OS-process implementation of ProcessControl.
//!
//! The `tokio::process::Child` handle is exclusively owned: after spawn it
//! moves into an exit-monitor task that waits for the process, classifies
//! the exit, and notifies waiters over a watch channel. Nothing else ever
//! touches the handle.

use crate::control::{OutputStreams, ProcessControl, WaitOutcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use stagehand_common::{ExitInfo, ProcessError, ProcessResult};
use stagehand_process_state::{ProcessState, ProcessStateMachine};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Static description of one process to launch.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub name: String,
    pub executable: String,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub environment: HashMap<String, String>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args: Vec::new(),
            working_directory: None,
            environment: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

struct Inner {
    state: ProcessStateMachine,
    pid: Option<u32>,
    output: Option<OutputStreams>,
    exit_info: Option<ExitInfo>,
    kill_requested: bool,
    exit_monitor: Option<JoinHandle<()>>,
}

/// One spawned OS process and its observable state.
pub struct ManagedProcess {
    spec: ProcessSpec,
    inner: Arc<Mutex<Inner>>,
    exit_tx: watch::Sender<bool>,
    /// Notified with the process name when a `Running` process exits on
    /// its own (the group shutdown trigger).
    failure_tx: Option<mpsc::UnboundedSender<String>>,
}

impl ManagedProcess {
    pub fn new(spec: ProcessSpec, failure_tx: Option<mpsc::UnboundedSender<String>>) -> Self {
        let (exit_tx, _) = watch::channel(false);
        let state = ProcessStateMachine::new(&spec.name);
        Self {
            spec,
            inner: Arc::new(Mutex::new(Inner {
                state,
                pid: None,
                output: None,
                exit_info: None,
                kill_requested: false,
                exit_monitor: None,
            })),
            exit_tx,
            failure_tx,
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    fn spawn_exit_monitor(&self, mut child: Child) -> JoinHandle<()> {
        let name = self.spec.name.clone();
        let inner = Arc::clone(&self.inner);
        let exit_tx = self.exit_tx.clone();
        let failure_tx = self.failure_tx.clone();

        tokio::spawn(async move {
            let wait_result = child.wait().await;

            let mut unexpected = false;
            {
                let mut guard = inner.lock();
                match wait_result {
                    Ok(status) => {
                        let exit = ExitInfo::from_status(status);
                        let stop_in_flight = guard.state.current_state() == ProcessState::Stopping
                            || guard.kill_requested;
                        if stop_in_flight {
                            let _ = guard.state.transition_to_stopped();
                            info!(
                                process = %name,
                                status = %exit.describe(),
                                "process exited after stop request"
                            );
                        } else {
                            let _ = guard
                                .state
                                .transition_to_failed(format!("exited unexpectedly ({})", exit.describe()));
                            warn!(
                                process = %name,
                                status = %exit.describe(),
                                "process exited unexpectedly"
                            );
                            unexpected = true;
                        }
                        guard.exit_info = Some(exit);
                    }
                    Err(e) => {
                        error!(process = %name, error = %e, "failed to wait for process exit");
                        let _ = guard
                            .state
                            .transition_to_failed(format!("wait failed: {}", e));
                    }
                }
                guard.pid = None;
            }

            if unexpected {
                if let Some(tx) = &failure_tx {
                    let _ = tx.send(name.clone());
                }
            }
            let _ = exit_tx.send(true);
        })
    }
}

#[async_trait]
impl ProcessControl for ManagedProcess {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn spawn(&self) -> ProcessResult<u32> {
        self.inner.lock().state.transition_to_starting()?;

        info!(process = %self.spec.name, executable = %self.spec.executable, "spawning process");

        let mut cmd = Command::new(&self.spec.executable);
        cmd.args(&self.spec.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        if let Some(ref dir) = self.spec.working_directory {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.spec.environment {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = e.to_string();
                {
                    let mut guard = self.inner.lock();
                    let _ = guard
                        .state
                        .transition_to_failed(format!("spawn failed: {}", reason));
                }
                // Spawn failure is terminal; release any waiters.
                let _ = self.exit_tx.send(true);
                return Err(ProcessError::spawn_failed(&self.spec.name, reason));
            }
        };

        let pid = child.id().unwrap_or(0);
        let output = OutputStreams {
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
        };

        {
            let mut guard = self.inner.lock();
            guard.pid = Some(pid);
            guard.output = Some(output);
            guard.state.transition_to_running()?;
        }

        let monitor = self.spawn_exit_monitor(child);
        self.inner.lock().exit_monitor = Some(monitor);

        info!(process = %self.spec.name, pid, "process spawned");
        Ok(pid)
    }

    async fn request_stop(&self) -> ProcessResult<()> {
        let pid = {
            let mut guard = self.inner.lock();
            let state = guard.state.current_state();
            if !state.can_request_stop() {
                // Already stopping, terminal, or never spawned.
                debug!(process = %self.spec.name, %state, "stop request is a no-op");
                return Ok(());
            }
            guard.state.transition_to_stopping()?;
            guard.pid
        };

        if let Some(pid) = pid {
            info!(process = %self.spec.name, pid, "sending polite termination request");
            if let Err(e) = stagehand_process::terminate_gracefully(pid) {
                // Most likely the process exited between the state snapshot
                // and the signal; the exit monitor will settle the state.
                warn!(process = %self.spec.name, pid, error = %e, "termination request failed");
            }
        }
        Ok(())
    }

    async fn force_stop(&self) -> ProcessResult<()> {
        let pid = {
            let mut guard = self.inner.lock();
            let state = guard.state.current_state();
            if state.is_terminal() {
                return Ok(());
            }
            guard.kill_requested = true;
            if state.can_request_stop() {
                guard.state.transition_to_stopping()?;
            }
            guard.pid
        };

        if let Some(pid) = pid {
            warn!(process = %self.spec.name, pid, "force killing process");
            if let Err(e) = stagehand_process::force_kill(pid) {
                warn!(process = %self.spec.name, pid, error = %e, "force kill failed");
            }
        }
        Ok(())
    }

    async fn await_exit(&self, timeout: Duration) -> WaitOutcome {
        let mut rx = self.exit_tx.subscribe();
        if self.state().is_terminal() {
            return WaitOutcome::Terminal;
        }

        let wait = async {
            loop {
                if *rx.borrow_and_update() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => WaitOutcome::Terminal,
            Err(_) => WaitOutcome::TimedOut,
        }
    }

    fn state(&self) -> ProcessState {
        self.inner.lock().state.current_state()
    }

    fn exit_info(&self) -> Option<ExitInfo> {
        self.inner.lock().exit_info.clone()
    }

    fn pid(&self) -> Option<u32> {
        self.inner.lock().pid
    }

    fn take_output(&self) -> Option<OutputStreams> {
        self.inner.lock().output.take()
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if let Some(task) = self.inner.lock().exit_monitor.take() {
            task.abort();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> ManagedProcess {
        let spec = ProcessSpec::new(name, "/bin/sh").with_args(["-c", script]);
        ManagedProcess::new(spec, None)
    }

    #[tokio::test]
    async fn test_spawn_failure_sets_failed_state() {
        let spec = ProcessSpec::new("ghost", "/nonexistent/executable");
        let proc = ManagedProcess::new(spec, None);

        let err = proc.spawn().await.unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
        assert_eq!(proc.state(), ProcessState::Failed);
        // Terminal immediately, no waiting.
        assert_eq!(
            proc.await_exit(Duration::from_millis(50)).await,
            WaitOutcome::Terminal
        );
    }

    #[tokio::test]
    async fn test_self_exit_while_running_is_failed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let spec = ProcessSpec::new("oneshot", "/bin/sh").with_args(["-c", "exit 0"]);
        let proc = ManagedProcess::new(spec, Some(tx));

        proc.spawn().await.unwrap();
        assert_eq!(
            proc.await_exit(Duration::from_secs(5)).await,
            WaitOutcome::Terminal
        );

        // Even a zero exit is unexpected for a long-running service.
        assert_eq!(proc.state(), ProcessState::Failed);
        assert_eq!(proc.exit_info().unwrap().code, Some(0));
        assert_eq!(rx.recv().await.unwrap(), "oneshot");
    }

    #[tokio::test]
    async fn test_graceful_stop_path() {
        let proc = sh("sleeper", "sleep 30");
        proc.spawn().await.unwrap();
        assert_eq!(proc.state(), ProcessState::Running);
        assert!(proc.pid().is_some());

        proc.request_stop().await.unwrap();
        assert_eq!(
            proc.await_exit(Duration::from_secs(5)).await,
            WaitOutcome::Terminal
        );

        assert_eq!(proc.state(), ProcessState::Stopped);
        let exit = proc.exit_info().unwrap();
        assert_eq!(exit.signal, Some(15));
        assert!(proc.pid().is_none());
    }

    #[tokio::test]
    async fn test_stop_request_is_single_and_idempotent() {
        let proc = sh("sleeper", "sleep 30");
        proc.spawn().await.unwrap();

        proc.request_stop().await.unwrap();
        assert_eq!(proc.state(), ProcessState::Stopping);
        // Second request is a no-op success.
        proc.request_stop().await.unwrap();

        proc.await_exit(Duration::from_secs(5)).await;
        proc.request_stop().await.unwrap();
        assert_eq!(proc.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_force_stop_after_ignored_term() {
        let proc = sh("stubborn", "trap '' TERM; while :; do sleep 0.05; done");
        proc.spawn().await.unwrap();
        // Let the shell install its TERM trap before we signal it.
        tokio::time::sleep(Duration::from_millis(200)).await;

        proc.request_stop().await.unwrap();
        assert_eq!(
            proc.await_exit(Duration::from_millis(400)).await,
            WaitOutcome::TimedOut
        );

        proc.force_stop().await.unwrap();
        assert_eq!(
            proc.await_exit(Duration::from_secs(5)).await,
            WaitOutcome::Terminal
        );
        assert_eq!(proc.state(), ProcessState::Stopped);
        assert_eq!(proc.exit_info().unwrap().signal, Some(9));
    }

    #[tokio::test]
    async fn test_await_exit_timeout_is_not_an_error() {
        let proc = sh("sleeper", "sleep 30");
        proc.spawn().await.unwrap();

        let started = std::time::Instant::now();
        let outcome = proc.await_exit(Duration::from_millis(100)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(1));

        proc.force_stop().await.unwrap();
        proc.await_exit(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_output_streams_taken_once() {
        let proc = sh("echoer", "echo hello");
        proc.spawn().await.unwrap();

        let streams = proc.take_output().expect("streams captured at spawn");
        assert!(streams.stdout.is_some());
        assert!(streams.stderr.is_some());
        assert!(proc.take_output().is_none());

        proc.await_exit(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_respawn_is_rejected() {
        let proc = sh("sleeper", "sleep 30");
        proc.spawn().await.unwrap();
        // A process never returns to Pending; respawn is a state error.
        assert!(proc.spawn().await.is_err());

        proc.force_stop().await.unwrap();
        proc.await_exit(Duration::from_secs(5)).await;
    }
}
