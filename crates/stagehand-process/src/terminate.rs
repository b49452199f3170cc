//! Process termination primitives.
//!
//! Two-phase termination vocabulary: a polite request the target may handle
//! (SIGTERM), and a forced kill it cannot ignore (SIGKILL).

use stagehand_common::{ProcessError, ProcessResult};

/// Send a polite termination request (SIGTERM on Unix).
///
/// The target is free to ignore this; callers escalate to [`force_kill`]
/// after their grace period.
pub fn terminate_gracefully(pid: u32) -> ProcessResult<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
            .map_err(|e| ProcessError::stop_failed(pid.to_string(), e.to_string()))
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(ProcessError::unsupported("graceful termination"))
    }
}

/// Send a forceful, non-ignorable kill (SIGKILL on Unix).
pub fn force_kill(pid: u32) -> ProcessResult<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
            .map_err(|e| ProcessError::stop_failed(pid.to_string(), e.to_string()))
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(ProcessError::unsupported("force kill"))
    }
}
