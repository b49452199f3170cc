//! Process existence checking.

use stagehand_common::{ProcessError, ProcessResult};

/// Check if a process with the given PID exists and is running.
///
/// Non-destructive: on Unix this uses `kill(pid, 0)`, which delivers no
/// signal but reports whether the process exists.
///
/// # Returns
///
/// * `Ok(true)` - process exists
/// * `Ok(false)` - no such process
/// * `Err(_)` - the check itself failed
pub fn process_exists(pid: u32) -> ProcessResult<bool> {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::ESRCH) => Ok(false),
            // Exists, but owned by another user.
            Err(nix::errno::Errno::EPERM) => Ok(true),
            Err(e) => Err(ProcessError::configuration(
                pid.to_string(),
                format!("Failed to check process: {}", e),
            )),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(ProcessError::unsupported("process existence check"))
    }
}
