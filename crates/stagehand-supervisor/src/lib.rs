//! Managed process lifecycle and group supervision.
//!
//! Split into:
//! - [`control`]: the `ProcessControl` trait separating the supervisor's
//!   orchestration from per-process lifecycle implementations.
//! - [`managed`]: the real OS-process implementation.
//! - [`supervisor`]: the process group owner — concurrent stage startup,
//!   relay attachment, and the bounded two-phase shutdown escalation.

pub mod control;
pub mod managed;
pub mod supervisor;

pub use control::{OutputStreams, ProcessControl, StopOutcome, WaitOutcome};
pub use managed::{ManagedProcess, ProcessSpec};
pub use supervisor::{
    ProcessSupervisor, ShutdownPolicy, SpawnOutcome, StageStartReport, StopReport,
};
