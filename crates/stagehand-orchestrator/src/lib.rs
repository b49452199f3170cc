//! Run configuration, staged startup, and the orchestrator lifecycle.

pub mod config;
pub mod orchestrator;
pub mod report;

pub use config::{CommandConfig, ProbeConfig, ProcessEntry, RunConfig, ShutdownConfig, StageConfig};
pub use orchestrator::{Orchestrator, Phase, ShutdownHandle};
pub use report::{FailureCause, ProbeReport, RunReport, StageReport};
