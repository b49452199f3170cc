//! Shared error and domain types for the stagehand orchestrator.

pub mod errors;
pub mod types;

pub use errors::{ProcessError, ProcessResult};
pub use types::{ExitInfo, StreamSource};
