//! Low-level process operations for stagehand.
//!
//! Cross-process signalling primitives used by the supervisor:
//! - polite termination requests
//! - forced kills
//! - process existence checks

pub mod check;
pub mod terminate;

pub use check::process_exists;
pub use terminate::{force_kill, terminate_gracefully};
