//! Process output relaying.
//!
//! One relay task per captured stream reads lines as they arrive and
//! forwards them to a shared [`LogSink`], tagged with the process name.
//! Relaying is best-effort: a read error ends that relay with a warning and
//! never propagates to process or orchestrator state.

use parking_lot::Mutex;
use stagehand_common::StreamSource;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Destination for relayed output lines.
///
/// Implementations must tolerate concurrent emission from multiple relays.
/// Lines are always delivered whole, so sinks never see partial-line
/// interleaving.
pub trait LogSink: Send + Sync {
    fn emit(&self, process: &str, source: StreamSource, line: &str);
}

/// Sink that forwards each line as a `tracing` event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, process: &str, source: StreamSource, line: &str) {
        // One event per line keeps concurrent relays from interleaving.
        info!(target: "stagehand::service", process = %process, stream = %source, "{}", line);
    }
}

/// A single relayed line, as captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedLine {
    pub process: String,
    pub source: StreamSource,
    pub line: String,
}

/// In-memory sink for tests and report capture.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<RelayedLine>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<RelayedLine> {
        self.lines.lock().clone()
    }

    /// Lines relayed for one process, in that process's own stream order.
    pub fn lines_for(&self, process: &str) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|l| l.process == process)
            .map(|l| l.line.clone())
            .collect()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, process: &str, source: StreamSource, line: &str) {
        self.lines.lock().push(RelayedLine {
            process: process.to_string(),
            source,
            line: line.to_string(),
        });
    }
}

/// Spawn a relay task reading `reader` line by line into `sink`.
///
/// The task ends when the stream closes (process exited) or `cancel` fires,
/// whichever is observed first.
pub fn spawn_relay<R>(
    process: String,
    source: StreamSource,
    reader: R,
    sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(process = %process, stream = %source, "relay cancelled");
                    break;
                }
                next = lines.next_line() => match next {
                    Ok(Some(line)) => sink.emit(&process, source, &line),
                    Ok(None) => {
                        debug!(process = %process, stream = %source, "relay stream closed");
                        break;
                    }
                    Err(e) => {
                        // Best-effort: log and stop this relay only.
                        warn!(process = %process, stream = %source, error = %e, "relay read error");
                        break;
                    }
                },
            }
        }
    })
}
