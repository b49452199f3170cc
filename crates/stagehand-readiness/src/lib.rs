//! TCP readiness probing.
//!
//! A listening socket is the cheapest readiness signal that requires no
//! cooperation from the target service: the probe attempts a plain TCP
//! connect once per poll interval and closes the connection immediately on
//! success. This is a liveness gate, not a functional health check.

use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Outcome of a readiness wait. Timing out is an ordinary, reportable
/// result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The port accepted a connection within the deadline.
    Ready { elapsed: Duration },
    /// The deadline elapsed without a successful connect.
    TimedOut { waited: Duration },
}

impl ProbeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeOutcome::Ready { .. })
    }
}

/// Polls a TCP endpoint until it accepts connections or a deadline passes.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    host: String,
    poll_interval: Duration,
    connect_timeout: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            poll_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
        }
    }
}

impl ReadinessProbe {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Override the pause between connect attempts (default 1s).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the per-attempt connect timeout (default 1s). A single
    /// stalled connect must never push the loop past the overall deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Wait until `host:port` accepts a TCP connection, or `timeout`
    /// elapses. The successful connection is dropped immediately.
    pub async fn wait_until_ready(&self, port: u16, timeout: Duration) -> ProbeOutcome {
        let addr = format!("{}:{}", self.host, port);
        let start = Instant::now();
        let deadline = start + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(%addr, waited = ?start.elapsed(), "readiness probe timed out");
                return ProbeOutcome::TimedOut {
                    waited: start.elapsed(),
                };
            }

            let attempt_timeout = self.connect_timeout.min(remaining);
            match tokio::time::timeout(attempt_timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => {
                    // Liveness only; close right away.
                    drop(stream);
                    let elapsed = start.elapsed();
                    debug!(%addr, ?elapsed, "readiness probe connected");
                    return ProbeOutcome::Ready { elapsed };
                }
                Ok(Err(e)) => {
                    debug!(%addr, error = %e, "readiness probe attempt refused");
                }
                Err(_) => {
                    debug!(%addr, "readiness probe attempt timed out");
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return ProbeOutcome::TimedOut {
                    waited: start.elapsed(),
                };
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }
}
