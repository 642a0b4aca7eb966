//! Severity levels and error handler policies.
//!
//! Every dispatch hands its collected failures to exactly one
//! [`ErrorHandler`]. The handler, not the dispatcher, decides whether failures
//! become errors returned from [`Target::call`](crate::Target::call), log
//! events, or reports on a [`FailureStream`].

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{AssertionFailure, ConfigurationError, RvResult, StreamError};

/// Ordered severity of a spec's failures.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    #[default]
    Error,
    Critical,
}

impl Severity {
    /// All severities, lowest first.
    pub const ALL: [Severity; 5] = [
        Severity::Debug,
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|sev| sev.as_str() == wanted || (wanted == "warn" && *sev == Self::Warning))
            .ok_or_else(|| ConfigurationError::UnknownSeverity {
                value: s.to_string(),
            })
    }
}

/// Policy deciding what happens to the failures of one dispatch.
pub trait ErrorHandler: fmt::Debug + Send + Sync {
    /// Handles the ordered failures of one dispatch. Called once per dispatch,
    /// with an empty slice when nothing failed.
    fn handle(&self, severity: Severity, failures: &[AssertionFailure]) -> RvResult<()>;
}

/// Raises the first failure as [`RvError::Assertion`](crate::RvError::Assertion)
/// when the severity reaches the threshold, and accepts it silently otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaiseErrorHandler {
    threshold: Severity,
}

impl RaiseErrorHandler {
    #[must_use]
    pub const fn new(threshold: Severity) -> Self {
        Self { threshold }
    }

    #[must_use]
    pub const fn threshold(&self) -> Severity {
        self.threshold
    }
}

impl Default for RaiseErrorHandler {
    fn default() -> Self {
        Self::new(Severity::Error)
    }
}

impl ErrorHandler for RaiseErrorHandler {
    fn handle(&self, severity: Severity, failures: &[AssertionFailure]) -> RvResult<()> {
        let Some((first, rest)) = failures.split_first() else {
            return Ok(());
        };
        if severity < self.threshold {
            debug!(%severity, threshold = %self.threshold, count = failures.len(), "failures below raise threshold");
            return Ok(());
        }
        for other in rest {
            warn!(%severity, failure = %other, "failure not raised; an earlier failure of the same call was raised");
        }
        Err(first.clone().into())
    }
}

/// Logs every failure through `tracing` at the level mapped from its severity.
///
/// `Critical` has no `tracing` level of its own; it is logged at `ERROR` with
/// `critical = true`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggingErrorHandler;

impl LoggingErrorHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ErrorHandler for LoggingErrorHandler {
    fn handle(&self, severity: Severity, failures: &[AssertionFailure]) -> RvResult<()> {
        for failure in failures {
            let message = failure.message();
            match severity {
                Severity::Debug => debug!(target: "kyrorv", "{message}"),
                Severity::Info => info!(target: "kyrorv", "{message}"),
                Severity::Warning => warn!(target: "kyrorv", "{message}"),
                Severity::Error => error!(target: "kyrorv", "{message}"),
                Severity::Critical => error!(target: "kyrorv", critical = true, "{message}"),
            }
        }
        Ok(())
    }
}

/// The failures of one dispatch, as delivered on a [`FailureStream`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub severity: Severity,
    pub failures: Vec<AssertionFailure>,
    pub reported_at: DateTime<Utc>,
}

/// Creates a handler that forwards non-empty failure batches to a bounded stream.
#[must_use]
pub fn failure_channel(capacity: usize) -> (ChannelErrorHandler, FailureStream) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        ChannelErrorHandler {
            tx,
            dropped: AtomicU64::new(0),
        },
        FailureStream { rx },
    )
}

/// Forwards failures to a [`FailureStream`] without blocking the monitored call.
///
/// Reports that do not fit into the stream (or whose stream was dropped) are
/// counted and logged, never raised.
#[derive(Debug)]
pub struct ChannelErrorHandler {
    tx: Sender<FailureReport>,
    dropped: AtomicU64,
}

impl ChannelErrorHandler {
    /// Number of reports that could not be delivered.
    #[must_use]
    pub fn dropped_reports(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ErrorHandler for ChannelErrorHandler {
    fn handle(&self, severity: Severity, failures: &[AssertionFailure]) -> RvResult<()> {
        if failures.is_empty() {
            return Ok(());
        }
        let report = FailureReport {
            severity,
            failures: failures.to_vec(),
            reported_at: Utc::now(),
        };
        match self.tx.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(report) | TrySendError::Disconnected(report)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(%severity, count = report.failures.len(), "failure report dropped");
            }
        }
        Ok(())
    }
}

/// Receiving end of a [`ChannelErrorHandler`].
#[derive(Debug)]
pub struct FailureStream {
    rx: Receiver<FailureReport>,
}

impl FailureStream {
    /// Receive the next report (blocking).
    pub fn recv(&self) -> RvResult<FailureReport> {
        self.rx.recv().map_err(|_| StreamError::Disconnected.into())
    }

    /// Receive the next report with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> RvResult<FailureReport> {
        self.rx.recv_timeout(timeout).map_err(|err| {
            let err = match err {
                RecvTimeoutError::Timeout => StreamError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                },
                RecvTimeoutError::Disconnected => StreamError::Disconnected,
            };
            err.into()
        })
    }

    /// Next report if one is queued.
    #[must_use]
    pub fn try_recv(&self) -> Option<FailureReport> {
        self.rx.try_recv().ok()
    }

    /// All queued reports.
    #[must_use]
    pub fn drain(&self) -> Vec<FailureReport> {
        self.rx.try_iter().collect()
    }

    /// Messages of all queued failures, in delivery order.
    #[must_use]
    pub fn drain_messages(&self) -> Vec<String> {
        self.drain()
            .into_iter()
            .flat_map(|report| report.failures)
            .map(|failure| failure.message().to_string())
            .collect()
    }
}
