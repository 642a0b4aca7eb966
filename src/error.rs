//! Error types for KyroRV.
//!
//! All errors in KyroRV are strongly typed using thiserror.
//! Configuration and invariant errors are surfaced immediately; assertion
//! failures are collected per dispatch and routed through the configured
//! [`ErrorHandler`](crate::handler::ErrorHandler).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instrument::TargetId;

/// Configuration errors raised while registering specs or snapshotting calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Negative history size ({value}) is not allowed; use -1 for unbounded history")]
    InvalidHistoryCapacity {
        value: i64,
    },

    #[error("Spec '{spec}' has no bindings")]
    NoBindings {
        spec: String,
    },

    #[error("Binding name cannot be empty (spec '{spec}')")]
    EmptyBindingName {
        spec: String,
    },

    #[error("Binding '{name}' is declared twice in spec '{spec}'")]
    DuplicateBinding {
        spec: String,
        name: String,
    },

    #[error("Target '{target}' is bound twice in spec '{spec}' (as '{first}' and '{second}')")]
    DuplicateTarget {
        spec: String,
        target: String,
        first: String,
        second: String,
    },

    #[error("Value of type {type_name} cannot be deep-copied; disable argument copying for this spec")]
    NotCopyable {
        type_name: &'static str,
    },

    #[error("Unknown severity '{value}'")]
    UnknownSeverity {
        value: String,
    },
}

/// A violated property reported by a spec or one-shot continuation.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct AssertionFailure {
    message: String,
}

impl AssertionFailure {
    /// Creates a failure carrying `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for AssertionFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for AssertionFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Broken engine invariants. These are never routed through an error handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error("Spec '{spec}' has no binding for target {target}")]
    NoActiveBinding {
        spec: String,
        target: TargetId,
    },

    #[error("Event must have exactly one called binding, found {called}")]
    CalledBindingCount {
        called: usize,
    },
}

/// Errors receiving from a [`FailureStream`](crate::handler::FailureStream).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("Failure stream disconnected")]
    Disconnected,

    #[error("Timed out after {duration_ms}ms waiting for a failure report")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for KyroRV.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RvError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Assertion failed: {0}")]
    Assertion(#[from] AssertionFailure),

    #[error("Internal invariant violated: {0}")]
    Invariant(#[from] InvariantError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("{} errors raised by a single call", .0.len())]
    Multiple(Vec<RvError>),
}

impl RvError {
    /// Folds the errors raised by independent hooks or specs into one result.
    ///
    /// No error is dropped: several errors become [`RvError::Multiple`].
    pub fn from_batch(mut errors: Vec<RvError>) -> RvResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is an assertion failure.
    #[must_use]
    pub const fn is_assertion(&self) -> bool {
        matches!(self, Self::Assertion(_))
    }

    /// Returns true if this is an internal invariant violation.
    #[must_use]
    pub const fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }

    /// The assertion failure carried by this error, if any.
    #[must_use]
    pub const fn as_assertion(&self) -> Option<&AssertionFailure> {
        match self {
            Self::Assertion(failure) => Some(failure),
            _ => None,
        }
    }

    /// All errors contained in this error, flattening [`RvError::Multiple`].
    #[must_use]
    pub fn flatten(&self) -> Vec<&RvError> {
        match self {
            Self::Multiple(errors) => errors.iter().flat_map(RvError::flatten).collect(),
            other => vec![other],
        }
    }
}

/// Result type alias for KyroRV operations.
pub type RvResult<T> = Result<T, RvError>;

/// Result type returned by spec callbacks and continuations.
pub type SpecResult = Result<(), AssertionFailure>;

/// Returns an [`AssertionFailure`] from the enclosing spec unless `cond` holds.
///
/// ```
/// use kyrorv::{rv_ensure, SpecResult};
///
/// fn check(x: i64) -> SpecResult {
///     rv_ensure!(x > 0, "x must be positive, got {}", x);
///     Ok(())
/// }
///
/// assert!(check(1).is_ok());
/// assert_eq!(check(-1).unwrap_err().message(), "x must be positive, got -1");
/// ```
#[macro_export]
macro_rules! rv_ensure {
    ($cond:expr $(,)?) => {
        if !$cond {
            return Err($crate::AssertionFailure::new(concat!("assertion failed: ", stringify!($cond))));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::AssertionFailure::new(format!($($arg)+)));
        }
    };
}

/// Builds an [`AssertionFailure`] from a format string.
#[macro_export]
macro_rules! rv_fail {
    ($($arg:tt)+) => {
        $crate::AssertionFailure::new(format!($($arg)+))
    };
}
