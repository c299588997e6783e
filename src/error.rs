//! Error types for the Quicktick scheduler
//!
//! Two families live here. [`Error`] is a fatal, loop-level failure: the
//! scheduler's own model was violated (the clock ran backwards, a handle was
//! issued twice) or the embedder misused the lifecycle. [`CallbackError`] is
//! what a script callback "throws"; it never aborts the loop and is reported
//! through the unhandled-error hook instead.

use std::fmt;
use thiserror::Error;

use crate::clock::Timestamp;
use crate::event_loop::{LoopState, TimerHandle};

/// Main error type for Quicktick
#[derive(Error, Debug)]
pub enum Error {
    /// The clock reported a reading earlier than a previous one
    #[error("ClockRegression: clock went backwards from {previous} to {current}")]
    ClockRegression {
        previous: Timestamp,
        current: Timestamp,
    },

    /// A freshly issued handle collided with a live timer
    #[error("DuplicateHandle: timer handle {0} is already live")]
    DuplicateHandle(TimerHandle),

    /// A single microtask drain ran past the configured budget
    #[error("MicrotaskBudgetExceeded: more than {limit} microtasks in one drain")]
    MicrotaskBudgetExceeded { limit: usize },

    /// Lifecycle call made in the wrong loop state
    #[error("InvalidState: expected {expected}, loop is {found}")]
    InvalidState {
        expected: &'static str,
        found: LoopState,
    },

    /// Invalid loop configuration
    #[error("ConfigError: {0}")]
    Config(String),

    /// IO error
    #[error("IOError: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Malformed JSON configuration
    #[error("JSONError: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Whether this error came from a broken scheduler invariant rather than
    /// from the embedder's input
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Error::ClockRegression { .. }
                | Error::DuplicateHandle(_)
                | Error::MicrotaskBudgetExceeded { .. }
        )
    }
}

/// Result type for Quicktick operations
pub type Result<T> = std::result::Result<T, Error>;

/// JavaScript error kinds a callback can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::enum_variant_names)]
pub enum ErrorKind {
    /// TypeError - wrong type for operation
    TypeError,
    /// ReferenceError - undefined variable
    ReferenceError,
    /// Generic Error - user-thrown Error objects
    GenericError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::ReferenceError => write!(f, "ReferenceError"),
            ErrorKind::GenericError => write!(f, "Error"),
        }
    }
}

/// An exception raised by a script callback.
///
/// Cloneable because a promise rejection reason is handed to every
/// continuation registered on the promise.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CallbackError {
    /// The kind of error thrown
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

impl CallbackError {
    /// Create a generic `Error`
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::GenericError, message)
    }

    /// Create a TypeError
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::TypeError, message)
    }

    /// Create a ReferenceError
    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::ReferenceError, message)
    }

    /// Create an error of the given kind
    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// What every script callback returns; `Err` is a thrown exception
pub type CallbackResult = std::result::Result<(), CallbackError>;
