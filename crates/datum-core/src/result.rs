use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::datum::{Datum, ErrorKind};

/// Token traveling on every graph edge: a success or failure wrapping a datum.
///
/// A failure ordinarily carries an [`Datum::Error`]; the external `/fail`
/// endpoint delivers the captured HTTP request as the failure payload instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    Success(Datum),
    Failure(Datum),
}

impl StageResult {
    pub fn success(datum: Datum) -> Self {
        StageResult::Success(datum)
    }

    pub fn failure(datum: Datum) -> Self {
        StageResult::Failure(datum)
    }

    /// Failure carrying an error datum.
    pub fn failure_error(kind: ErrorKind, message: impl Into<String>) -> Self {
        StageResult::Failure(Datum::error(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StageResult::Failure(_))
    }

    pub fn datum(&self) -> &Datum {
        match self {
            StageResult::Success(datum) | StageResult::Failure(datum) => datum,
        }
    }

    pub fn into_datum(self) -> Datum {
        match self {
            StageResult::Success(datum) | StageResult::Failure(datum) => datum,
        }
    }

    /// Collapse a success payload to `Empty`, leaving failures untouched.
    ///
    /// Used by the accepting combinators, which run a closure for its side
    /// effect and discard its value.
    pub fn to_empty(self) -> StageResult {
        match self {
            StageResult::Success(_) => StageResult::Success(Datum::Empty),
            failure => failure,
        }
    }
}

impl fmt::Display for StageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageResult::Success(datum) => write!(f, "success({})", datum.label()),
            StageResult::Failure(datum) => write!(f, "failure({})", datum.label()),
        }
    }
}

/// Outcome observed on a stage's output future.
///
/// Graph-level failures never ride the `Ok` channel; they travel as
/// [`CompletionError::Faulted`] so that ordinary combinators short-circuit
/// and the catching combinators can recover the wrapped result.
pub type Completion = Result<StageResult, CompletionError>;

/// Error channel of a stage output future.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    /// A graph-level failure carried as data.
    #[error("stage faulted: {0}")]
    Faulted(StageResult),
    /// A host-level fault that is not part of the graph protocol.
    #[error("internal completer fault: {0}")]
    Internal(String),
}

impl CompletionError {
    /// Fault carrying an error-datum failure.
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        CompletionError::Faulted(StageResult::failure_error(kind, message))
    }

    /// Recover the result carried on the error channel.
    ///
    /// Host-level faults are not part of the protocol and collapse to an
    /// `unknown_error` failure.
    pub fn to_result(&self) -> StageResult {
        match self {
            CompletionError::Faulted(result) => result.clone(),
            CompletionError::Internal(message) => {
                warn!(%message, "unexpected completer fault reached the graph");
                StageResult::failure_error(
                    ErrorKind::UnknownError,
                    format!("unexpected fault: {message}"),
                )
            }
        }
    }
}

impl From<StageResult> for CompletionError {
    fn from(result: StageResult) -> Self {
        CompletionError::Faulted(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_empty_collapses_success_only() {
        let success = StageResult::success(Datum::blob("text/plain", b"x".to_vec()));
        assert_eq!(success.to_empty(), StageResult::Success(Datum::Empty));

        let failure = StageResult::failure_error(ErrorKind::StageInvokeFailed, "boom");
        assert_eq!(failure.clone().to_empty(), failure);
    }

    #[test]
    fn faulted_errors_recover_their_result() {
        let failure = StageResult::failure_error(ErrorKind::StageTimeout, "too slow");
        let err = CompletionError::Faulted(failure.clone());
        assert_eq!(err.to_result(), failure);
    }

    #[test]
    fn internal_errors_collapse_to_unknown_error() {
        let err = CompletionError::Internal("runtime went away".into());
        match err.to_result() {
            StageResult::Failure(Datum::Error(error)) => {
                assert_eq!(error.kind, ErrorKind::UnknownError);
                assert!(error.message.contains("runtime went away"));
            }
            other => panic!("expected unknown_error failure, got {other}"),
        }
    }
}
