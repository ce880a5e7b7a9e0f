use std::fmt;

use serde::{Deserialize, Serialize};

use crate::http::{Headers, HttpMethod};
use crate::ids::StageId;

/// Opaque byte payload with a content type.
///
/// Closure blobs are carried here; the engine never inspects the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Blob {
    pub fn new(content_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// Closed set of error categories carried on [`Datum::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A stage invocation exceeded the deadline enforced by the invoker.
    StageTimeout,
    /// Transport failure talking to the stage invoker.
    StageInvokeFailed,
    /// Transport failure talking to the function invoker.
    FunctionInvokeFailed,
    /// The completer lost track of a stage before it resolved.
    StageLost,
    /// A composing stage produced something other than a resolvable stage reference.
    InvalidStageResponse,
    /// Catch-all for host-level faults that reached the graph.
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::StageTimeout => "stage_timeout",
            ErrorKind::StageInvokeFailed => "stage_invoke_failed",
            ErrorKind::FunctionInvokeFailed => "function_invoke_failed",
            ErrorKind::StageLost => "stage_lost",
            ErrorKind::InvalidStageResponse => "invalid_stage_response",
            ErrorKind::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload: a category plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDatum {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDatum {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Tagged value carried on every graph edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Datum {
    Blob(Blob),
    Empty,
    Error(ErrorDatum),
    HttpReq {
        method: HttpMethod,
        headers: Headers,
        body: Vec<u8>,
    },
    HttpResp {
        status_code: u16,
        headers: Headers,
        body: Vec<u8>,
    },
    StageRef {
        stage_id: StageId,
    },
}

impl Datum {
    /// Blob shorthand.
    pub fn blob(content_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Datum::Blob(Blob::new(content_type, bytes))
    }

    /// Error shorthand.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Datum::Error(ErrorDatum::new(kind, message))
    }

    /// Stage-reference shorthand.
    pub fn stage_ref(stage_id: StageId) -> Self {
        Datum::StageRef { stage_id }
    }

    /// Short label for logs and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Datum::Blob(_) => "blob",
            Datum::Empty => "empty",
            Datum::Error(_) => "error",
            Datum::HttpReq { .. } => "http_req",
            Datum::HttpResp { .. } => "http_resp",
            Datum::StageRef { .. } => "stage_ref",
        }
    }
}
