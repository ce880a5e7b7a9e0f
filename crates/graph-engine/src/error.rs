use std::net::SocketAddr;

use datum_core::{StageId, StageResult, ThreadId};
use thiserror::Error;

/// Engine-entry failures: the completer was misused or the host faulted.
///
/// These surface directly to the caller and are never modeled as results on
/// the graph.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// No graph registered under the given thread id.
    #[error("unknown thread `{0}`")]
    UnknownThread(ThreadId),
    /// Referenced stage is not part of the graph.
    #[error("stage `{0}` not found in graph")]
    UnknownStage(StageId),
    /// A selection combinator was registered over an empty stage list.
    #[error("cannot select over an empty list of stages")]
    EmptyCompletionList,
    /// The completer was built without an external-completion transport.
    #[error("external completions are not configured for this completer")]
    ExternalCompletionsUnavailable,
    /// The external completion listener could not be bound.
    #[error("failed to bind external completion listener on {addr}: {source}")]
    ListenerBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// Catch-all for host faults reaching the facade.
    #[error("internal completer fault: {0}")]
    Internal(String),
}

/// Outcome of waiting on a stage that did not succeed.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The stage resolved to a user-level failure; the payload carries the cause.
    #[error("stage failed: {0}")]
    StageFailed(StageResult),
    /// The graph or host itself misbehaved.
    #[error(transparent)]
    Platform(#[from] PlatformError),
}
