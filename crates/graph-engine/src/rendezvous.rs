use async_trait::async_trait;
use datum_core::StageId;

use crate::cell::CompletionWriter;
use crate::error::PlatformError;

/// URIs advertised for one pending external completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionUris {
    pub complete: String,
    pub fail: String,
}

/// Handle returned by `create_external_completion`.
#[derive(Debug)]
pub struct ExternalCompletion {
    /// Stage resolved by the out-of-band actor.
    pub completion_id: StageId,
    /// POST here to resolve the stage successfully.
    pub complete_uri: String,
    /// POST here to fail the stage.
    pub fail_uri: String,
}

/// Transport that lets out-of-band actors resolve pending completions.
///
/// Implementations start lazily on first registration and surface transport
/// setup failures (e.g. a bind error) to the registering caller rather than
/// to a background task.
#[async_trait]
pub trait ExternalRendezvous: Send + Sync {
    /// Register a pending completion under `path` and return its URIs.
    async fn register(
        &self,
        path: &str,
        writer: CompletionWriter,
    ) -> Result<CompletionUris, PlatformError>;
}
