use async_trait::async_trait;

use crate::datum::Blob;
use crate::http::{Headers, HttpMethod};
use crate::ids::StageId;
use crate::result::{Completion, StageResult};

/// Collaborator that runs a serialized closure against a list of input results.
///
/// The closure blob is opaque to the engine. A user-level stage failure must
/// ride the error channel (`Err(CompletionError::Faulted(..))`) so that
/// dependent stages short-circuit; a transport failure reaching the invoker
/// surfaces as a `stage_invoke_failed` failure, an invoker-enforced deadline
/// as `stage_timeout`.
#[async_trait]
pub trait StageInvoker: Send + Sync {
    async fn invoke_stage(
        &self,
        function_id: &str,
        stage_id: StageId,
        closure: Blob,
        inputs: Vec<StageResult>,
    ) -> Completion;
}

/// Collaborator that performs an ordinary function-as-a-service invocation.
///
/// A successful response wraps an [`crate::Datum::HttpResp`]; transport
/// failures surface as `function_invoke_failed`.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke_function(
        &self,
        function_id: &str,
        method: HttpMethod,
        headers: Headers,
        body: Vec<u8>,
    ) -> Completion;
}
