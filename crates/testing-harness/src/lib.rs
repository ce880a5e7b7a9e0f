//! In-memory collaborators for driving completer graphs in tests.
//!
//! The [`StageRunner`] plays the stage-invoker role: closures are ordinary
//! Rust functions registered under a name, and the "serialized closure" blob
//! handed to the engine is just an opaque token naming one of them. Every
//! invocation is recorded so tests can assert on call order and inputs.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use datum_core::{
    Blob, Completion, CompletionError, Datum, ErrorKind, FunctionInvoker, Headers, HttpMethod,
    StageId, StageInvoker, StageResult,
};
use tracing::debug;

/// Content type tagging the harness's closure-reference blobs.
pub const CLOSURE_CONTENT_TYPE: &str = "application/x-skein-closure-ref";

type ClosureFn = dyn Fn(Vec<StageResult>) -> Completion + Send + Sync;

/// One recorded stage invocation.
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub stage_id: StageId,
    pub closure: String,
    pub inputs: Vec<StageResult>,
}

/// Stage invoker that executes registered in-process closures.
#[derive(Default)]
pub struct StageRunner {
    closures: DashMap<String, Arc<ClosureFn>>,
    invocations: Mutex<Vec<RecordedInvocation>>,
}

impl StageRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure and return the blob that references it.
    pub fn register<F>(&self, name: &str, closure: F) -> Blob
    where
        F: Fn(Vec<StageResult>) -> Completion + Send + Sync + 'static,
    {
        self.closures.insert(name.to_string(), Arc::new(closure));
        Self::closure_ref(name)
    }

    /// Reference blob for an already-registered closure.
    pub fn closure_ref(name: &str) -> Blob {
        Blob::new(CLOSURE_CONTENT_TYPE, name.as_bytes().to_vec())
    }

    /// Every invocation seen so far, in order.
    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations
            .lock()
            .expect("invocation log poisoned")
            .clone()
    }

    /// Invocations of one closure, in order.
    pub fn invocations_of(&self, name: &str) -> Vec<RecordedInvocation> {
        self.invocations()
            .into_iter()
            .filter(|call| call.closure == name)
            .collect()
    }
}

#[async_trait]
impl StageInvoker for StageRunner {
    async fn invoke_stage(
        &self,
        _function_id: &str,
        stage_id: StageId,
        closure: Blob,
        inputs: Vec<StageResult>,
    ) -> Completion {
        let name = String::from_utf8_lossy(&closure.bytes).into_owned();
        debug!(stage = %stage_id, closure = %name, "running stage closure");
        self.invocations
            .lock()
            .expect("invocation log poisoned")
            .push(RecordedInvocation {
                stage_id,
                closure: name.clone(),
                inputs: inputs.clone(),
            });
        let closure = self.closures.get(&name).map(|entry| Arc::clone(entry.value()));
        match closure {
            Some(run) => run(inputs),
            None => Err(CompletionError::failure(
                ErrorKind::StageInvokeFailed,
                format!("no closure registered as `{name}`"),
            )),
        }
    }
}

/// One recorded function invocation.
#[derive(Debug, Clone)]
pub struct RecordedFunctionCall {
    pub function_id: String,
    pub method: HttpMethod,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// Function invoker replying to every call with one canned HTTP response.
pub struct StaticFunctionInvoker {
    status_code: u16,
    body: Vec<u8>,
    calls: Mutex<Vec<RecordedFunctionCall>>,
}

impl StaticFunctionInvoker {
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            body: body.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls seen so far, in order.
    pub fn calls(&self) -> Vec<RecordedFunctionCall> {
        self.calls.lock().expect("call log poisoned").clone()
    }
}

#[async_trait]
impl FunctionInvoker for StaticFunctionInvoker {
    async fn invoke_function(
        &self,
        function_id: &str,
        method: HttpMethod,
        headers: Headers,
        body: Vec<u8>,
    ) -> Completion {
        self.calls
            .lock()
            .expect("call log poisoned")
            .push(RecordedFunctionCall {
                function_id: function_id.to_string(),
                method,
                headers,
                body,
            });
        Ok(StageResult::success(Datum::HttpResp {
            status_code: self.status_code,
            headers: Headers::new(),
            body: self.body.clone(),
        }))
    }
}

/// Function invoker failing every call with `function_invoke_failed`.
#[derive(Default)]
pub struct FailingFunctionInvoker;

#[async_trait]
impl FunctionInvoker for FailingFunctionInvoker {
    async fn invoke_function(
        &self,
        function_id: &str,
        _method: HttpMethod,
        _headers: Headers,
        _body: Vec<u8>,
    ) -> Completion {
        Err(CompletionError::failure(
            ErrorKind::FunctionInvokeFailed,
            format!("no function backend for `{function_id}`"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runner_executes_registered_closures_and_records_calls() {
        let runner = StageRunner::new();
        let blob = runner.register("echo", |inputs| {
            Ok(inputs
                .into_iter()
                .next()
                .unwrap_or(StageResult::success(Datum::Empty)))
        });

        let input = StageResult::success(Datum::blob("text/plain", b"x".to_vec()));
        let out = runner
            .invoke_stage("fn", StageId::from_index(1), blob, vec![input.clone()])
            .await;

        assert_eq!(out, Ok(input));
        let calls = runner.invocations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].closure, "echo");
    }

    #[tokio::test]
    async fn unknown_closure_fails_as_stage_invoke_failed() {
        let runner = StageRunner::new();
        let out = runner
            .invoke_stage(
                "fn",
                StageId::from_index(1),
                StageRunner::closure_ref("missing"),
                Vec::new(),
            )
            .await;

        match out {
            Err(CompletionError::Faulted(StageResult::Failure(Datum::Error(error)))) => {
                assert_eq!(error.kind, ErrorKind::StageInvokeFailed);
            }
            other => panic!("expected stage_invoke_failed, got {other:?}"),
        }
    }
}
