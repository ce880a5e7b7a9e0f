use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use datum_core::{
    Blob, CompletionError, Datum, FunctionInvoker, Headers, HttpMethod, StageId, StageInvoker,
    StageResult, ThreadId,
};
use tokio::runtime::Handle;
use tracing::{debug, info, instrument};

use crate::error::{PlatformError, WaitError};
use crate::graph::{EngineShared, Graph};
use crate::rendezvous::{ExternalCompletion, ExternalRendezvous};

/// The public completer surface: one isolated graph per thread id, a builder
/// method per combinator, and an awaitable completion per stage.
pub struct Completer {
    shared: Arc<EngineShared>,
    graphs: DashMap<ThreadId, Arc<Graph>>,
    thread_count: AtomicU64,
    rendezvous: Option<Arc<dyn ExternalRendezvous>>,
}

/// Builder for a [`Completer`], letting hosts inject the runtime handle and
/// the external-completion transport.
pub struct CompleterBuilder {
    stage_invoker: Arc<dyn StageInvoker>,
    function_invoker: Arc<dyn FunctionInvoker>,
    runtime: Option<Handle>,
    rendezvous: Option<Arc<dyn ExternalRendezvous>>,
}

impl CompleterBuilder {
    /// Spawn stage driver tasks on the given runtime instead of the ambient one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Configure the transport backing external completions.
    pub fn rendezvous(mut self, rendezvous: Arc<dyn ExternalRendezvous>) -> Self {
        self.rendezvous = Some(rendezvous);
        self
    }

    pub fn build(self) -> Completer {
        let runtime = self.runtime.unwrap_or_else(Handle::current);
        Completer {
            shared: Arc::new(EngineShared {
                stage_invoker: self.stage_invoker,
                function_invoker: self.function_invoker,
                runtime,
            }),
            graphs: DashMap::new(),
            thread_count: AtomicU64::new(0),
            rendezvous: self.rendezvous,
        }
    }
}

impl Completer {
    /// Completer using the ambient Tokio runtime and no external transport.
    pub fn new(
        stage_invoker: Arc<dyn StageInvoker>,
        function_invoker: Arc<dyn FunctionInvoker>,
    ) -> Self {
        Self::builder(stage_invoker, function_invoker).build()
    }

    pub fn builder(
        stage_invoker: Arc<dyn StageInvoker>,
        function_invoker: Arc<dyn FunctionInvoker>,
    ) -> CompleterBuilder {
        CompleterBuilder {
            stage_invoker,
            function_invoker,
            runtime: None,
            rendezvous: None,
        }
    }

    /// Allocate a fresh graph for one function invocation.
    pub fn create_thread(&self, function_id: impl Into<String>) -> ThreadId {
        let tid = ThreadId::from_index(self.thread_count.fetch_add(1, Ordering::SeqCst) + 1);
        let graph = Graph::new(function_id.into(), Arc::clone(&self.shared));
        self.graphs.insert(tid.clone(), Arc::new(graph));
        info!(thread = %tid, "created thread");
        tid
    }

    fn graph(&self, tid: &ThreadId) -> Result<Arc<Graph>, PlatformError> {
        self.graphs
            .get(tid)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PlatformError::UnknownThread(tid.clone()))
    }

    /// Mark that no further top-level builder work is expected.
    ///
    /// Returns `true` only for the call that flipped the flag; resolution of
    /// already-registered stages proceeds regardless.
    pub fn commit(&self, tid: &ThreadId) -> Result<bool, PlatformError> {
        let committed = self.graph(tid)?.commit();
        debug!(thread = %tid, committed, "commit");
        Ok(committed)
    }

    /// Await a stage's completion and translate its outcome.
    #[instrument(name = "completer.wait", skip(self), fields(thread = %tid, stage = %cid))]
    pub async fn wait_for_completion(
        &self,
        tid: &ThreadId,
        cid: &StageId,
    ) -> Result<StageResult, WaitError> {
        let graph = self.graph(tid)?;
        let node = graph.node(cid)?;
        match node.output().wait().await {
            Ok(result) => Ok(result),
            Err(CompletionError::Faulted(result)) => Err(WaitError::StageFailed(result)),
            Err(CompletionError::Internal(message)) => {
                Err(WaitError::Platform(PlatformError::Internal(message)))
            }
        }
    }

    pub fn supply(&self, tid: &ThreadId, closure: Blob) -> Result<StageId, PlatformError> {
        Ok(self.graph(tid)?.supply(closure))
    }

    pub fn completed_value(&self, tid: &ThreadId, value: Datum) -> Result<StageId, PlatformError> {
        Ok(self.graph(tid)?.completed_value(value))
    }

    pub fn then_apply(
        &self,
        tid: &ThreadId,
        cid: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        self.graph(tid)?.then_apply(cid, closure)
    }

    pub fn then_accept(
        &self,
        tid: &ThreadId,
        cid: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        self.graph(tid)?.then_accept(cid, closure)
    }

    pub fn then_run(
        &self,
        tid: &ThreadId,
        cid: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        self.graph(tid)?.then_run(cid, closure)
    }

    pub fn then_compose(
        &self,
        tid: &ThreadId,
        cid: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        self.graph(tid)?.then_compose(cid, closure)
    }

    pub fn when_complete(
        &self,
        tid: &ThreadId,
        cid: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        self.graph(tid)?.when_complete(cid, closure)
    }

    pub fn handle(
        &self,
        tid: &ThreadId,
        cid: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        self.graph(tid)?.handle(cid, closure)
    }

    pub fn exceptionally(
        &self,
        tid: &ThreadId,
        cid: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        self.graph(tid)?.exceptionally(cid, closure)
    }

    pub fn accept_either(
        &self,
        tid: &ThreadId,
        cid: &StageId,
        alternate: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        self.graph(tid)?.accept_either(cid, alternate, closure)
    }

    pub fn apply_to_either(
        &self,
        tid: &ThreadId,
        cid: &StageId,
        alternate: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        self.graph(tid)?.apply_to_either(cid, alternate, closure)
    }

    pub fn then_combine(
        &self,
        tid: &ThreadId,
        cid: &StageId,
        alternate: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        self.graph(tid)?.then_combine(cid, alternate, closure)
    }

    pub fn then_accept_both(
        &self,
        tid: &ThreadId,
        cid: &StageId,
        alternate: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        self.graph(tid)?.then_accept_both(cid, alternate, closure)
    }

    pub fn all_of(&self, tid: &ThreadId, cids: &[StageId]) -> Result<StageId, PlatformError> {
        self.graph(tid)?.all_of(cids)
    }

    pub fn any_of(&self, tid: &ThreadId, cids: &[StageId]) -> Result<StageId, PlatformError> {
        self.graph(tid)?.any_of(cids)
    }

    pub fn delay(&self, tid: &ThreadId, delay: Duration) -> Result<StageId, PlatformError> {
        Ok(self.graph(tid)?.delay(delay))
    }

    pub fn invoke_function(
        &self,
        tid: &ThreadId,
        function_id: impl Into<String>,
        method: HttpMethod,
        headers: Headers,
        body: Vec<u8>,
    ) -> Result<StageId, PlatformError> {
        Ok(self
            .graph(tid)?
            .invoke_function(function_id, method, headers, body))
    }

    /// Register a stage resolved by an out-of-band HTTP POST.
    ///
    /// Starts the rendezvous transport if it is not yet running; bind errors
    /// surface here.
    pub async fn create_external_completion(
        &self,
        tid: &ThreadId,
    ) -> Result<ExternalCompletion, PlatformError> {
        let rendezvous = self
            .rendezvous
            .clone()
            .ok_or(PlatformError::ExternalCompletionsUnavailable)?;
        let graph = self.graph(tid)?;
        let (cid, writer) = graph.external();
        let path = format!("{tid}_{cid}");
        let uris = rendezvous.register(&path, writer).await?;
        debug!(thread = %tid, stage = %cid, path, "registered external completion");
        Ok(ExternalCompletion {
            completion_id: cid,
            complete_uri: uris.complete,
            fail_uri: uris.fail,
        })
    }

    /// Number of stages minted on the thread's graph.
    pub fn stage_count(&self, tid: &ThreadId) -> Result<u64, PlatformError> {
        Ok(self.graph(tid)?.stage_count())
    }

    /// Stages in flight on the thread's graph; zero once the graph is quiescent.
    pub fn active_stages(&self, tid: &ThreadId) -> Result<i64, PlatformError> {
        Ok(self.graph(tid)?.active_stages())
    }

    /// Whether the thread has been committed.
    pub fn is_committed(&self, tid: &ThreadId) -> Result<bool, PlatformError> {
        Ok(self.graph(tid)?.is_committed())
    }
}
