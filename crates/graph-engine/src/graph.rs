use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use datum_core::{
    Blob, Completion, CompletionError, Datum, ErrorKind, FunctionInvoker, Headers, HttpMethod,
    StageId, StageInvoker, StageResult,
};
use futures::FutureExt;
use futures::future::{self, BoxFuture, Either};
use tokio::runtime::Handle;
use tracing::trace;

use crate::cell::{CompletionCell, CompletionWriter};
use crate::error::PlatformError;

/// Resolved inputs delivered to a stage's invoke function.
///
/// The `Err` arm is a parent failure traveling the error channel; most
/// combinators short-circuit on it, the catching combinators inspect it.
pub(crate) type StageInputs = Result<Vec<StageResult>, CompletionError>;

type InputFuture = BoxFuture<'static, StageInputs>;
type InvokeFn = Box<dyn FnOnce(StageId, StageInputs) -> BoxFuture<'static, Completion> + Send>;

/// Collaborators and scheduler surface shared by every graph of a completer.
pub(crate) struct EngineShared {
    pub(crate) stage_invoker: Arc<dyn StageInvoker>,
    pub(crate) function_invoker: Arc<dyn FunctionInvoker>,
    pub(crate) runtime: Handle,
}

/// One computation vertex: a stage id plus the memoized output slot.
#[derive(Clone)]
pub struct Node {
    id: StageId,
    output: CompletionCell,
}

impl Node {
    pub fn id(&self) -> &StageId {
        &self.id
    }

    pub fn output(&self) -> &CompletionCell {
        &self.output
    }

    fn into_id(self) -> StageId {
        self.id
    }
}

/// One isolated dataflow graph belonging to one function invocation.
///
/// Stages are added by the combinator builders and never removed. Each stage
/// runs as a driver task on the injected runtime: await the input assembly,
/// bump the active counter, run the invoke function, resolve the output cell.
pub struct Graph {
    inner: Arc<GraphInner>,
}

pub(crate) struct GraphInner {
    function_id: String,
    committed: AtomicBool,
    stage_count: AtomicU64,
    active_count: AtomicI64,
    nodes: DashMap<StageId, Node>,
    shared: Arc<EngineShared>,
}

impl Graph {
    pub(crate) fn new(function_id: String, shared: Arc<EngineShared>) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                function_id,
                committed: AtomicBool::new(false),
                stage_count: AtomicU64::new(0),
                active_count: AtomicI64::new(0),
                nodes: DashMap::new(),
                shared,
            }),
        }
    }

    /// Function owning this graph.
    pub fn function_id(&self) -> &str {
        &self.inner.function_id
    }

    /// Number of stages minted so far.
    pub fn stage_count(&self) -> u64 {
        self.inner.stage_count.load(Ordering::SeqCst)
    }

    /// Stages whose input has resolved but whose output has not.
    ///
    /// Advisory; reaches zero once no work remains scheduled.
    pub fn active_stages(&self) -> i64 {
        self.inner.active_count.load(Ordering::SeqCst)
    }

    /// Flip the one-shot committed flag; `true` only for the flip that won.
    pub fn commit(&self) -> bool {
        self.inner
            .committed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_committed(&self) -> bool {
        self.inner.committed.load(Ordering::SeqCst)
    }

    /// Look up a stage, if present.
    pub fn find_node(&self, id: &StageId) -> Option<Node> {
        self.inner.nodes.get(id).map(|entry| entry.value().clone())
    }

    pub(crate) fn node(&self, id: &StageId) -> Result<Node, PlatformError> {
        self.find_node(id)
            .ok_or_else(|| PlatformError::UnknownStage(id.clone()))
    }

    pub(crate) fn nodes_for(&self, ids: &[StageId]) -> Result<Vec<Node>, PlatformError> {
        ids.iter().map(|id| self.node(id)).collect()
    }

    /// Root stage running a closure with no inputs.
    pub fn supply(&self, closure: Blob) -> StageId {
        let invoke = self.inner.chain_invocation(closure);
        self.inner
            .spawn_stage("supply", GraphInner::empty_input(), invoke)
            .into_id()
    }

    /// Stage resolved from the start with the given value.
    pub fn completed_value(&self, value: Datum) -> StageId {
        let completion: Completion = Ok(StageResult::success(value));
        let invoke: InvokeFn =
            Box::new(move |_, _inputs| future::ready(completion).boxed());
        self.inner
            .spawn_stage("completed_value", GraphInner::empty_input(), invoke)
            .into_id()
    }

    /// Run a closure on the parent's success; parent failure passes through.
    pub fn then_apply(&self, parent: &StageId, closure: Blob) -> Result<StageId, PlatformError> {
        self.dependent_stage("then_apply", parent, closure)
    }

    /// Engine-level alias of [`Graph::then_apply`]; the closure consumes its input.
    pub fn then_accept(&self, parent: &StageId, closure: Blob) -> Result<StageId, PlatformError> {
        self.dependent_stage("then_accept", parent, closure)
    }

    /// Engine-level alias of [`Graph::then_apply`]; the closure takes no value.
    pub fn then_run(&self, parent: &StageId, closure: Blob) -> Result<StageId, PlatformError> {
        self.dependent_stage("then_run", parent, closure)
    }

    fn dependent_stage(
        &self,
        kind: &'static str,
        parent: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        let parent = self.node(parent)?;
        let invoke = self.inner.chain_invocation(closure);
        Ok(self
            .inner
            .spawn_stage(kind, GraphInner::single_input(&parent), invoke)
            .into_id())
    }

    /// Run a closure expected to return a stage reference, then adopt that
    /// stage's completion. Anything else is `invalid_stage_response`.
    pub fn then_compose(&self, parent: &StageId, closure: Blob) -> Result<StageId, PlatformError> {
        let parent = self.node(parent)?;
        let graph = Arc::clone(&self.inner);
        let chain = self.inner.chain_invocation(closure);
        let invoke: InvokeFn = Box::new(move |stage_id, inputs| {
            async move {
                let result = chain(stage_id, inputs).await?;
                match result {
                    StageResult::Success(Datum::StageRef { stage_id: target }) => {
                        let referenced = graph.nodes.get(&target).map(|n| n.value().clone());
                        match referenced {
                            Some(node) => node.output().wait().await,
                            None => Err(CompletionError::failure(
                                ErrorKind::InvalidStageResponse,
                                "returned stage not found",
                            )),
                        }
                    }
                    other => Err(CompletionError::failure(
                        ErrorKind::InvalidStageResponse,
                        format!("stage returned {other} instead of a stage reference"),
                    )),
                }
            }
            .boxed()
        });
        Ok(self
            .inner
            .spawn_stage("then_compose", GraphInner::single_input(&parent), invoke)
            .into_id())
    }

    /// Run a side-effect closure over the parent's outcome, then pass the
    /// parent's completion through untouched. The closure's own outcome is
    /// discarded and not awaited.
    pub fn when_complete(&self, parent: &StageId, closure: Blob) -> Result<StageId, PlatformError> {
        let parent = self.node(parent)?;
        let chain = self.inner.chain_invocation(closure);
        let runtime = self.inner.shared.runtime.clone();
        let passthrough = parent.output().clone();
        let invoke: InvokeFn = Box::new(move |stage_id, inputs| {
            runtime.spawn(chain(stage_id, inputs));
            passthrough.wait().boxed()
        });
        Ok(self
            .inner
            .spawn_stage("when_complete", GraphInner::handled_input(&parent), invoke)
            .into_id())
    }

    /// Run a closure over the parent's outcome in the two-slot shape; its
    /// result replaces the parent's, in either direction.
    pub fn handle(&self, parent: &StageId, closure: Blob) -> Result<StageId, PlatformError> {
        let parent = self.node(parent)?;
        let invoke = self.inner.chain_invocation(closure);
        Ok(self
            .inner
            .spawn_stage("handle", GraphInner::handled_input(&parent), invoke)
            .into_id())
    }

    /// Pass a success through; on failure run the closure with the failure
    /// result. A closure that itself fails re-raises the original failure.
    pub fn exceptionally(&self, parent: &StageId, closure: Blob) -> Result<StageId, PlatformError> {
        let parent = self.node(parent)?;
        let chain = self.inner.chain_invocation(closure);
        let invoke: InvokeFn = Box::new(move |stage_id, inputs| {
            async move {
                match inputs {
                    Ok(results) => results.into_iter().next().ok_or_else(|| {
                        CompletionError::Internal("parent input missing".into())
                    }),
                    Err(CompletionError::Faulted(result)) => {
                        let original = CompletionError::Faulted(result.clone());
                        match chain(stage_id, Ok(vec![result])).await {
                            Ok(recovered) => Ok(recovered),
                            Err(_) => Err(original),
                        }
                    }
                    Err(err @ CompletionError::Internal(_)) => Err(CompletionError::failure(
                        ErrorKind::UnknownError,
                        format!("unexpected fault: {err}"),
                    )),
                }
            }
            .boxed()
        });
        Ok(self
            .inner
            .spawn_stage("exceptionally", GraphInner::single_input(&parent), invoke)
            .into_id())
    }

    /// Run a closure on whichever parent resolves first, discarding its value.
    pub fn accept_either(
        &self,
        parent: &StageId,
        alternate: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        let first = self.node(parent)?;
        let second = self.node(alternate)?;
        let chain = self.inner.chain_invocation(closure);
        let invoke: InvokeFn = Box::new(move |stage_id, inputs| {
            chain(stage_id, inputs)
                .map(|completion| completion.map(StageResult::to_empty))
                .boxed()
        });
        Ok(self
            .inner
            .spawn_stage("accept_either", GraphInner::either_input(&first, &second), invoke)
            .into_id())
    }

    /// Run a closure on whichever parent resolves first.
    pub fn apply_to_either(
        &self,
        parent: &StageId,
        alternate: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        let first = self.node(parent)?;
        let second = self.node(alternate)?;
        let invoke = self.inner.chain_invocation(closure);
        Ok(self
            .inner
            .spawn_stage(
                "apply_to_either",
                GraphInner::either_input(&first, &second),
                invoke,
            )
            .into_id())
    }

    /// Run a closure over both parents' results once both resolve.
    pub fn then_combine(
        &self,
        parent: &StageId,
        alternate: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        let first = self.node(parent)?;
        let second = self.node(alternate)?;
        let invoke = self.inner.chain_invocation(closure);
        Ok(self
            .inner
            .spawn_stage(
                "then_combine",
                GraphInner::combined_input(&first, &second),
                invoke,
            )
            .into_id())
    }

    /// [`Graph::then_combine`] with the closure's value discarded.
    pub fn then_accept_both(
        &self,
        parent: &StageId,
        alternate: &StageId,
        closure: Blob,
    ) -> Result<StageId, PlatformError> {
        let first = self.node(parent)?;
        let second = self.node(alternate)?;
        let chain = self.inner.chain_invocation(closure);
        let invoke: InvokeFn = Box::new(move |stage_id, inputs| {
            chain(stage_id, inputs)
                .map(|completion| completion.map(StageResult::to_empty))
                .boxed()
        });
        Ok(self
            .inner
            .spawn_stage(
                "then_accept_both",
                GraphInner::combined_input(&first, &second),
                invoke,
            )
            .into_id())
    }

    /// Resolve to `Success(Empty)` once every listed stage succeeds, or to the
    /// first failure in list order. An empty list resolves immediately.
    pub fn all_of(&self, stage_ids: &[StageId]) -> Result<StageId, PlatformError> {
        let nodes = self.nodes_for(stage_ids)?;
        let waits: Vec<_> = nodes.iter().map(|node| node.output().wait()).collect();
        let invoke: InvokeFn = Box::new(move |_, inputs| {
            async move {
                inputs?;
                for completion in future::join_all(waits).await {
                    completion?;
                }
                Ok(StageResult::success(Datum::Empty))
            }
            .boxed()
        });
        Ok(self
            .inner
            .spawn_stage("all_of", GraphInner::empty_input(), invoke)
            .into_id())
    }

    /// Adopt the completion of whichever listed stage resolves first, failure
    /// included. An empty list is rejected at registration.
    pub fn any_of(&self, stage_ids: &[StageId]) -> Result<StageId, PlatformError> {
        if stage_ids.is_empty() {
            return Err(PlatformError::EmptyCompletionList);
        }
        let nodes = self.nodes_for(stage_ids)?;
        let waits: Vec<_> = nodes.iter().map(|node| node.output().wait()).collect();
        let invoke: InvokeFn = Box::new(move |_, inputs| {
            async move {
                inputs?;
                let (winner, _, _) = future::select_all(waits).await;
                winner
            }
            .boxed()
        });
        Ok(self
            .inner
            .spawn_stage("any_of", GraphInner::empty_input(), invoke)
            .into_id())
    }

    /// Resolve to `Success(Empty)` after the given duration.
    pub fn delay(&self, delay: Duration) -> StageId {
        let invoke: InvokeFn = Box::new(move |_, inputs| {
            async move {
                inputs?;
                tokio::time::sleep(delay).await;
                Ok(StageResult::success(Datum::Empty))
            }
            .boxed()
        });
        self.inner
            .spawn_stage("delay", GraphInner::empty_input(), invoke)
            .into_id()
    }

    /// Dispatch an ordinary function invocation to the function invoker.
    pub fn invoke_function(
        &self,
        function_id: impl Into<String>,
        method: HttpMethod,
        headers: Headers,
        body: Vec<u8>,
    ) -> StageId {
        let shared = Arc::clone(&self.inner.shared);
        let function_id = function_id.into();
        let invoke: InvokeFn = Box::new(move |_, inputs| {
            async move {
                inputs?;
                shared
                    .function_invoker
                    .invoke_function(&function_id, method, headers, body)
                    .await
            }
            .boxed()
        });
        self.inner
            .spawn_stage("invoke_function", GraphInner::empty_input(), invoke)
            .into_id()
    }

    /// Stage resolved by an out-of-band actor through the returned writer.
    pub fn external(&self) -> (StageId, CompletionWriter) {
        let (cell, writer) = CompletionCell::new();
        let invoke: InvokeFn = Box::new(move |_, _inputs| cell.wait().boxed());
        let id = self
            .inner
            .spawn_stage("external", GraphInner::empty_input(), invoke)
            .into_id();
        (id, writer)
    }
}

impl GraphInner {
    fn next_stage_id(&self) -> StageId {
        StageId::from_index(self.stage_count.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Wire a new stage: mint an id, spawn the driver task, insert the node.
    ///
    /// The node enters the map only after its output cell exists, so
    /// concurrent readers see either "absent" or "present and live".
    fn spawn_stage(
        self: &Arc<Self>,
        kind: &'static str,
        input: InputFuture,
        invoke: InvokeFn,
    ) -> Node {
        let (cell, writer) = CompletionCell::new();
        let node = Node {
            id: self.next_stage_id(),
            output: cell,
        };

        metrics::counter!("skein.engine.stages_created_total", "kind" => kind).increment(1);

        let graph = Arc::clone(self);
        let stage = node.id().clone();
        self.shared.runtime.spawn(async move {
            let inputs = input.await;
            graph.active_count.fetch_add(1, Ordering::SeqCst);
            metrics::gauge!("skein.engine.active_stages").increment(1.0);
            trace!(stage = %stage, kind, "stage inputs resolved");

            let completion = invoke(stage.clone(), inputs).await;

            graph.active_count.fetch_sub(1, Ordering::SeqCst);
            metrics::gauge!("skein.engine.active_stages").decrement(1.0);
            if completion.is_err() {
                metrics::counter!("skein.engine.stage_failures_total", "kind" => kind)
                    .increment(1);
            }
            trace!(stage = %stage, kind, "stage resolved");
            writer.resolve(completion);
        });

        self.nodes.insert(node.id().clone(), node.clone());
        node
    }

    /// Forward the resolved inputs to the stage invoker.
    fn chain_invocation(self: &Arc<Self>, closure: Blob) -> InvokeFn {
        let shared = Arc::clone(&self.shared);
        let function_id = self.function_id.clone();
        Box::new(move |stage_id, inputs| {
            async move {
                let inputs = inputs?;
                shared
                    .stage_invoker
                    .invoke_stage(&function_id, stage_id, closure, inputs)
                    .await
            }
            .boxed()
        })
    }

    fn empty_input() -> InputFuture {
        future::ready(Ok(Vec::new())).boxed()
    }

    /// `[parent result]`; fails when the parent failed.
    fn single_input(parent: &Node) -> InputFuture {
        parent
            .output()
            .wait()
            .map(|completion| completion.map(|result| vec![result]))
            .boxed()
    }

    /// Two-slot shape: `[result, Empty]` on success, `[Empty, failure]` on
    /// failure. Never fails itself.
    fn handled_input(parent: &Node) -> InputFuture {
        parent
            .output()
            .wait()
            .map(|completion| match completion {
                Ok(result) => Ok(vec![result, StageResult::success(Datum::Empty)]),
                Err(err) => Ok(vec![StageResult::success(Datum::Empty), err.to_result()]),
            })
            .boxed()
    }

    /// `[first, second]` once both resolve; either failure propagates.
    fn combined_input(first: &Node, second: &Node) -> InputFuture {
        let fa = first.output().wait();
        let fb = second.output().wait();
        async move {
            let (a, b) = future::try_join(fa, fb).await?;
            Ok(vec![a, b])
        }
        .boxed()
    }

    /// `[winner]` from whichever parent resolves first, failure included.
    fn either_input(first: &Node, second: &Node) -> InputFuture {
        let fa = first.output().wait();
        let fb = second.output().wait();
        async move {
            let winner = match future::select(fa, fb).await {
                Either::Left((completion, _)) | Either::Right((completion, _)) => completion,
            };
            winner.map(|result| vec![result])
        }
        .boxed()
    }
}
