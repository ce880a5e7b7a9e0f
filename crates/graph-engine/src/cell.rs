use datum_core::{Completion, CompletionError, ErrorKind};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;

/// Future type observers obtain from a [`CompletionCell`].
pub type CompletionFuture = Shared<BoxFuture<'static, Completion>>;

/// One-shot, multi-observer slot holding a stage's completion.
///
/// Resolves at most once; every observer sees the identical completion no
/// matter how late it starts waiting. If the writer is dropped without
/// resolving, observers see a `stage_lost` failure.
#[derive(Clone)]
pub struct CompletionCell {
    shared: CompletionFuture,
}

impl CompletionCell {
    /// Create an unresolved cell and the writer that resolves it.
    pub fn new() -> (Self, CompletionWriter) {
        let (tx, rx) = oneshot::channel();
        let shared = rx
            .map(|received| match received {
                Ok(completion) => completion,
                Err(_) => Err(CompletionError::failure(
                    ErrorKind::StageLost,
                    "completion abandoned before resolution",
                )),
            })
            .boxed()
            .shared();
        (Self { shared }, CompletionWriter { tx })
    }

    /// Cell that is resolved from the start.
    pub fn resolved(completion: Completion) -> Self {
        Self {
            shared: futures::future::ready(completion).boxed().shared(),
        }
    }

    /// Obtain a future for the completion; may be awaited any number of times.
    pub fn wait(&self) -> CompletionFuture {
        self.shared.clone()
    }

    /// The completion, when already resolved and observed at least once.
    pub fn peek(&self) -> Option<Completion> {
        self.shared.peek().cloned()
    }
}

/// Resolves a [`CompletionCell`] exactly once.
pub struct CompletionWriter {
    tx: oneshot::Sender<Completion>,
}

impl CompletionWriter {
    /// Resolve the cell. Returns `false` when every observer is gone.
    pub fn resolve(self, completion: Completion) -> bool {
        self.tx.send(completion).is_ok()
    }
}
