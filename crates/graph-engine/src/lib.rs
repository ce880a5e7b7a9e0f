//! Dataflow graph engine for the Skein in-process completer.
//!
//! A [`Completer`] owns one [`Graph`] per cloud thread. Each combinator mints
//! a fresh stage whose input future is wired to its parents' output cells and
//! whose driver task runs on the injected Tokio runtime. Failures travel as
//! data on the error channel of every [`CompletionCell`] so that dependent
//! stages short-circuit and the catching combinators can recover them.

mod cell;
mod completer;
mod error;
mod graph;
mod rendezvous;

pub use cell::{CompletionCell, CompletionFuture, CompletionWriter};
pub use completer::{Completer, CompleterBuilder};
pub use error::{PlatformError, WaitError};
pub use graph::{Graph, Node};
pub use rendezvous::{CompletionUris, ExternalCompletion, ExternalRendezvous};
