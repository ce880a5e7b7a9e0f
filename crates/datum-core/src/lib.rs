//! Core value types and collaborator traits for the Skein in-process completer.
//!
//! Everything that travels along a graph edge lives here: the tagged [`Datum`]
//! payloads, the [`StageResult`] token, the [`Completion`] channel with its
//! failure sentinel, and the async traits the engine uses to reach its stage
//! and function invoker collaborators.

mod datum;
mod http;
mod ids;
mod invoke;
mod result;

pub use datum::{Blob, Datum, ErrorDatum, ErrorKind};
pub use http::{Headers, HttpMethod};
pub use ids::{StageId, ThreadId};
pub use invoke::{FunctionInvoker, StageInvoker};
pub use result::{Completion, CompletionError, StageResult};

/// Convenient prelude re-exporting the most commonly used items.
pub mod prelude {
    pub use crate::datum::{Blob, Datum, ErrorDatum, ErrorKind};
    pub use crate::http::{Headers, HttpMethod};
    pub use crate::ids::{StageId, ThreadId};
    pub use crate::invoke::{FunctionInvoker, StageInvoker};
    pub use crate::result::{Completion, CompletionError, StageResult};
}
