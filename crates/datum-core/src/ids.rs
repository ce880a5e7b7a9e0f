use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier for one cloud thread (one isolated dataflow graph).
///
/// Allocated by the completer; textual form is `thread-<N>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    /// Construct a thread id from its textual form.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive the id for the `index`-th thread allocated by a completer.
    pub fn from_index(index: u64) -> Self {
        Self(format!("thread-{index}"))
    }

    /// Access the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for one stage within a graph.
///
/// Minted by the graph as a monotonic decimal counter starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct StageId(pub String);

impl StageId {
    /// Construct a stage id from its textual form.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive the id for the `index`-th stage minted by a graph.
    pub fn from_index(index: u64) -> Self {
        Self(index.to_string())
    }

    /// Access the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
