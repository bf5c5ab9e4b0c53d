//! Runtime error taxonomy.
//!
//! Errors never cross component boundaries as panics or `?` chains: they
//! are appended to `runtime.errors` (which aborts the current action batch)
//! and mirrored into the execution log as `error` timestamps.

use crate::BlockKey;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "kebab-case")]
pub enum RuntimeError {
    #[error("behavior error: {0}")]
    Behavior(String),
    #[error("action failed: {0}")]
    Action(String),
    #[error("compile error: {0}")]
    Compile(String),
    #[error("resource error: {0}")]
    Resource(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// One recorded runtime failure with its context label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeErrorEntry {
    pub at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockKey>,
    pub context: String,
    pub error: RuntimeError,
}

impl RuntimeErrorEntry {
    pub fn new(at: u64, error: RuntimeError, context: impl Into<String>, block: Option<BlockKey>) -> Self {
        Self {
            at,
            block,
            context: context.into(),
            error,
        }
    }
}
