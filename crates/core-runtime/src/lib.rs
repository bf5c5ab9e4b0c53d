//! Execution substrate for compiled workouts: memory arena, block stack,
//! clock, execution log, event bus and the action queue tying them
//! together.
//!
//! Ownership is arena-shaped throughout. `Memory` owns every entry;
//! behaviors hold `MemoryRef`s (index + generation), never pointers. The
//! stack owns blocks; anything that needs to reach a block does so through
//! its `BlockKey` and memory search. The `ScriptRuntime` owns all of it and
//! is threaded through calls as a parameter, so there is no global state.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod action;
pub mod block;
pub mod clock;
pub mod error;
pub mod event;
pub mod memory;
pub mod runtime;
pub mod span;
pub mod stack;

pub use action::Action;
pub use block::{
    Behavior, BehaviorContext, Block, BlockCompiler, BlockContext, CompilationContext,
    CompileError, TimerDirection,
};
pub use clock::RuntimeClock;
pub use error::{RuntimeError, RuntimeErrorEntry};
pub use event::{EventPayload, HandlerEntry, HandlerFn, RuntimeEvent, names};
pub use memory::{
    ChangeKind, CompletionStatus, ControlButtons, DisplayEntry, Memory, MemoryChange, MemoryEntry,
    MemoryError, MemoryId, MemoryKind, MemoryPayload, MemoryRef, MemoryValue, RoundState,
    SearchCriteria, SubscriberFn, SubscriptionId, TimerRole, Visibility,
};
pub use runtime::{RuntimeCommand, ScriptRuntime, VmCore, WorkoutState};
pub use span::{ExecutionLog, ExecutionSpan, LoopSnapshot, SpanDetail, SpanId, SpanStatus};
pub use stack::BlockStack;

/// Stable identifier for one runtime block instance. Distinct across
/// pushes: recompiling the same statement mints a fresh key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockKey(String);

impl BlockKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BlockKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for BlockKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who owns a memory entry: a block (by key) or the runtime itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerKey {
    Runtime,
    Block(BlockKey),
}

impl OwnerKey {
    pub fn block_key(&self) -> Option<&BlockKey> {
        match self {
            OwnerKey::Runtime => None,
            OwnerKey::Block(key) => Some(key),
        }
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerKey::Runtime => f.write_str("runtime"),
            OwnerKey::Block(key) => write!(f, "{key}"),
        }
    }
}

impl Serialize for OwnerKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
