//! Events and handler entries.
//!
//! Event names are namespaced strings (`<aspect>:<event>`). Dispatch is
//! name-keyed: `handle` collects `handler`-kind memory entries matching the
//! name (priority order), then walks the block stack top-first giving each
//! block's behaviors a look. Handlers return actions; they never mutate the
//! runtime directly.

use crate::runtime::VmCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::OwnerKey;
use crate::action::Action;

/// Well-known event names.
pub mod names {
    pub const TIMER_TICK: &str = "timer:tick";
    pub const TIMER_COMPLETE: &str = "timer:complete";
    pub const ROUND_START: &str = "round:start";
    pub const RUNTIME_NEXT: &str = "runtime:next";
    pub const RUNTIME_PAUSE: &str = "runtime:pause";
    pub const RUNTIME_RESUME: &str = "runtime:resume";
    pub const RUNTIME_COMPLETE: &str = "runtime:complete";
    pub const RUNTIME_ERROR: &str = "runtime:error";
    pub const SOUND_CUE: &str = "sound:cue";
    pub const WORKOUT_START: &str = "workout:start";
    pub const WORKOUT_COMPLETE: &str = "workout:complete";
    pub const SEGMENT_START: &str = "segment:start";
    pub const SEGMENT_COMPLETE: &str = "segment:complete";
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventPayload {
    #[default]
    None,
    Tick {
        elapsed_ms: u64,
    },
    Sound {
        cue: String,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    pub name: String,
    /// Epoch-ms at which the event was observed (clock time).
    pub at: u64,
    #[serde(default)]
    pub payload: EventPayload,
}

impl RuntimeEvent {
    pub fn new(name: impl Into<String>, at: u64) -> Self {
        Self {
            name: name.into(),
            at,
            payload: EventPayload::None,
        }
    }

    pub fn with_payload(name: impl Into<String>, at: u64, payload: EventPayload) -> Self {
        Self {
            name: name.into(),
            at,
            payload,
        }
    }

    pub fn tick(at: u64, elapsed_ms: u64) -> Self {
        Self::with_payload(names::TIMER_TICK, at, EventPayload::Tick { elapsed_ms })
    }

    /// Elapsed-ms payload for tick events, if present.
    pub fn elapsed_ms(&self) -> Option<u64> {
        match self.payload {
            EventPayload::Tick { elapsed_ms } => Some(elapsed_ms),
            _ => None,
        }
    }
}

/// Read-only handler callback: inspects the event and runtime state,
/// returns follow-up actions for the action queue.
pub type HandlerFn = Arc<dyn Fn(&RuntimeEvent, &VmCore) -> Vec<Action> + Send + Sync>;

/// A registered event handler, stored as a `handler`-kind memory entry so
/// its lifetime is tied to its owner's disposal.
#[derive(Clone)]
pub struct HandlerEntry {
    pub id: u64,
    pub event: String,
    pub owner: OwnerKey,
    /// Higher runs first; ties break by insertion order (id).
    pub priority: i32,
    pub callback: HandlerFn,
}

impl HandlerEntry {
    pub fn new(id: u64, event: impl Into<String>, owner: OwnerKey, priority: i32, callback: HandlerFn) -> Self {
        Self {
            id,
            event: event.into(),
            owner,
            priority,
            callback,
        }
    }
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
