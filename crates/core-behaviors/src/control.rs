//! Gesture-driven completion.

use core_runtime::{Action, Behavior, BehaviorContext, CompletionStatus, MemoryRef, RuntimeEvent};
use tracing::debug;

/// Marks the block complete when a named event fires while the block is on
/// the stack. Effort blocks use this with `runtime:next` so a user gesture
/// finishes the current movement.
pub struct PopOnEvent {
    event: String,
    completion: MemoryRef<CompletionStatus>,
}

impl PopOnEvent {
    pub fn new(event: impl Into<String>, completion: MemoryRef<CompletionStatus>) -> Self {
        Self {
            event: event.into(),
            completion,
        }
    }
}

impl Behavior for PopOnEvent {
    fn name(&self) -> &'static str {
        "pop-on-event"
    }

    fn on_event(&mut self, event: &RuntimeEvent, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if event.name == self.event
            && ctx.get(self.completion) == Some(CompletionStatus::InProgress)
        {
            debug!(target: "runtime.events", block = %ctx.key, event = %self.event, "pop requested");
            ctx.set(self.completion, CompletionStatus::Complete);
        }
        Vec::new()
    }
}
