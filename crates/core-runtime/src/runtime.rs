//! The runtime: core state (memory, clock, log, errors) plus the block
//! stack and the action queue that drives every mutation.
//!
//! Control flow is single-threaded cooperative. External input enters
//! through `handle`, `tick` or `dispatch`; handlers and behaviors return
//! actions; the queue drains them depth-first to a fixed point before
//! control returns to the caller. Re-entrant handling is impossible by
//! construction: nothing inside `execute` drains the queue.

use crate::action::Action;
use crate::block::{Block, BlockCompiler};
use crate::clock::RuntimeClock;
use crate::error::{RuntimeError, RuntimeErrorEntry};
use crate::event::{RuntimeEvent, names};
use crate::memory::{CompletionStatus, Memory, MemoryKind, Visibility};
use crate::span::{ExecutionLog, SpanStatus};
use crate::stack::BlockStack;
use crate::{BlockKey, OwnerKey};
use core_fragment::TimeSpan;
use core_script::Script;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Hard bound on actions per drained batch; a loop that exceeds it is a
/// defect and aborts with an invariant error rather than spinning.
const MAX_ACTIONS_PER_BATCH: usize = 100_000;

/// Bound on settle iterations (completion-driven pops per external call).
const MAX_SETTLE_POPS: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkoutState {
    Idle,
    Running,
    Paused,
    Complete,
}

/// Serializable UI intent; the runtime maps these onto events and actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuntimeCommand {
    Start,
    Pause,
    Resume,
    Next,
    Reset,
    Complete,
}

/// Everything behaviors may reach during a hook: the arena, the clock, the
/// execution log, accumulated errors, the script and the compiler seam.
/// The block stack deliberately lives outside so a stacked block can run
/// hooks against the rest of the runtime without aliasing.
pub struct VmCore {
    pub memory: Memory,
    pub clock: RuntimeClock,
    pub log: ExecutionLog,
    pub errors: Vec<RuntimeErrorEntry>,
    pub script: Arc<Script>,
    pub compiler: Option<Arc<dyn BlockCompiler>>,
    pub state: WorkoutState,
    next_handler_id: u64,
    next_block_key: u64,
}

impl VmCore {
    pub fn new(script: Arc<Script>, compiler: Option<Arc<dyn BlockCompiler>>) -> Self {
        Self {
            memory: Memory::new(),
            clock: RuntimeClock::new(),
            log: ExecutionLog::new(),
            errors: Vec::new(),
            script,
            compiler,
            state: WorkoutState::Idle,
            next_handler_id: 0,
            next_block_key: 0,
        }
    }

    /// Mint a unique handler id (handler entries sort by priority, then by
    /// this insertion order).
    pub fn mint_handler_id(&mut self) -> u64 {
        self.next_handler_id += 1;
        self.next_handler_id
    }

    /// Mint a block key: stable, unique per push, never reused even when
    /// the same statement recompiles.
    pub fn mint_block_key(&mut self, kind: &str) -> BlockKey {
        self.next_block_key += 1;
        BlockKey::from(format!("{kind}-{}", self.next_block_key))
    }

    pub fn record_error(&mut self, error: RuntimeError, context: &str, block: Option<BlockKey>) {
        let at = self.clock.now();
        error!(target: "runtime", %error, context, "runtime error");
        self.log
            .timestamp("error", error.to_string(), at, block.clone());
        self.errors
            .push(RuntimeErrorEntry::new(at, error, context, block));
    }
}

pub struct ScriptRuntime {
    pub core: VmCore,
    stack: BlockStack,
    queue: VecDeque<Action>,
}

impl ScriptRuntime {
    pub fn new(script: Script, compiler: Arc<dyn BlockCompiler>) -> Self {
        Self {
            core: VmCore::new(Arc::new(script), Some(compiler)),
            stack: BlockStack::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn stack(&self) -> &BlockStack {
        &self.stack
    }

    pub fn state(&self) -> WorkoutState {
        self.core.state
    }

    pub fn is_complete(&self) -> bool {
        self.core.state == WorkoutState::Complete
    }

    /// Compile the root block and begin the workout. Only valid from idle.
    pub fn start(&mut self, now: u64) {
        if self.core.state != WorkoutState::Idle {
            warn!(target: "runtime", state = ?self.core.state, "start ignored");
            return;
        }
        let Some(compiler) = self.core.compiler.clone() else {
            self.core.record_error(
                RuntimeError::Compile("no compiler attached".into()),
                "start",
                None,
            );
            return;
        };
        info!(target: "runtime", now, "workout starting");
        self.core.clock.start(now);
        self.core.state = WorkoutState::Running;
        self.queue
            .push_back(Action::timestamp(names::WORKOUT_START, "workout"));
        match compiler.compile_root(&mut self.core) {
            Ok(root) => self.queue.push_back(Action::Push(root)),
            Err(err) => {
                let message = err.to_string();
                self.queue
                    .push_back(Action::Error(RuntimeError::Compile(message)));
            }
        }
        self.drain();
        self.settle();
    }

    /// External tick: advance the clock and, while running, emit
    /// `timer:tick` with the current elapsed-ms.
    pub fn tick(&mut self, now: u64) {
        let elapsed = self.core.clock.advance_to(now);
        if self.core.state != WorkoutState::Running {
            return;
        }
        self.handle(RuntimeEvent::tick(self.core.clock.now(), elapsed));
    }

    /// Dispatch one external event: handlers first (priority order), then
    /// the block stack top-first, then drain all induced actions.
    pub fn handle(&mut self, event: RuntimeEvent) {
        trace!(target: "runtime.events", name = %event.name, "handle");
        let actions = self.dispatch_event(&event);
        self.queue.extend(actions);
        self.drain();
        self.settle();
    }

    /// Map a UI command onto events and actions.
    pub fn dispatch(&mut self, command: RuntimeCommand, now: u64) {
        debug!(target: "runtime.events", ?command, "dispatch");
        match command {
            RuntimeCommand::Start => self.start(now),
            RuntimeCommand::Pause => {
                if self.core.state != WorkoutState::Running {
                    return;
                }
                self.core.state = WorkoutState::Paused;
                self.core.clock.stop(now);
                self.core
                    .log
                    .timestamp(names::RUNTIME_PAUSE, "pause", now, self.current_key());
                self.handle(RuntimeEvent::new(names::RUNTIME_PAUSE, now));
            }
            RuntimeCommand::Resume => {
                if self.core.state != WorkoutState::Paused {
                    return;
                }
                self.core.state = WorkoutState::Running;
                self.core.clock.start(now);
                self.core
                    .log
                    .timestamp(names::RUNTIME_RESUME, "resume", now, self.current_key());
                self.handle(RuntimeEvent::new(names::RUNTIME_RESUME, now));
            }
            RuntimeCommand::Next => {
                self.core.clock.advance_to(now);
                if self.core.state == WorkoutState::Running {
                    self.handle(RuntimeEvent::new(names::RUNTIME_NEXT, now));
                }
            }
            RuntimeCommand::Reset => self.reset(now),
            RuntimeCommand::Complete => {
                self.core.clock.advance_to(now);
                if self.core.state == WorkoutState::Paused {
                    self.core.state = WorkoutState::Running;
                    self.core.clock.start(now);
                }
                let refs: Vec<_> = self.stack.iter().map(|b| b.completion).collect();
                for r in refs {
                    let _ = self.core.memory.set(r, CompletionStatus::Complete, &OwnerKey::Runtime);
                }
                self.settle();
            }
        }
    }

    /// Tear everything down and return to idle. Blocks still unmount and
    /// dispose so no handler or ref outlives its owner.
    fn reset(&mut self, now: u64) {
        info!(target: "runtime", "reset");
        self.queue.clear();
        self.core.state = WorkoutState::Idle;
        while let Some(mut block) = self.stack.pop() {
            // Unmount actions are dropped deliberately: nothing should run
            // against a workout that is being discarded.
            let _ = block.unmount(&mut self.core);
            if let Some(span) = block.span_id {
                self.core.log.close(span, now, SpanStatus::Errored);
            }
            block.dispose(&mut self.core);
        }
        self.core.clock.stop(now);
    }

    fn current_key(&self) -> Option<BlockKey> {
        self.stack.current().map(|b| b.key.clone())
    }

    fn block_complete(&self, block: &Block) -> bool {
        matches!(
            self.core.memory.get(block.completion),
            Ok(CompletionStatus::Complete)
        )
    }

    /// Pop completed blocks (anywhere in the stack: an expired time-bound
    /// loop completes underneath its running child) until none remain.
    fn settle(&mut self) {
        let mut pops = 0usize;
        loop {
            let any_complete = self.stack.iter().any(|b| self.block_complete(b));
            if !any_complete {
                break;
            }
            pops += 1;
            if pops > MAX_SETTLE_POPS {
                self.core.record_error(
                    RuntimeError::Invariant("settle loop exceeded pop bound".into()),
                    "settle",
                    self.current_key(),
                );
                break;
            }
            self.queue.push_back(Action::Pop);
            self.drain();
        }
    }

    fn dispatch_event(&mut self, event: &RuntimeEvent) -> Vec<Action> {
        let mut out = Vec::new();

        // Registered handler entries, priority order. A handler returning
        // an Error action cancels the rest of the dispatch for this event.
        for handler in self.core.memory.handlers_for(&event.name) {
            let actions = (handler.callback)(event, &self.core);
            let errored = actions.iter().any(|a| matches!(a, Action::Error(_)));
            out.extend(actions);
            if errored {
                warn!(target: "runtime.events", name = %event.name, "handler cancelled event dispatch");
                return out;
            }
        }

        // Stack walk, top-first: every mounted block's behaviors see the
        // event.
        let core = &mut self.core;
        for block in self.stack.iter_mut() {
            out.extend(block.handle_event(event, core));
        }
        out
    }

    /// Drain the action queue to a fixed point. Follow-up actions prepend
    /// (depth-first); a recorded error skips the remainder of the batch.
    fn drain(&mut self) {
        let error_floor = self.core.errors.len();
        let mut executed = 0usize;
        while let Some(action) = self.queue.pop_front() {
            if self.core.errors.len() > error_floor {
                warn!(
                    target: "runtime",
                    dropped = self.queue.len() + 1,
                    "action batch aborted after error"
                );
                self.queue.clear();
                break;
            }
            executed += 1;
            if executed > MAX_ACTIONS_PER_BATCH {
                self.core.record_error(
                    RuntimeError::Invariant("action batch exceeded execution bound".into()),
                    "drain",
                    self.current_key(),
                );
                self.queue.clear();
                break;
            }
            trace!(target: "runtime", action = action.tag(), "execute");
            let follow_ups = self.execute(action);
            for action in follow_ups.into_iter().rev() {
                self.queue.push_front(action);
            }
        }
    }

    fn execute(&mut self, action: Action) -> Vec<Action> {
        let now = self.core.clock.now();
        match action {
            Action::Push(mut block) => {
                let span = self.core.log.open(
                    block.key.clone(),
                    block.label.clone(),
                    block.source_ids.clone(),
                    now,
                    block.container,
                );
                block.span_id = Some(span);
                self.stack.push(block);
                let core = &mut self.core;
                let top = self
                    .stack
                    .current_mut()
                    .expect("block was just pushed");
                top.mount(core)
            }
            Action::Pop => {
                let Some(mut block) = self.stack.pop() else {
                    warn!(target: "runtime", "pop on empty stack ignored");
                    return Vec::new();
                };
                let mut follow_ups = block.unmount(&mut self.core);
                if let Some(span) = block.span_id {
                    self.core.log.close(span, now, SpanStatus::Completed);
                }
                follow_ups.push(Action::Finalize(block));
                if self.stack.is_empty() {
                    if self.core.state == WorkoutState::Running {
                        self.core.state = WorkoutState::Complete;
                        self.core.clock.stop(now);
                        info!(target: "runtime", now, "workout complete");
                        follow_ups.push(Action::timestamp("completion", "workout"));
                        follow_ups.push(Action::EmitEvent(RuntimeEvent::new(
                            names::WORKOUT_COMPLETE,
                            now,
                        )));
                    }
                } else if self.core.state == WorkoutState::Running {
                    // A parent that is itself already complete gets popped
                    // by settle next; advancing it would spawn dead work.
                    let parent_complete = self
                        .stack
                        .current()
                        .is_some_and(|b| self.block_complete(b));
                    if !parent_complete {
                        let core = &mut self.core;
                        let top = self
                            .stack
                            .current_mut()
                            .expect("stack checked non-empty");
                        follow_ups.extend(top.next(core));
                    }
                }
                follow_ups
            }
            Action::EmitEvent(event) => self.dispatch_event(&event),
            Action::EmitMetric(metrics) => {
                self.core.log.append_metric(metrics, now);
                Vec::new()
            }
            Action::StartTimer(r) => {
                match self.core.memory.get(r) {
                    Ok(mut spans) => {
                        if spans.last().is_none_or(|s: &TimeSpan| !s.is_open()) {
                            spans.push(TimeSpan::open(now));
                            let _ = self.core.memory.set(r, spans, &OwnerKey::Runtime);
                        }
                    }
                    Err(err) => {
                        warn!(target: "runtime", %err, "start-timer through dead ref ignored");
                    }
                }
                Vec::new()
            }
            Action::StopTimer(r) => {
                match self.core.memory.get(r) {
                    Ok(mut spans) => {
                        if let Some(open) = spans.last_mut().filter(|s| s.is_open()) {
                            open.ended = Some(now.max(open.started));
                            let _ = self.core.memory.set(r, spans, &OwnerKey::Runtime);
                        }
                    }
                    Err(err) => {
                        warn!(target: "runtime", %err, "stop-timer through dead ref ignored");
                    }
                }
                Vec::new()
            }
            Action::RegisterHandler(handler) => {
                let owner = handler.owner.clone();
                self.core.memory.allocate(
                    MemoryKind::Handler,
                    owner,
                    handler,
                    Visibility::Public,
                );
                Vec::new()
            }
            Action::UnregisterHandler(id) => {
                self.core.memory.release_handler(id);
                Vec::new()
            }
            Action::CreateTimestamp { kind, label } => {
                self.core.log.timestamp(kind, label, now, self.current_key());
                Vec::new()
            }
            Action::Error(error) => {
                self.core.record_error(error, "action", self.current_key());
                Vec::new()
            }
            Action::Finalize(mut block) => {
                block.dispose(&mut self.core);
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("state", &self.core.state)
            .field("stack_depth", &self.stack.len())
            .field("queued_actions", &self.queue.len())
            .field("errors", &self.core.errors.len())
            .finish()
    }
}
