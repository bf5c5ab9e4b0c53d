//! Blocks, behaviors, and the compiler seam.
//!
//! A block is a key, a memory context and an ordered behavior list. The
//! lifecycle protocol is total: construct (memory already allocated) ->
//! push -> `mount` -> zero or more `next` -> pop -> `unmount` -> `dispose`.
//! Hooks aggregate each behavior's actions in registration order; behaviors
//! talk to each other only through memory refs and events.

use crate::clock::RuntimeClock;
use crate::memory::{
    CompletionStatus, Memory, MemoryId, MemoryKind, MemoryPayload, MemoryRef, SearchCriteria,
    Visibility,
};
use crate::runtime::VmCore;
use crate::span::SpanId;
use crate::{BlockKey, OwnerKey};
use crate::action::Action;
use crate::event::RuntimeEvent;
use core_script::StatementId;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Counting direction for a block's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerDirection {
    Up,
    Down,
}

/// Context a parent passes into child compilation: the loop's current
/// counters and any per-round overrides (rep scheme entries, interval
/// duration, timer direction).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompilationContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reps: Option<u32>,
    /// 1-based round the child runs in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rounds: Option<u32>,
    /// Child-group position within the round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<TimerDirection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("no strategy matched statements {0:?}")]
    NoStrategy(Vec<StatementId>),
    #[error("statement {0:?} does not exist in the script")]
    UnknownStatement(StatementId),
    #[error("nothing to compile")]
    EmptyInput,
}

/// The seam between the runtime and the strategy-dispatched compiler. The
/// runtime holds this as a shared trait object so `ChildRunner` can compile
/// child groups mid-run without a crate cycle.
pub trait BlockCompiler: Send + Sync {
    /// Compile one child group (statement ids) under a parent context.
    fn compile_ids(
        &self,
        ids: &[StatementId],
        vm: &mut VmCore,
        context: &CompilationContext,
    ) -> Result<Block, CompileError>;

    /// Compile the script's root container block.
    fn compile_root(&self, vm: &mut VmCore) -> Result<Block, CompileError>;
}

/// Owns every memory ref allocated for one block. Created by the strategy
/// before the block exists; released exactly once at dispose.
#[derive(Debug)]
pub struct BlockContext {
    key: BlockKey,
    refs: Vec<MemoryId>,
}

impl BlockContext {
    pub fn new(key: BlockKey) -> Self {
        Self {
            key,
            refs: Vec::new(),
        }
    }

    pub fn key(&self) -> &BlockKey {
        &self.key
    }

    pub fn owner(&self) -> OwnerKey {
        OwnerKey::Block(self.key.clone())
    }

    /// Allocate an entry owned by this block and remember the ref for
    /// disposal.
    pub fn allocate<T: MemoryPayload>(
        &mut self,
        memory: &mut Memory,
        kind: MemoryKind,
        initial: T,
        visibility: Visibility,
    ) -> MemoryRef<T> {
        let r = memory.allocate(kind, self.owner(), initial, visibility);
        self.refs.push(r.id());
        r
    }

    pub fn refs(&self) -> &[MemoryId] {
        &self.refs
    }

    /// Release every ref this context allocated. Returns how many were
    /// still live.
    pub fn release(&self, memory: &mut Memory) -> usize {
        self.refs.iter().filter(|&&id| memory.release(id)).count()
    }
}

/// Hook surface a behavior may implement. Every hook receives the behavior
/// context and returns follow-up actions (dispose returns nothing; it must
/// not schedule work).
#[allow(unused_variables)]
pub trait Behavior: Send {
    fn name(&self) -> &'static str;

    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        Vec::new()
    }

    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        Vec::new()
    }

    fn on_unmount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        Vec::new()
    }

    fn on_dispose(&mut self, ctx: &mut BehaviorContext<'_>) {}

    fn on_event(&mut self, event: &RuntimeEvent, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        Vec::new()
    }
}

/// Per-hook view handed to behaviors: the runtime core plus the owning
/// block's identity. Memory writes go through `set`, which enforces the
/// owner check and downgrades ref failures to logged resource errors.
pub struct BehaviorContext<'a> {
    pub vm: &'a mut VmCore,
    pub key: BlockKey,
    pub span_id: Option<SpanId>,
    pub source_ids: &'a [StatementId],
    pub label: &'a str,
}

impl BehaviorContext<'_> {
    pub fn now(&self) -> u64 {
        self.vm.clock.now()
    }

    pub fn clock(&self) -> &RuntimeClock {
        &self.vm.clock
    }

    pub fn owner(&self) -> OwnerKey {
        OwnerKey::Block(self.key.clone())
    }

    /// Read a ref; a stale ref logs and reads as `None` (resource errors
    /// never abort a batch).
    pub fn get<T: MemoryPayload>(&self, r: MemoryRef<T>) -> Option<T> {
        match self.vm.memory.get(r) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(target: "runtime.memory", block = %self.key, %err, "read through dead ref");
                None
            }
        }
    }

    /// Owner-checked write; failures are logged and swallowed.
    pub fn set<T: MemoryPayload>(&mut self, r: MemoryRef<T>, value: T) {
        if let Err(err) = self.vm.memory.set(r, value, &OwnerKey::Block(self.key.clone())) {
            warn!(target: "runtime.memory", block = %self.key, %err, "write through dead or foreign ref");
        }
    }
}

/// A runtime block. Behaviors execute in registration order for every
/// hook.
pub struct Block {
    pub key: BlockKey,
    pub source_ids: Vec<StatementId>,
    pub block_type: &'static str,
    pub label: String,
    /// Containers (loops, the root) log group spans; leaves log records.
    pub container: bool,
    pub context: BlockContext,
    /// Every block carries a completion flag the runtime polls to decide
    /// when to pop.
    pub completion: MemoryRef<CompletionStatus>,
    behaviors: Vec<Box<dyn Behavior>>,
    /// Execution span opened when the block was pushed; set by the runtime.
    pub span_id: Option<SpanId>,
}

impl Block {
    pub fn new(
        context: BlockContext,
        source_ids: Vec<StatementId>,
        block_type: &'static str,
        label: String,
        completion: MemoryRef<CompletionStatus>,
        behaviors: Vec<Box<dyn Behavior>>,
    ) -> Self {
        let key = context.key().clone();
        Self {
            key,
            source_ids,
            block_type,
            label,
            container: false,
            context,
            completion,
            behaviors,
            span_id: None,
        }
    }

    /// Mark this block as a container (group span in the log).
    pub fn as_container(mut self) -> Self {
        self.container = true;
        self
    }

    pub fn behavior_names(&self) -> Vec<&'static str> {
        self.behaviors.iter().map(|b| b.name()).collect()
    }

    fn hook<F>(&mut self, vm: &mut VmCore, mut call: F) -> Vec<Action>
    where
        F: FnMut(&mut Box<dyn Behavior>, &mut BehaviorContext<'_>) -> Vec<Action>,
    {
        let mut out = Vec::new();
        let mut ctx = BehaviorContext {
            vm,
            key: self.key.clone(),
            span_id: self.span_id,
            source_ids: &self.source_ids,
            label: &self.label,
        };
        for behavior in &mut self.behaviors {
            out.extend(call(behavior, &mut ctx));
        }
        out
    }

    pub fn mount(&mut self, vm: &mut VmCore) -> Vec<Action> {
        debug!(target: "runtime", block = %self.key, kind = self.block_type, "mount");
        self.hook(vm, |b, ctx| b.on_mount(ctx))
    }

    pub fn next(&mut self, vm: &mut VmCore) -> Vec<Action> {
        self.hook(vm, |b, ctx| b.on_next(ctx))
    }

    pub fn unmount(&mut self, vm: &mut VmCore) -> Vec<Action> {
        debug!(target: "runtime", block = %self.key, kind = self.block_type, "unmount");
        self.hook(vm, |b, ctx| b.on_unmount(ctx))
    }

    pub fn handle_event(&mut self, event: &RuntimeEvent, vm: &mut VmCore) -> Vec<Action> {
        self.hook(vm, |b, ctx| b.on_event(event, ctx))
    }

    /// Dispose: run `on_dispose` hooks, unregister every handler owned by
    /// this key, then release the block's memory. After this the key owns
    /// nothing.
    pub fn dispose(&mut self, vm: &mut VmCore) {
        let mut ctx = BehaviorContext {
            vm: &mut *vm,
            key: self.key.clone(),
            span_id: self.span_id,
            source_ids: &self.source_ids,
            label: &self.label,
        };
        for behavior in &mut self.behaviors {
            behavior.on_dispose(&mut ctx);
        }

        let owner = OwnerKey::Block(self.key.clone());
        let handler_ids: Vec<MemoryId> = vm
            .memory
            .search(&SearchCriteria {
                kind: Some(MemoryKind::Handler),
                owner: Some(owner.clone()),
                visibility: None,
            })
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let handlers = handler_ids.len();
        for id in handler_ids {
            vm.memory.release(id);
        }

        let released = self.context.release(&mut vm.memory);
        // Belt and braces: anything allocated outside the context (there
        // should be nothing) goes with the key too.
        let strays = vm.memory.release_owned(&owner);
        debug!(
            target: "runtime",
            block = %self.key,
            released,
            handlers,
            strays,
            "dispose"
        );
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("key", &self.key)
            .field("block_type", &self.block_type)
            .field("label", &self.label)
            .field("behaviors", &self.behavior_names())
            .field("span_id", &self.span_id)
            .finish()
    }
}
