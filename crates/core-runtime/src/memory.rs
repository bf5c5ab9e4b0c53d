//! Flat memory arena owned by the runtime.
//!
//! Entries live in generational slots; a `MemoryId` is `{ index, generation }`
//! and goes stale the moment its slot is released, so use-after-release is a
//! reported `MemoryError`, never a dangling read. Typed access goes through
//! `MemoryRef<T>` which pairs an id with the payload type it was allocated
//! with.
//!
//! Invariants:
//! * A ref returned by `allocate` stays valid until `release`.
//! * `set` compares payloads and notifies subscribers only on change.
//! * Public entries are readable by anyone holding a ref or searching, but
//!   writable only by their owner (the runtime itself may always write).
//! * Notification callbacks may call back into the arena, including nested
//!   `set`; recursion is bounded by `MAX_NOTIFY_DEPTH`.

use crate::OwnerKey;
use crate::event::HandlerEntry;
use core_fragment::{Fragment, TimeSpan};
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Bound on nested change notifications (a subscriber calling `set` from
/// inside its callback). Past this depth further callbacks are dropped with
/// a warning.
pub const MAX_NOTIFY_DEPTH: u8 = 8;

/// Well-known entry kinds; search criteria match on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryKind {
    TimerSpans,
    TimerRunning,
    RoundState,
    ChildIndex,
    CompletionStatus,
    ExecutionSpan,
    Handler,
    Fragment,
    Display,
    Controls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Accessible only to the owner.
    Private,
    /// Descendant blocks may search and read it.
    Public,
}

/// Raw generational handle into the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MemoryId {
    pub index: u32,
    pub generation: u32,
}

/// Typed handle: a `MemoryId` plus the payload type it was allocated with.
pub struct MemoryRef<T> {
    id: MemoryId,
    _payload: PhantomData<fn() -> T>,
}

impl<T> MemoryRef<T> {
    pub fn new(id: MemoryId) -> Self {
        Self {
            id,
            _payload: PhantomData,
        }
    }

    pub fn id(&self) -> MemoryId {
        self.id
    }
}

// Manual impls: `derive` would bound them on `T`, but the handle itself is
// always copyable.
impl<T> Clone for MemoryRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for MemoryRef<T> {}

impl<T> std::fmt::Debug for MemoryRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryRef({}, gen {})", self.id.index, self.id.generation)
    }
}

/// Live round progress for a loop block (`current` is 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoundState {
    pub current: u32,
    pub total: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionStatus {
    InProgress,
    Complete,
}

/// Role a timer plays in the display stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerRole {
    /// Whole-workout clock.
    Workout,
    /// Current round / lap clock.
    Round,
    /// Fixed sub-interval clock (one EMOM minute).
    Interval,
    /// Per-effort clock.
    Effort,
}

bitflags::bitflags! {
    /// Buttons a block offers the UI while it is on the stack.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlButtons: u8 {
        const START    = 1 << 0;
        const PAUSE    = 1 << 1;
        const RESUME   = 1 << 2;
        const NEXT     = 1 << 3;
        const RESET    = 1 << 4;
        const COMPLETE = 1 << 5;
    }
}

/// Display hints a block publishes for the snapshot producer.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayEntry {
    pub title: String,
    pub subtitle: Option<String>,
    pub role: TimerRole,
    /// Points at the block's `timer-spans` entry when it owns a clock.
    pub span_ref: Option<MemoryId>,
    /// Target duration for countdown presentation.
    pub duration_ms: Option<u64>,
    pub direction: Option<crate::block::TimerDirection>,
}

/// Tagged payload storage. One variant per payload shape; several kinds may
/// share a shape (`child-index` and `execution-span` are both numeric).
#[derive(Debug, Clone)]
pub enum MemoryValue {
    Spans(Vec<TimeSpan>),
    Flag(bool),
    Round(RoundState),
    Index(u64),
    Completion(CompletionStatus),
    Handler(HandlerEntry),
    Fragments(Vec<Fragment>),
    Display(DisplayEntry),
    Controls(ControlButtons),
}

impl PartialEq for MemoryValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MemoryValue::Spans(a), MemoryValue::Spans(b)) => a == b,
            (MemoryValue::Flag(a), MemoryValue::Flag(b)) => a == b,
            (MemoryValue::Round(a), MemoryValue::Round(b)) => a == b,
            (MemoryValue::Index(a), MemoryValue::Index(b)) => a == b,
            (MemoryValue::Completion(a), MemoryValue::Completion(b)) => a == b,
            // Handlers compare by identity; the callback itself is opaque.
            (MemoryValue::Handler(a), MemoryValue::Handler(b)) => a.id == b.id,
            (MemoryValue::Fragments(a), MemoryValue::Fragments(b)) => a == b,
            (MemoryValue::Display(a), MemoryValue::Display(b)) => a == b,
            (MemoryValue::Controls(a), MemoryValue::Controls(b)) => a == b,
            _ => false,
        }
    }
}

/// Conversion between Rust payload types and `MemoryValue` variants. Every
/// type storable in the arena implements this.
pub trait MemoryPayload: Clone {
    fn into_value(self) -> MemoryValue;
    fn from_value(value: &MemoryValue) -> Option<Self>;
}

macro_rules! impl_payload {
    ($ty:ty, $variant:ident) => {
        impl MemoryPayload for $ty {
            fn into_value(self) -> MemoryValue {
                MemoryValue::$variant(self)
            }
            fn from_value(value: &MemoryValue) -> Option<Self> {
                match value {
                    MemoryValue::$variant(inner) => Some(inner.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_payload!(Vec<TimeSpan>, Spans);
impl_payload!(bool, Flag);
impl_payload!(RoundState, Round);
impl_payload!(u64, Index);
impl_payload!(CompletionStatus, Completion);
impl_payload!(HandlerEntry, Handler);
impl_payload!(Vec<Fragment>, Fragments);
impl_payload!(DisplayEntry, Display);
impl_payload!(ControlButtons, Controls);

#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub kind: MemoryKind,
    pub owner: OwnerKey,
    pub visibility: Visibility,
    pub value: MemoryValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("memory ref {index}/{generation} is released or never existed")]
    Released { index: u32, generation: u32 },
    #[error("memory ref {index}/{generation} holds a different payload type")]
    TypeMismatch { index: u32, generation: u32 },
    #[error("memory ref {index}/{generation} is not writable by this owner")]
    NotOwner { index: u32, generation: u32 },
}

impl MemoryError {
    fn released(id: MemoryId) -> Self {
        MemoryError::Released {
            index: id.index,
            generation: id.generation,
        }
    }
    fn type_mismatch(id: MemoryId) -> Self {
        MemoryError::TypeMismatch {
            index: id.index,
            generation: id.generation,
        }
    }
    fn not_owner(id: MemoryId) -> Self {
        MemoryError::NotOwner {
            index: id.index,
            generation: id.generation,
        }
    }
}

/// What happened to an entry; delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Allocated,
    Set,
    Released,
}

#[derive(Debug, Clone)]
pub struct MemoryChange {
    pub id: MemoryId,
    pub kind: MemoryKind,
    pub owner: OwnerKey,
    pub change: ChangeKind,
}

pub type SubscriberFn = Arc<dyn Fn(&mut Memory, &MemoryChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    /// `None` subscribes to every change; `Some(id)` to one entry.
    filter: Option<MemoryId>,
    callback: SubscriberFn,
}

/// Search criteria; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub kind: Option<MemoryKind>,
    pub owner: Option<OwnerKey>,
    pub visibility: Option<Visibility>,
}

impl SearchCriteria {
    pub fn of_kind(kind: MemoryKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn owned_by(owner: OwnerKey) -> Self {
        Self {
            owner: Some(owner),
            ..Default::default()
        }
    }

    fn matches(&self, entry: &MemoryEntry) -> bool {
        self.kind.is_none_or(|k| k == entry.kind)
            && self.owner.as_ref().is_none_or(|o| *o == entry.owner)
            && self.visibility.is_none_or(|v| v == entry.visibility)
    }
}

struct Slot {
    generation: u32,
    entry: Option<MemoryEntry>,
}

/// The arena.
#[derive(Default)]
pub struct Memory {
    slots: Vec<Slot>,
    free: Vec<u32>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
    notify_depth: u8,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate<T: MemoryPayload>(
        &mut self,
        kind: MemoryKind,
        owner: OwnerKey,
        initial: T,
        visibility: Visibility,
    ) -> MemoryRef<T> {
        let entry = MemoryEntry {
            kind,
            owner: owner.clone(),
            visibility,
            value: initial.into_value(),
        };
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (self.slots.len() - 1) as u32
            }
        };
        let id = MemoryId {
            index,
            generation: self.slots[index as usize].generation,
        };
        trace!(target: "runtime.memory", ?id, ?kind, owner = %owner, "allocate");
        self.notify(MemoryChange {
            id,
            kind,
            owner,
            change: ChangeKind::Allocated,
        });
        MemoryRef::new(id)
    }

    pub fn entry(&self, id: MemoryId) -> Option<&MemoryEntry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get<T: MemoryPayload>(&self, r: MemoryRef<T>) -> Result<T, MemoryError> {
        let entry = self.entry(r.id()).ok_or(MemoryError::released(r.id()))?;
        T::from_value(&entry.value).ok_or(MemoryError::type_mismatch(r.id()))
    }

    /// Typed read through a raw id (for search results).
    pub fn get_raw<T: MemoryPayload>(&self, id: MemoryId) -> Result<T, MemoryError> {
        let entry = self.entry(id).ok_or(MemoryError::released(id))?;
        T::from_value(&entry.value).ok_or(MemoryError::type_mismatch(id))
    }

    /// Owner-checked write. The runtime key may write anything; a block key
    /// may write only entries it owns. Returns whether the value changed.
    pub fn set<T: MemoryPayload>(
        &mut self,
        r: MemoryRef<T>,
        value: T,
        writer: &OwnerKey,
    ) -> Result<bool, MemoryError> {
        let id = r.id();
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .ok_or(MemoryError::released(id))?;
        let entry = slot.entry.as_mut().ok_or(MemoryError::released(id))?;
        if !matches!(writer, OwnerKey::Runtime) && *writer != entry.owner {
            return Err(MemoryError::not_owner(id));
        }
        // Type check before committing.
        if T::from_value(&entry.value).is_none() {
            return Err(MemoryError::type_mismatch(id));
        }
        let next = value.into_value();
        if entry.value == next {
            return Ok(false);
        }
        entry.value = next;
        let change = MemoryChange {
            id,
            kind: entry.kind,
            owner: entry.owner.clone(),
            change: ChangeKind::Set,
        };
        trace!(target: "runtime.memory", ?id, kind = ?change.kind, "set");
        self.notify(change);
        Ok(true)
    }

    pub fn search(&self, criteria: &SearchCriteria) -> Vec<(MemoryId, &MemoryEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let entry = slot.entry.as_ref()?;
                criteria.matches(entry).then_some((
                    MemoryId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    entry,
                ))
            })
            .collect()
    }

    /// Remove an entry and drop its per-ref subscriptions. Returns false if
    /// the id was already stale.
    pub fn release(&mut self, id: MemoryId) -> bool {
        let Some(slot) = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
        else {
            return false;
        };
        let Some(entry) = slot.entry.take() else {
            return false;
        };
        slot.generation += 1;
        self.free.push(id.index);
        self.subscribers
            .retain(|s| s.filter.is_none_or(|f| f != id));
        debug!(target: "runtime.memory", ?id, kind = ?entry.kind, owner = %entry.owner, "release");
        self.notify(MemoryChange {
            id,
            kind: entry.kind,
            owner: entry.owner,
            change: ChangeKind::Released,
        });
        true
    }

    /// Release every entry owned by `owner`; the teardown half of block
    /// disposal. Returns how many entries were removed.
    pub fn release_owned(&mut self, owner: &OwnerKey) -> usize {
        let ids: Vec<MemoryId> = self
            .search(&SearchCriteria::owned_by(owner.clone()))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let count = ids.len();
        for id in ids {
            self.release(id);
        }
        count
    }

    pub fn subscribe(&mut self, callback: SubscriberFn) -> SubscriptionId {
        self.subscribe_inner(None, callback)
    }

    pub fn subscribe_ref(&mut self, id: MemoryId, callback: SubscriberFn) -> SubscriptionId {
        self.subscribe_inner(Some(id), callback)
    }

    fn subscribe_inner(&mut self, filter: Option<MemoryId>, callback: SubscriberFn) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push(Subscriber {
            id,
            filter,
            callback,
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Registered handler entries for an event name, sorted by priority
    /// (higher first) then insertion order.
    pub fn handlers_for(&self, event_name: &str) -> Vec<HandlerEntry> {
        let mut handlers: Vec<HandlerEntry> = self
            .search(&SearchCriteria::of_kind(MemoryKind::Handler))
            .into_iter()
            .filter_map(|(_, entry)| match &entry.value {
                MemoryValue::Handler(h) if h.event == event_name => Some(h.clone()),
                _ => None,
            })
            .collect();
        handlers.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        handlers
    }

    /// Release the handler entry with the given handler id, if present.
    pub fn release_handler(&mut self, handler_id: u64) -> bool {
        let found = self
            .search(&SearchCriteria::of_kind(MemoryKind::Handler))
            .into_iter()
            .find_map(|(id, entry)| match &entry.value {
                MemoryValue::Handler(h) if h.id == handler_id => Some(id),
                _ => None,
            });
        match found {
            Some(id) => self.release(id),
            None => false,
        }
    }

    /// Count of live entries (test and diagnostics aid).
    pub fn live_entries(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    fn notify(&mut self, change: MemoryChange) {
        if self.notify_depth >= MAX_NOTIFY_DEPTH {
            warn!(
                target: "runtime.memory",
                depth = self.notify_depth,
                "notification depth exceeded; dropping nested callbacks"
            );
            return;
        }
        // Snapshot matching callbacks so subscribers may mutate the
        // subscriber list (or the arena) from inside a callback.
        let matching: Vec<SubscriberFn> = self
            .subscribers
            .iter()
            .filter(|s| s.filter.is_none_or(|f| f == change.id))
            .map(|s| Arc::clone(&s.callback))
            .collect();
        if matching.is_empty() {
            return;
        }
        self.notify_depth += 1;
        for callback in matching {
            callback(self, &change);
        }
        self.notify_depth -= 1;
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("live_entries", &self.live_entries())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
