//! Round bookkeeping: the `round-state` entry, its live fragment mirror
//! and completion marking.
//!
//! Ordering contract within a block's behavior list:
//! * `RoundCompletion` runs BEFORE the coordinator: it must see the
//!   pre-advance index, otherwise it would declare the loop finished the
//!   moment the final child is pushed (while that child is still running).
//! * `RoundAdvance` runs AFTER the coordinator: it derives the round of
//!   the child that was just pushed from the post-advance index.

use core_fragment::{Fragment, FragmentOrigin, FragmentType, FragmentValue, RoundProgress};
use core_runtime::{
    Action, Behavior, BehaviorContext, CompletionStatus, MemoryRef, RoundState,
};
use tracing::debug;

/// Seeds `round-state` at mount ({current: 1, total}).
pub struct RoundInit {
    round_state: MemoryRef<RoundState>,
    total: Option<u32>,
}

impl RoundInit {
    pub fn new(round_state: MemoryRef<RoundState>, total: Option<u32>) -> Self {
        Self { round_state, total }
    }
}

impl Behavior for RoundInit {
    fn name(&self) -> &'static str {
        "round-init"
    }

    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        ctx.set(
            self.round_state,
            RoundState {
                current: 1,
                total: self.total,
            },
        );
        Vec::new()
    }
}

/// Recomputes `round-state.current` from the loop index after every
/// advance and mirrors it into the block's fragment entry as a
/// runtime-origin `CurrentRound` fragment (which out-ranks the parsed
/// rounds fragment for display).
pub struct RoundAdvance {
    index: MemoryRef<u64>,
    round_state: MemoryRef<RoundState>,
    fragments: MemoryRef<Vec<Fragment>>,
    groups: u32,
    total: Option<u32>,
}

impl RoundAdvance {
    pub fn new(
        index: MemoryRef<u64>,
        round_state: MemoryRef<RoundState>,
        fragments: MemoryRef<Vec<Fragment>>,
        groups: u32,
        total: Option<u32>,
    ) -> Self {
        Self {
            index,
            round_state,
            fragments,
            groups,
            total,
        }
    }

    fn sync(&self, ctx: &mut BehaviorContext<'_>) {
        if self.groups == 0 {
            return;
        }
        let index = ctx.get(self.index).unwrap_or(0);
        // The index has already advanced past the child being pushed, so
        // the running round is (index - 1) / groups.
        let derived = (index.saturating_sub(1) / u64::from(self.groups)) as u32 + 1;
        let current = match self.total {
            Some(total) => derived.min(total.max(1)),
            None => derived,
        };
        ctx.set(
            self.round_state,
            RoundState {
                current,
                total: self.total,
            },
        );
        if let Some(mut fragments) = ctx.get(self.fragments) {
            fragments.retain(|f| {
                !(f.fragment_type() == FragmentType::CurrentRound
                    && f.origin == FragmentOrigin::Runtime)
            });
            let mut fragment = Fragment::with_origin(
                FragmentValue::CurrentRound(RoundProgress {
                    current,
                    total: self.total,
                }),
                FragmentOrigin::Runtime,
            );
            fragment.owner = Some(ctx.key.to_string());
            fragment.at = Some(ctx.now());
            fragments.push(fragment);
            ctx.set(self.fragments, fragments);
        }
    }
}

impl Behavior for RoundAdvance {
    fn name(&self) -> &'static str {
        "round-advance"
    }

    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        self.sync(ctx);
        Vec::new()
    }

    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        self.sync(ctx);
        Vec::new()
    }
}

/// Marks the block complete once the loop index has consumed every round.
/// Must precede the coordinator in the behavior list (see module docs).
pub struct RoundCompletion {
    index: MemoryRef<u64>,
    completion: MemoryRef<CompletionStatus>,
    groups: u32,
    total: u32,
}

impl RoundCompletion {
    pub fn new(
        index: MemoryRef<u64>,
        completion: MemoryRef<CompletionStatus>,
        groups: u32,
        total: u32,
    ) -> Self {
        Self {
            index,
            completion,
            groups,
            total,
        }
    }
}

impl Behavior for RoundCompletion {
    fn name(&self) -> &'static str {
        "round-completion"
    }

    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if self.groups == 0 {
            return Vec::new();
        }
        let index = ctx.get(self.index).unwrap_or(0);
        let round = (index / u64::from(self.groups)) as u32;
        if round >= self.total && ctx.get(self.completion) == Some(CompletionStatus::InProgress) {
            debug!(target: "runtime", block = %ctx.key, round, "rounds exhausted");
            ctx.set(self.completion, CompletionStatus::Complete);
        }
        Vec::new()
    }
}
