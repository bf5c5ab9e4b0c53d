//! The loop engine.
//!
//! One free variable (`index`, a `child-index` memory entry) derives the
//! whole loop state: `position = index % groups`, `round = index / groups`
//! (0-based). The coordinator advances on mount (a loop block pushes its
//! first child without any gesture) and on every `next`, handing the child
//! group to the child runner for compilation.
//!
//! Completion rules by loop type:
//! * fixed / interval: `round >= total_rounds`
//! * rep scheme: `round >= scheme.len()`
//! * time bound: the owning block's countdown already marked it complete

use core_runtime::{
    Action, Behavior, BehaviorContext, CompilationContext, CompletionStatus, LoopSnapshot,
    MemoryRef, RuntimeError, TimerDirection, names,
};
use core_script::StatementId;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq)]
pub enum LoopKind {
    Fixed { total_rounds: u32 },
    RepScheme { scheme: Vec<u32> },
    TimeBound,
    Interval { total_rounds: u32, interval_ms: u64 },
}

impl LoopKind {
    fn total_rounds(&self) -> Option<u32> {
        match self {
            LoopKind::Fixed { total_rounds } | LoopKind::Interval { total_rounds, .. } => {
                Some(*total_rounds)
            }
            LoopKind::RepScheme { scheme } => Some(scheme.len() as u32),
            LoopKind::TimeBound => None,
        }
    }
}

/// Compiles one child group and returns the push. Owned by the
/// coordinator; exposed separately so strategies can reuse it for one-shot
/// containers.
pub struct ChildRunner;

impl ChildRunner {
    pub fn push_group(
        &self,
        ids: &[StatementId],
        context: &CompilationContext,
        ctx: &mut BehaviorContext<'_>,
    ) -> Vec<Action> {
        let Some(compiler) = ctx.vm.compiler.clone() else {
            return vec![Action::Error(RuntimeError::Compile(
                "no compiler attached to the runtime".into(),
            ))];
        };
        match compiler.compile_ids(ids, ctx.vm, context) {
            Ok(child) => {
                trace!(target: "compiler", parent = %ctx.key, ids = ?ids, "child compiled");
                vec![Action::Push(child)]
            }
            Err(err) => vec![Action::Error(RuntimeError::Compile(err.to_string()))],
        }
    }
}

impl Behavior for ChildRunner {
    fn name(&self) -> &'static str {
        "child-runner"
    }
}

pub struct LoopCoordinator {
    kind: LoopKind,
    child_groups: Vec<Vec<StatementId>>,
    index: MemoryRef<u64>,
    /// The owning block's completion flag; time-bound loops stop when the
    /// countdown has flipped it.
    completion: MemoryRef<CompletionStatus>,
    runner: ChildRunner,
}

impl LoopCoordinator {
    pub fn new(
        kind: LoopKind,
        child_groups: Vec<Vec<StatementId>>,
        index: MemoryRef<u64>,
        completion: MemoryRef<CompletionStatus>,
    ) -> Self {
        Self {
            kind,
            child_groups,
            index,
            completion,
            runner: ChildRunner,
        }
    }

    fn rule_complete(&self, round: u32, ctx: &BehaviorContext<'_>) -> bool {
        match &self.kind {
            LoopKind::Fixed { total_rounds } | LoopKind::Interval { total_rounds, .. } => {
                round >= *total_rounds
            }
            LoopKind::RepScheme { scheme } => round as usize >= scheme.len(),
            LoopKind::TimeBound => {
                ctx.get(self.completion) == Some(CompletionStatus::Complete)
            }
        }
    }

    /// One advance: check the completion rule, derive the child context,
    /// bump the index and push the next child group.
    fn advance(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        let groups = self.child_groups.len() as u64;
        if groups == 0 {
            ctx.set(self.completion, CompletionStatus::Complete);
            return Vec::new();
        }
        let index = ctx.get(self.index).unwrap_or(0);
        let position = (index % groups) as u32;
        let round = (index / groups) as u32;

        if self.rule_complete(round, ctx) {
            debug!(
                target: "runtime",
                block = %ctx.key,
                index,
                round,
                "loop complete"
            );
            return Vec::new();
        }

        let child_context = CompilationContext {
            effort: None,
            reps: match &self.kind {
                LoopKind::RepScheme { scheme } => scheme.get(round as usize).copied(),
                _ => None,
            },
            round: Some(round + 1),
            total_rounds: self.kind.total_rounds(),
            position: Some(position),
            interval_ms: match &self.kind {
                LoopKind::Interval { interval_ms, .. } => Some(*interval_ms),
                _ => None,
            },
            direction: match &self.kind {
                LoopKind::Interval { .. } => Some(TimerDirection::Down),
                _ => None,
            },
        };

        ctx.set(self.index, index + 1);
        if let Some(span) = ctx.span_id {
            ctx.vm.log.set_loop_state(
                span,
                LoopSnapshot {
                    index: index + 1,
                    round,
                    position,
                },
            );
        }

        let mut actions = Vec::new();
        // Position wrapping to 0 means a new round just began. One-pass
        // containers (fixed single round: plain groups, the root) have no
        // round structure worth marking.
        let single_pass = matches!(self.kind, LoopKind::Fixed { total_rounds: 1 });
        if position == 0 && !single_pass {
            actions.push(Action::timestamp(
                names::ROUND_START,
                format!("Round {}", round + 1),
            ));
        }
        let ids = self.child_groups[position as usize].clone();
        actions.extend(self.runner.push_group(&ids, &child_context, ctx));
        actions
    }
}

impl Behavior for LoopCoordinator {
    fn name(&self) -> &'static str {
        "loop-coordinator"
    }

    /// Mount simulates the first `next` so the loop starts without a
    /// gesture.
    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        self.advance(ctx)
    }

    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        self.advance(ctx)
    }
}
