//! Loop engine protocol tests: advance counting, rep-scheme contexts,
//! round milestones, and completion exactly at `groups * rounds` advances.

use core_behaviors::{LoopCoordinator, LoopKind, PopOnEvent, RoundCompletion};
use core_runtime::{
    Behavior, Block, BlockCompiler, BlockContext, CompilationContext, CompileError,
    CompletionStatus, MemoryKind, RuntimeCommand, ScriptRuntime, Visibility, VmCore,
    WorkoutState, names,
};
use core_script::{StatementId, parse};
use std::sync::{Arc, Mutex};

/// Records every child compilation context, then produces a leaf that
/// completes on `runtime:next`.
struct RecordingCompiler {
    kind: LoopKind,
    child_groups: Vec<Vec<StatementId>>,
    seen: Arc<Mutex<Vec<CompilationContext>>>,
}

impl RecordingCompiler {
    fn new(kind: LoopKind, child_groups: Vec<Vec<StatementId>>) -> (Self, Arc<Mutex<Vec<CompilationContext>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                kind,
                child_groups,
                seen: Arc::clone(&seen),
            },
            seen,
        )
    }
}

impl BlockCompiler for RecordingCompiler {
    fn compile_ids(
        &self,
        ids: &[StatementId],
        vm: &mut VmCore,
        context: &CompilationContext,
    ) -> Result<Block, CompileError> {
        self.seen.lock().expect("lock").push(context.clone());
        let key = vm.mint_block_key("effort");
        let mut block_context = BlockContext::new(key);
        let completion = block_context.allocate(
            &mut vm.memory,
            MemoryKind::CompletionStatus,
            CompletionStatus::InProgress,
            Visibility::Public,
        );
        let behaviors: Vec<Box<dyn Behavior>> =
            vec![Box::new(PopOnEvent::new(names::RUNTIME_NEXT, completion))];
        Ok(Block::new(
            block_context,
            ids.to_vec(),
            "effort",
            format!("effort {ids:?}"),
            completion,
            behaviors,
        ))
    }

    fn compile_root(&self, vm: &mut VmCore) -> Result<Block, CompileError> {
        let key = vm.mint_block_key("loop");
        let mut context = BlockContext::new(key);
        let completion = context.allocate(
            &mut vm.memory,
            MemoryKind::CompletionStatus,
            CompletionStatus::InProgress,
            Visibility::Public,
        );
        let index = context.allocate(
            &mut vm.memory,
            MemoryKind::ChildIndex,
            0u64,
            Visibility::Public,
        );
        let groups = self.child_groups.len() as u32;
        let total = match &self.kind {
            LoopKind::Fixed { total_rounds } | LoopKind::Interval { total_rounds, .. } => {
                *total_rounds
            }
            LoopKind::RepScheme { scheme } => scheme.len() as u32,
            LoopKind::TimeBound => u32::MAX,
        };
        let mut behaviors: Vec<Box<dyn Behavior>> = Vec::new();
        if !matches!(self.kind, LoopKind::TimeBound) {
            behaviors.push(Box::new(RoundCompletion::new(
                index, completion, groups, total,
            )));
        }
        behaviors.push(Box::new(LoopCoordinator::new(
            self.kind.clone(),
            self.child_groups.clone(),
            index,
            completion,
        )));
        Ok(Block::new(
            context,
            Vec::new(),
            "loop",
            "loop".to_string(),
            completion,
            behaviors,
        )
        .as_container())
    }
}

fn ids(ns: &[u32]) -> Vec<Vec<StatementId>> {
    ns.iter().map(|&n| vec![StatementId(n)]).collect()
}

fn drive(kind: LoopKind, groups: Vec<Vec<StatementId>>, nexts: usize) -> (ScriptRuntime, Arc<Mutex<Vec<CompilationContext>>>) {
    let (compiler, seen) = RecordingCompiler::new(kind, groups);
    let mut rt = ScriptRuntime::new(parse("x"), Arc::new(compiler));
    rt.start(0);
    for i in 0..nexts {
        rt.dispatch(RuntimeCommand::Next, (i as u64 + 1) * 1_000);
    }
    (rt, seen)
}

#[test]
fn fixed_loop_completes_after_groups_times_rounds_advances() {
    // k = 2 child groups, r = 3 rounds: mount pushes the first child, the
    // 6th next() beyond mount finds the rule satisfied and the loop ends.
    let (rt, seen) = drive(LoopKind::Fixed { total_rounds: 3 }, ids(&[1, 2]), 6);
    assert_eq!(seen.lock().expect("lock").len(), 6, "six children compiled");
    assert_eq!(rt.state(), WorkoutState::Complete);
    assert_eq!(rt.stack().len(), 0);
}

#[test]
fn fixed_loop_is_still_running_one_advance_early() {
    let (rt, seen) = drive(LoopKind::Fixed { total_rounds: 3 }, ids(&[1, 2]), 5);
    assert_eq!(seen.lock().expect("lock").len(), 6);
    assert_eq!(rt.state(), WorkoutState::Running, "last child still on the stack");
    assert_eq!(rt.stack().len(), 2);
}

#[test]
fn rep_scheme_contexts_follow_rounds() {
    // (21-15-9) over two child groups: rep contexts pair up per round.
    let (rt, seen) = drive(
        LoopKind::RepScheme {
            scheme: vec![21, 15, 9],
        },
        ids(&[1, 2]),
        6,
    );
    let reps: Vec<Option<u32>> = seen.lock().expect("lock").iter().map(|c| c.reps).collect();
    assert_eq!(
        reps,
        vec![Some(21), Some(21), Some(15), Some(15), Some(9), Some(9)]
    );
    let rounds: Vec<Option<u32>> = seen.lock().expect("lock").iter().map(|c| c.round).collect();
    assert_eq!(
        rounds,
        vec![Some(1), Some(1), Some(2), Some(2), Some(3), Some(3)]
    );
    assert_eq!(rt.state(), WorkoutState::Complete);
}

#[test]
fn round_start_timestamps_once_per_round() {
    let (rt, _) = drive(LoopKind::Fixed { total_rounds: 3 }, ids(&[1, 2]), 6);
    let round_starts = rt
        .core
        .log
        .completed()
        .iter()
        .filter(|s| s.event_type() == Some(names::ROUND_START))
        .count();
    assert_eq!(round_starts, 3);
}

#[test]
fn interval_children_receive_interval_context() {
    let (rt, seen) = drive(
        LoopKind::Interval {
            total_rounds: 2,
            interval_ms: 60_000,
        },
        ids(&[1]),
        2,
    );
    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|c| c.interval_ms == Some(60_000)));
    assert!(
        seen.iter()
            .all(|c| c.direction == Some(core_runtime::TimerDirection::Down))
    );
    assert_eq!(rt.state(), WorkoutState::Complete);
}

#[test]
fn empty_child_groups_complete_immediately() {
    let (rt, seen) = drive(LoopKind::Fixed { total_rounds: 3 }, Vec::new(), 0);
    assert!(seen.lock().expect("lock").is_empty());
    assert_eq!(rt.state(), WorkoutState::Complete);
}

proptest::proptest! {
    /// Fixed completion occurs exactly after `groups * rounds` advances
    /// beyond mount, for any small loop shape.
    #[test]
    fn fixed_completion_is_exactly_groups_times_rounds(groups in 1u32..5, rounds in 1u32..6) {
        let shape: Vec<u32> = (1..=groups).collect();
        let advances = (groups * rounds) as usize;

        // One advance short: still running.
        let (rt, seen) = drive(
            LoopKind::Fixed { total_rounds: rounds },
            ids(&shape),
            advances - 1,
        );
        proptest::prop_assert_eq!(seen.lock().expect("lock").len(), advances);
        proptest::prop_assert_eq!(rt.state(), WorkoutState::Running);

        // Exactly at the bound: complete, and no extra child compiled.
        let (rt, seen) = drive(
            LoopKind::Fixed { total_rounds: rounds },
            ids(&shape),
            advances,
        );
        proptest::prop_assert_eq!(seen.lock().expect("lock").len(), advances);
        proptest::prop_assert_eq!(rt.state(), WorkoutState::Complete);
    }
}
