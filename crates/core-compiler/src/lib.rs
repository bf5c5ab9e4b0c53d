//! Strategy-dispatched block compiler.
//!
//! Holds an ordered strategy list and compiles a statement group with the
//! first strategy whose shape test passes. Ordering is a contract:
//! time-bound rounds, interval, timer, rounds, group, then the effort
//! fallback. The same compiler instance is shared with the runtime (as
//! `BlockCompiler`) so loop blocks can compile child groups mid-run.

use core_behaviors::{LoopCoordinator, LoopKind, RoundCompletion, SegmentOutput, TimerInit, TimerPause, TimerTick};
use core_runtime::{
    Block, BlockCompiler, CompilationContext, CompileError, ControlButtons, TimerDirection,
    TimerRole, VmCore,
};
use core_script::{CodeStatement, StatementId};
use tracing::{debug, trace};

pub mod strategy;

pub use strategy::{
    EffortStrategy, GroupStrategy, IntervalStrategy, RoundsStrategy, Strategy, StrategyOptions,
    TimeBoundRoundsStrategy, TimerStrategy,
};

pub struct JitCompiler {
    strategies: Vec<Box<dyn Strategy>>,
}

impl JitCompiler {
    /// The production strategy order with default options.
    pub fn standard() -> Self {
        Self::with_options(StrategyOptions::default())
    }

    /// The production strategy order with configured options.
    pub fn with_options(options: StrategyOptions) -> Self {
        Self::with_strategies(vec![
            Box::new(TimeBoundRoundsStrategy::new(options.clone())),
            Box::new(IntervalStrategy),
            Box::new(TimerStrategy::new(options.clone())),
            Box::new(RoundsStrategy),
            Box::new(GroupStrategy),
            Box::new(EffortStrategy::new(options)),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    fn dispatch(
        &self,
        statements: &[&CodeStatement],
        vm: &mut VmCore,
        context: &CompilationContext,
    ) -> Result<Block, CompileError> {
        if statements.is_empty() {
            return Err(CompileError::EmptyInput);
        }
        for strategy in &self.strategies {
            if strategy.matches(statements) {
                debug!(
                    target: "compiler",
                    strategy = strategy.name(),
                    ids = ?statements.iter().map(|s| s.id).collect::<Vec<_>>(),
                    "strategy matched"
                );
                return strategy.compile(statements, vm, context);
            }
        }
        Err(CompileError::NoStrategy(
            statements.iter().map(|s| s.id).collect(),
        ))
    }
}

impl BlockCompiler for JitCompiler {
    fn compile_ids(
        &self,
        ids: &[StatementId],
        vm: &mut VmCore,
        context: &CompilationContext,
    ) -> Result<Block, CompileError> {
        let script = vm.script.clone();
        let mut statements = Vec::with_capacity(ids.len());
        for id in ids {
            match script.get_by_id(*id) {
                Some(statement) => statements.push(statement),
                None => return Err(CompileError::UnknownStatement(*id)),
            }
        }
        trace!(target: "compiler", ?ids, ?context, "compiling child group");
        self.dispatch(&statements, vm, context)
    }

    /// The root container: a single pass over the script's root groups,
    /// carrying the whole-workout clock.
    fn compile_root(&self, vm: &mut VmCore) -> Result<Block, CompileError> {
        let script = vm.script.clone();
        let root_groups = script.root_groups();
        if root_groups.is_empty() {
            return Err(CompileError::EmptyInput);
        }

        let mut parts = strategy::begin_block("root", &[], vm, &CompilationContext::default());
        let (spans, running) = strategy::timer_state(&mut parts, vm);
        let index = parts.context.allocate(
            &mut vm.memory,
            core_runtime::MemoryKind::ChildIndex,
            0u64,
            core_runtime::Visibility::Public,
        );
        let groups = root_groups.len() as u32;

        let behaviors: Vec<Box<dyn core_runtime::Behavior>> = vec![
            Box::new(TimerInit::new(spans, running)),
            Box::new(TimerTick::new(spans, running)),
            Box::new(TimerPause::new(spans, running)),
            Box::new(RoundCompletion::new(index, parts.completion, groups, 1)),
            Box::new(LoopCoordinator::new(
                LoopKind::Fixed { total_rounds: 1 },
                root_groups,
                index,
                parts.completion,
            )),
            Box::new(SegmentOutput::container()),
        ];

        strategy::display(
            &mut parts,
            vm,
            "Workout".to_string(),
            None,
            TimerRole::Workout,
            Some(spans),
            None,
            Some(TimerDirection::Up),
        );
        strategy::controls(
            &mut parts,
            vm,
            ControlButtons::START
                | ControlButtons::PAUSE
                | ControlButtons::RESUME
                | ControlButtons::NEXT
                | ControlButtons::RESET
                | ControlButtons::COMPLETE,
        );

        Ok(Block::new(
            parts.context,
            Vec::new(),
            "Root",
            "Workout".to_string(),
            parts.completion,
            behaviors,
        )
        .as_container())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_runtime::{ScriptRuntime, VmCore};
    use core_script::parse;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    /// Compile the first root statement of `text` and report the produced
    /// block type (strategy dispatch is observable through it).
    fn compiled_type(text: &str) -> &'static str {
        let script = parse(text);
        assert!(script.errors().is_empty(), "parse errors for {text:?}");
        let ids = script.roots().to_vec();
        let compiler = JitCompiler::standard();
        let mut vm = VmCore::new(Arc::new(script), None);
        let block = compiler
            .compile_ids(&ids[..1], &mut vm, &CompilationContext::default())
            .expect("compiles");
        block.block_type
    }

    #[test]
    fn strategy_order_matches_statement_shapes() {
        assert_eq!(compiled_type("10:00 AMRAP\n  5 Pullups"), "TimeBoundRounds");
        assert_eq!(compiled_type("10:00 (3)\n  5 Pullups"), "TimeBoundRounds");
        assert_eq!(compiled_type("EMOM 10\n  5 Burpees"), "Interval");
        assert_eq!(compiled_type("2:00 Plank"), "Timer");
        assert_eq!(compiled_type("(3)\n  5 Pullups"), "Rounds");
        assert_eq!(compiled_type("Warmup\n  5 Pullups"), "Group");
        assert_eq!(compiled_type("5 Pullups"), "Effort");
    }

    #[test]
    fn compose_groups_compile_as_group_blocks() {
        let script = parse("+ 10 Pullups\n+ 20 Pushups");
        let groups = script.root_groups();
        assert_eq!(groups.len(), 1, "adjacent compose statements pack");
        let compiler = JitCompiler::standard();
        let mut vm = VmCore::new(Arc::new(script), None);
        let block = compiler
            .compile_ids(&groups[0], &mut vm, &CompilationContext::default())
            .expect("compiles");
        assert_eq!(block.block_type, "Group");
        assert!(block.container);
    }

    #[test]
    fn unknown_ids_are_reported() {
        let script = parse("5 Pullups");
        let compiler = JitCompiler::standard();
        let mut vm = VmCore::new(Arc::new(script), None);
        let err = compiler
            .compile_ids(
                &[core_script::StatementId(42)],
                &mut vm,
                &CompilationContext::default(),
            )
            .expect_err("missing statement");
        assert_eq!(err, CompileError::UnknownStatement(core_script::StatementId(42)));
    }

    #[test]
    fn memory_is_allocated_before_the_block_returns() {
        let script = parse("(3)\n  5 Pullups");
        let ids = script.roots().to_vec();
        let compiler = JitCompiler::standard();
        let mut vm = VmCore::new(Arc::new(script), None);
        assert_eq!(vm.memory.live_entries(), 0);
        let block = compiler
            .compile_ids(&ids, &mut vm, &CompilationContext::default())
            .expect("compiles");
        assert!(vm.memory.live_entries() >= 5, "completion, fragments, spans, running, round, index");
        assert_eq!(
            vm.memory
                .search(&core_runtime::SearchCriteria::owned_by(
                    core_runtime::OwnerKey::Block(block.key.clone())
                ))
                .len(),
            vm.memory.live_entries(),
            "every entry belongs to the new block"
        );
    }

    #[test]
    fn fragments_thread_into_memory_with_context_overrides() {
        let script = parse("Thrusters 95lb");
        let ids = script.roots().to_vec();
        let compiler = JitCompiler::standard();
        let mut vm = VmCore::new(Arc::new(script), None);
        let context = CompilationContext {
            reps: Some(21),
            round: Some(1),
            ..Default::default()
        };
        let block = compiler
            .compile_ids(&ids, &mut vm, &context)
            .expect("compiles");
        let fragments: Vec<core_fragment::Fragment> = vm
            .memory
            .search(&core_runtime::SearchCriteria {
                kind: Some(core_runtime::MemoryKind::Fragment),
                owner: Some(core_runtime::OwnerKey::Block(block.key.clone())),
                visibility: None,
            })
            .into_iter()
            .find_map(|(id, _)| vm.memory.get_raw(id).ok())
            .expect("fragment entry");
        // The compiler-origin rep override out-ranks any parsed count.
        let resolved =
            core_fragment::resolve_fragments(&fragments, core_fragment::FragmentType::Rep);
        assert_eq!(resolved.len(), 1);
        assert_eq!(
            resolved[0].value,
            core_fragment::FragmentValue::Rep { count: 21 }
        );
        assert_eq!(resolved[0].origin, core_fragment::FragmentOrigin::Compiler);
    }

    #[test]
    fn runtime_smoke_via_standard_compiler() {
        let mut rt = ScriptRuntime::new(
            parse("(2)\n  5 Pullups"),
            Arc::new(JitCompiler::standard()),
        );
        rt.start(0);
        assert_eq!(rt.stack().len(), 3);
    }
}
