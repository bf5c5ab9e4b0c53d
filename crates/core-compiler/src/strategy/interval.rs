//! EMOM: a fixed number of equal sub-intervals, one child push per
//! interval. The child receives the interval as its own countdown, so
//! each minute resets naturally when the next child compiles.

use super::{BlockParts, Strategy, begin_block, display, label_of, statement_rounds, statement_timer_ms, timer_state};
use core_behaviors::{
    LoopCoordinator, LoopKind, RoundAdvance, RoundCompletion, RoundInit, RoundOutput,
    SegmentOutput, TimerInit, TimerPause, TimerTick,
};
use core_fragment::FragmentType;
use core_runtime::{
    Behavior, Block, CompilationContext, CompileError, ControlButtons, MemoryKind, RoundState,
    TimerDirection, TimerRole, Visibility, VmCore,
};
use core_script::CodeStatement;

pub struct IntervalStrategy;

impl Strategy for IntervalStrategy {
    fn name(&self) -> &'static str {
        "interval"
    }

    fn matches(&self, statements: &[&CodeStatement]) -> bool {
        statements.len() == 1
            && statements[0].has(FragmentType::Timer)
            && statements[0].action_name() == Some("EMOM")
    }

    fn compile(
        &self,
        statements: &[&CodeStatement],
        vm: &mut VmCore,
        context: &CompilationContext,
    ) -> Result<Block, CompileError> {
        let statement = statements[0];
        let interval_ms = statement_timer_ms(statement).unwrap_or(60_000);
        let total_rounds = statement_rounds(statement).map(|r| r.total).unwrap_or(1);
        let total_ms = interval_ms * u64::from(total_rounds);

        let mut parts: BlockParts = begin_block("emom", statements, vm, context);
        let (spans, running) = timer_state(&mut parts, vm);
        let round_state = parts.context.allocate(
            &mut vm.memory,
            MemoryKind::RoundState,
            RoundState {
                current: 1,
                total: Some(total_rounds),
            },
            Visibility::Public,
        );
        let index = parts.context.allocate(
            &mut vm.memory,
            MemoryKind::ChildIndex,
            0u64,
            Visibility::Public,
        );
        let groups = statement.children.len() as u32;

        let behaviors: Vec<Box<dyn Behavior>> = vec![
            Box::new(TimerInit::new(spans, running)),
            Box::new(TimerTick::new(spans, running)),
            Box::new(TimerPause::new(spans, running)),
            Box::new(RoundInit::new(round_state, Some(total_rounds))),
            // Pre-advance completion check, then the loop engine.
            Box::new(RoundCompletion::new(
                index,
                parts.completion,
                groups,
                total_rounds,
            )),
            Box::new(LoopCoordinator::new(
                LoopKind::Interval {
                    total_rounds,
                    interval_ms,
                },
                statement.children.clone(),
                index,
                parts.completion,
            )),
            Box::new(RoundAdvance::new(
                index,
                round_state,
                parts.fragments,
                groups,
                Some(total_rounds),
            )),
            Box::new(RoundOutput::new(index, groups)),
            Box::new(SegmentOutput::container()),
        ];

        display(
            &mut parts,
            vm,
            label_of(statements),
            Some(format!("{total_rounds} rounds")),
            TimerRole::Workout,
            Some(spans),
            Some(total_ms),
            Some(TimerDirection::Down),
        );
        super::controls(
            &mut parts,
            vm,
            ControlButtons::PAUSE | ControlButtons::RESUME | ControlButtons::COMPLETE,
        );

        Ok(Block::new(
            parts.context,
            vec![statement.id],
            "Interval",
            label_of(statements),
            parts.completion,
            behaviors,
        )
        .as_container())
    }
}
