//! Fixed rounds and rep schemes: `(3)` or `(21-15-9)` over child groups.

use super::{BlockParts, Strategy, begin_block, display, label_of, statement_rounds, timer_state};
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

pub struct RoundsStrategy;

impl Strategy for RoundsStrategy {
    fn name(&self) -> &'static str {
        "rounds"
    }

    fn matches(&self, statements: &[&CodeStatement]) -> bool {
        statements.len() == 1 && statements[0].has(FragmentType::Rounds)
    }

    fn compile(
        &self,
        statements: &[&CodeStatement],
        vm: &mut VmCore,
        context: &CompilationContext,
    ) -> Result<Block, CompileError> {
        let statement = statements[0];
        let spec = statement_rounds(statement)
            .cloned()
            .unwrap_or(core_fragment::RoundsSpec::fixed(1));
        let total_rounds = spec.total.max(1);
        let kind = match spec.rep_scheme {
            Some(scheme) => LoopKind::RepScheme { scheme },
            None => LoopKind::Fixed { total_rounds },
        };

        let mut parts: BlockParts = begin_block("rounds", statements, vm, context);
        // The rounds block carries its own count-up clock so the display
        // can show a per-section elapsed timer.
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
            Box::new(RoundCompletion::new(
                index,
                parts.completion,
                groups,
                total_rounds,
            )),
            Box::new(LoopCoordinator::new(
                kind,
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
            TimerRole::Round,
            Some(spans),
            None,
            Some(TimerDirection::Up),
        );
        super::controls(
            &mut parts,
            vm,
            ControlButtons::NEXT
                | ControlButtons::PAUSE
                | ControlButtons::RESUME
                | ControlButtons::COMPLETE,
        );

        Ok(Block::new(
            parts.context,
            vec![statement.id],
            "Rounds",
            label_of(statements),
            parts.completion,
            behaviors,
        )
        .as_container())
    }
}
