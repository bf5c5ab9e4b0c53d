//! AMRAP: a countdown bounding a child loop. Cycles child groups until
//! the timer expires; rounds are open-ended.

use super::{
    BlockParts, Strategy, StrategyOptions, begin_block, countdown_cues, display, label_of,
    statement_timer_ms, timer_state,
};
use core_behaviors::{
    LoopCoordinator, LoopKind, RoundAdvance, RoundInit, RoundOutput, SegmentOutput,
    TimerCompletion, TimerInit, TimerPause, TimerTick,
};
use core_fragment::FragmentType;
use core_runtime::{
    Behavior, Block, CompilationContext, CompileError, ControlButtons, MemoryKind, RoundState,
    TimerDirection, TimerRole, Visibility, VmCore,
};
use core_script::CodeStatement;

pub struct TimeBoundRoundsStrategy {
    options: StrategyOptions,
}

impl TimeBoundRoundsStrategy {
    pub fn new(options: StrategyOptions) -> Self {
        Self { options }
    }
}

impl Strategy for TimeBoundRoundsStrategy {
    fn name(&self) -> &'static str {
        "time-bound-rounds"
    }

    /// Timer plus rounds or the AMRAP keyword. EMOM statements also carry
    /// a (hinted) timer and a rounds count, so they are excluded here and
    /// picked up by the interval strategy next in line.
    fn matches(&self, statements: &[&CodeStatement]) -> bool {
        let Some(statement) = statements.first() else {
            return false;
        };
        statements.len() == 1
            && statement.has(FragmentType::Timer)
            && (statement.has(FragmentType::Rounds) || statement.action_name() == Some("AMRAP"))
            && statement.action_name() != Some("EMOM")
    }

    fn compile(
        &self,
        statements: &[&CodeStatement],
        vm: &mut VmCore,
        context: &CompilationContext,
    ) -> Result<Block, CompileError> {
        let statement = statements[0];
        let duration_ms = statement_timer_ms(statement).unwrap_or_default();
        let mut parts: BlockParts = begin_block("amrap", statements, vm, context);
        let (spans, running) = timer_state(&mut parts, vm);
        let round_state = parts.context.allocate(
            &mut vm.memory,
            MemoryKind::RoundState,
            RoundState {
                current: 1,
                total: None,
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

        let mut behaviors: Vec<Box<dyn Behavior>> = vec![
            Box::new(TimerInit::new(spans, running)),
            Box::new(TimerTick::new(spans, running)),
            Box::new(TimerPause::new(spans, running)),
            Box::new(TimerCompletion::new(
                spans,
                parts.completion,
                duration_ms,
                TimerDirection::Down,
            )),
        ];
        if let Some(cues) = countdown_cues(spans, duration_ms, &self.options) {
            behaviors.push(Box::new(cues));
        }
        behaviors.push(Box::new(RoundInit::new(round_state, None)));
        behaviors.push(Box::new(LoopCoordinator::new(
            LoopKind::TimeBound,
            statement.children.clone(),
            index,
            parts.completion,
        )));
        behaviors.push(Box::new(RoundAdvance::new(
            index,
            round_state,
            parts.fragments,
            groups,
            None,
        )));
        behaviors.push(Box::new(RoundOutput::new(index, groups)));
        behaviors.push(Box::new(SegmentOutput::container()));

        display(
            &mut parts,
            vm,
            label_of(statements),
            None,
            TimerRole::Workout,
            Some(spans),
            Some(duration_ms),
            Some(TimerDirection::Down),
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
            "TimeBoundRounds",
            label_of(statements),
            parts.completion,
            behaviors,
        )
        .as_container())
    }
}
