//! Plain timer statements: a bare countdown leaf (`2:00 Plank`, `:30`),
//! or a time-bound container when the statement has children (a `10:00`
//! heading cycling its children until the clock runs out).

use super::{
    BlockParts, Strategy, StrategyOptions, begin_block, countdown_cues, display, effort_title,
    label_of, leaf_metrics, statement_timer_ms, timer_state,
};
use core_behaviors::{
    HistoryRecord, LoopCoordinator, LoopKind, PopOnEvent, RoundAdvance, RoundInit, RoundOutput,
    SegmentOutput, TimerCompletion, TimerInit, TimerPause, TimerTick,
};
use core_fragment::FragmentType;
use core_runtime::{
    Behavior, Block, CompilationContext, CompileError, ControlButtons, MemoryKind, RoundState,
    TimerDirection, TimerRole, Visibility, VmCore, names,
};
use core_script::CodeStatement;

pub struct TimerStrategy {
    options: StrategyOptions,
}

impl TimerStrategy {
    pub fn new(options: StrategyOptions) -> Self {
        Self { options }
    }
}

impl Strategy for TimerStrategy {
    fn name(&self) -> &'static str {
        "timer"
    }

    /// A timer without rounds or interval keywords (those matched
    /// earlier).
    fn matches(&self, statements: &[&CodeStatement]) -> bool {
        statements.len() == 1 && statements[0].has(FragmentType::Timer)
    }

    fn compile(
        &self,
        statements: &[&CodeStatement],
        vm: &mut VmCore,
        context: &CompilationContext,
    ) -> Result<Block, CompileError> {
        let statement = statements[0];
        let duration_ms = statement_timer_ms(statement).unwrap_or_default();
        let mut parts: BlockParts = begin_block("timer", statements, vm, context);
        let (spans, running) = timer_state(&mut parts, vm);

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

        let container = !statement.children.is_empty();
        if container {
            // Children cycle until the countdown expires (time-bound loop
            // without an explicit AMRAP keyword).
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
        } else {
            behaviors.push(Box::new(PopOnEvent::new(names::RUNTIME_NEXT, parts.completion)));
            behaviors.push(Box::new(SegmentOutput::leaf()));
            behaviors.push(Box::new(HistoryRecord::new(
                leaf_metrics(statements, context),
                Some(spans),
            )));
        }

        let role = if container {
            TimerRole::Workout
        } else {
            TimerRole::Effort
        };
        display(
            &mut parts,
            vm,
            effort_title(statements, context),
            None,
            role,
            Some(spans),
            Some(duration_ms),
            Some(TimerDirection::Down),
        );
        super::controls(
            &mut parts,
            vm,
            ControlButtons::NEXT | ControlButtons::PAUSE | ControlButtons::RESUME,
        );

        let block = Block::new(
            parts.context,
            vec![statement.id],
            "Timer",
            label_of(statements),
            parts.completion,
            behaviors,
        );
        Ok(if container { block.as_container() } else { block })
    }
}
