//! Fallback strategy: a single exercise line.
//!
//! An effort block counts its own elapsed time, finalizes a metric record
//! at unmount, and completes on the user's `runtime:next` gesture. A
//! parent interval loop turns the effort into a countdown instead: the
//! child expires on its own when the interval elapses.

use super::{
    BlockParts, Strategy, StrategyOptions, begin_block, countdown_cues, display, effort_title,
    label_of, leaf_metrics, statement_timer_ms, timer_state,
};
use core_behaviors::{
    HistoryRecord, PopOnEvent, SegmentOutput, TimerCompletion, TimerInit, TimerPause, TimerTick,
};
use core_runtime::{
    Behavior, Block, CompilationContext, CompileError, ControlButtons, TimerDirection, TimerRole,
    VmCore, names,
};
use core_script::CodeStatement;

pub struct EffortStrategy {
    options: StrategyOptions,
}

impl EffortStrategy {
    pub fn new(options: StrategyOptions) -> Self {
        Self { options }
    }
}

impl Strategy for EffortStrategy {
    fn name(&self) -> &'static str {
        "effort"
    }

    /// Terminal fallback: anything the earlier strategies passed over.
    fn matches(&self, _statements: &[&CodeStatement]) -> bool {
        true
    }

    fn compile(
        &self,
        statements: &[&CodeStatement],
        vm: &mut VmCore,
        context: &CompilationContext,
    ) -> Result<Block, CompileError> {
        let mut parts: BlockParts = begin_block("effort", statements, vm, context);
        let (spans, running) = timer_state(&mut parts, vm);

        // An interval parent imposes a countdown; a statement-level timer
        // would have matched the timer strategy instead.
        let countdown_ms = context
            .interval_ms
            .or_else(|| statements.first().and_then(|s| statement_timer_ms(s)));
        let direction = match countdown_ms {
            Some(_) => context.direction.unwrap_or(TimerDirection::Down),
            None => TimerDirection::Up,
        };

        let mut behaviors: Vec<Box<dyn Behavior>> = vec![
            Box::new(TimerInit::new(spans, running)),
            Box::new(TimerTick::new(spans, running)),
            Box::new(TimerPause::new(spans, running)),
        ];
        if let Some(ms) = countdown_ms
            && direction == TimerDirection::Down
        {
            behaviors.push(Box::new(TimerCompletion::new(
                spans,
                parts.completion,
                ms,
                direction,
            )));
            if let Some(cues) = countdown_cues(spans, ms, &self.options) {
                behaviors.push(Box::new(cues));
            }
        }
        behaviors.push(Box::new(PopOnEvent::new(names::RUNTIME_NEXT, parts.completion)));
        behaviors.push(Box::new(SegmentOutput::leaf()));
        behaviors.push(Box::new(HistoryRecord::new(
            leaf_metrics(statements, context),
            Some(spans),
        )));

        let metrics = leaf_metrics(statements, context);
        let subtitle = metrics.reps.map(|r| format!("{r} reps"));
        let role = if context.interval_ms.is_some() {
            TimerRole::Interval
        } else {
            TimerRole::Effort
        };
        display(
            &mut parts,
            vm,
            effort_title(statements, context),
            subtitle,
            role,
            Some(spans),
            countdown_ms,
            Some(direction),
        );
        super::controls(
            &mut parts,
            vm,
            ControlButtons::NEXT | ControlButtons::PAUSE | ControlButtons::RESUME,
        );

        let source_ids = statements.iter().map(|s| s.id).collect();
        Ok(Block::new(
            parts.context,
            source_ids,
            "Effort",
            label_of(statements),
            parts.completion,
            behaviors,
        ))
    }
}
