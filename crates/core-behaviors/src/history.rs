//! Finalizes a leaf block's execution record at unmount.

use core_fragment::{MetricValues, TimeSpan, total_elapsed};
use core_runtime::{Action, Behavior, BehaviorContext, MemoryRef};
use tracing::debug;

/// Carries the metrics template assembled at compile time (reps from the
/// rep scheme or statement, load, distance) and stamps the measured
/// duration onto it when the block unmounts. The runtime folds the result
/// into the parent group when the span closes.
pub struct HistoryRecord {
    metrics: MetricValues,
    spans: Option<MemoryRef<Vec<TimeSpan>>>,
}

impl HistoryRecord {
    pub fn new(metrics: MetricValues, spans: Option<MemoryRef<Vec<TimeSpan>>>) -> Self {
        Self { metrics, spans }
    }
}

impl Behavior for HistoryRecord {
    fn name(&self) -> &'static str {
        "history-record"
    }

    fn on_unmount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        let mut metrics = self.metrics.clone();
        let measured = match self.spans {
            Some(spans_ref) => ctx
                .get(spans_ref)
                .map(|spans| total_elapsed(&spans, ctx.now())),
            None => None,
        };
        if let Some(ms) = measured {
            metrics.duration_ms = Some(ms);
        }
        if let Some(span) = ctx.span_id {
            debug!(target: "runtime", block = %ctx.key, ?metrics, "record finalized");
            ctx.vm.log.set_record_metrics(span, metrics);
        }
        Vec::new()
    }
}
