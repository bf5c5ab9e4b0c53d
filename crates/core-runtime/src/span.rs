//! Execution spans and the append-only execution log.
//!
//! Three span categories:
//! * `Timestamp`: zero-duration point event (workout start, round start,
//!   pause, errors). Completed the moment it is created.
//! * `Group`: container block run; carries child span ids, the final loop
//!   counters, and metrics aggregated from children.
//! * `Record`: leaf block run; carries full metrics.
//!
//! A block's span opens when the block is pushed and closes when it
//! unmounts; metrics are finalized by the block's behaviors before the
//! close. Closed spans move from the active set into the append-only log.

use crate::BlockKey;
use core_fragment::MetricValues;
use core_script::StatementId;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

pub type SpanId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Open,
    Completed,
    Errored,
}

/// Final loop counters recorded on a group span when it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSnapshot {
    pub index: u64,
    pub round: u32,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum SpanDetail {
    Timestamp {
        event_type: String,
    },
    Group {
        child_ids: Vec<SpanId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        loop_state: Option<LoopSnapshot>,
        aggregated: MetricValues,
    },
    Record {
        metrics: MetricValues,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSpan {
    pub id: SpanId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<SpanId>,
    pub started: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended: Option<u64>,
    pub label: String,
    pub status: SpanStatus,
    pub source_ids: Vec<StatementId>,
    #[serde(flatten)]
    pub detail: SpanDetail,
}

impl ExecutionSpan {
    pub fn duration(&self) -> u64 {
        self.ended.unwrap_or(self.started).saturating_sub(self.started)
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self.detail, SpanDetail::Timestamp { .. })
    }

    pub fn event_type(&self) -> Option<&str> {
        match &self.detail {
            SpanDetail::Timestamp { event_type } => Some(event_type),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ExecutionLog {
    next_id: SpanId,
    /// Open spans in push order (innermost last).
    active: Vec<ExecutionSpan>,
    /// Closed spans, append-only.
    completed: Vec<ExecutionSpan>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&mut self) -> SpanId {
        self.next_id += 1;
        self.next_id
    }

    /// Open a group or record span for a block being pushed.
    pub fn open(
        &mut self,
        block: BlockKey,
        label: String,
        source_ids: Vec<StatementId>,
        started: u64,
        container: bool,
    ) -> SpanId {
        let id = self.mint();
        let parent = self.active.last().map(|s| s.id);
        let detail = if container {
            SpanDetail::Group {
                child_ids: Vec::new(),
                loop_state: None,
                aggregated: MetricValues::default(),
            }
        } else {
            SpanDetail::Record {
                metrics: MetricValues::default(),
            }
        };
        trace!(target: "runtime", span = id, block = %block, label = %label, "span opened");
        self.active.push(ExecutionSpan {
            id,
            block: Some(block),
            parent,
            started,
            ended: None,
            label,
            status: SpanStatus::Open,
            source_ids,
            detail,
        });
        id
    }

    /// Append a zero-duration timestamp entry, parented to the innermost
    /// active span.
    pub fn timestamp(
        &mut self,
        event_type: impl Into<String>,
        label: impl Into<String>,
        at: u64,
        block: Option<BlockKey>,
    ) -> SpanId {
        let id = self.mint();
        let parent = self.active.last().map(|s| s.id);
        let event_type = event_type.into();
        if let Some(parent_span) = self.active.last_mut()
            && let SpanDetail::Group { child_ids, .. } = &mut parent_span.detail
        {
            child_ids.push(id);
        }
        self.completed.push(ExecutionSpan {
            id,
            block,
            parent,
            started: at,
            ended: Some(at),
            label: label.into(),
            status: SpanStatus::Completed,
            source_ids: Vec::new(),
            detail: SpanDetail::Timestamp { event_type },
        });
        id
    }

    /// Close an active span: set its end, link it into its parent group and
    /// fold record metrics upward. Out-of-order closes are tolerated (the
    /// span is found by id, not position).
    pub fn close(&mut self, id: SpanId, ended: u64, status: SpanStatus) {
        let Some(position) = self.active.iter().position(|s| s.id == id) else {
            warn!(target: "runtime", span = id, "close of unknown or already-closed span");
            return;
        };
        let mut span = self.active.remove(position);
        span.ended = Some(ended.max(span.started));
        span.status = status;

        let child_metrics = match &mut span.detail {
            SpanDetail::Group { aggregated, .. } => {
                if let Some(ms) = span.ended {
                    aggregated.duration_ms = Some(ms.saturating_sub(span.started));
                }
                aggregated.clone()
            }
            SpanDetail::Record { metrics } => metrics.clone(),
            SpanDetail::Timestamp { .. } => MetricValues::default(),
        };

        if let Some(parent_id) = span.parent
            && let Some(parent) = self.active.iter_mut().find(|s| s.id == parent_id)
            && let SpanDetail::Group {
                child_ids,
                aggregated,
                ..
            } = &mut parent.detail
        {
            child_ids.push(span.id);
            aggregated.merge(&child_metrics);
        }
        trace!(target: "runtime", span = id, ?status, "span closed");
        self.completed.push(span);
    }

    pub fn active(&self) -> &[ExecutionSpan] {
        &self.active
    }

    pub fn completed(&self) -> &[ExecutionSpan] {
        &self.completed
    }

    pub fn active_mut(&mut self, id: SpanId) -> Option<&mut ExecutionSpan> {
        self.active.iter_mut().find(|s| s.id == id)
    }

    /// Write final metrics into an active record span (behaviors call this
    /// just before their block's span closes).
    pub fn set_record_metrics(&mut self, id: SpanId, metrics: MetricValues) {
        match self.active_mut(id) {
            Some(span) => {
                if let SpanDetail::Record { metrics: slot } = &mut span.detail {
                    *slot = metrics;
                }
            }
            None => warn!(target: "runtime", span = id, "metrics for unknown span"),
        }
    }

    /// Stamp final loop counters onto an active group span.
    pub fn set_loop_state(&mut self, id: SpanId, state: LoopSnapshot) {
        if let Some(span) = self.active_mut(id)
            && let SpanDetail::Group { loop_state, .. } = &mut span.detail
        {
            *loop_state = Some(state);
        }
    }

    /// Fold a metric sample into the innermost active record span, or
    /// record it as a standalone zero-duration entry when nothing is open.
    pub fn append_metric(&mut self, metrics: MetricValues, at: u64) {
        let target = self
            .active
            .iter_mut()
            .rev()
            .find(|s| matches!(s.detail, SpanDetail::Record { .. }));
        match target {
            Some(span) => {
                if let SpanDetail::Record { metrics: slot } = &mut span.detail {
                    slot.merge(&metrics);
                }
            }
            None => {
                let id = self.mint();
                self.completed.push(ExecutionSpan {
                    id,
                    block: None,
                    parent: None,
                    started: at,
                    ended: Some(at),
                    label: "metric".to_string(),
                    status: SpanStatus::Completed,
                    source_ids: Vec::new(),
                    detail: SpanDetail::Record { metrics },
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> BlockKey {
        BlockKey::from(name)
    }

    #[test]
    fn open_close_pairs_and_parenting() {
        let mut log = ExecutionLog::new();
        let root = log.open(key("root"), "root".into(), vec![], 0, true);
        let child = log.open(key("child"), "child".into(), vec![], 100, false);
        log.set_record_metrics(
            child,
            MetricValues {
                reps: Some(21),
                ..Default::default()
            },
        );
        log.close(child, 400, SpanStatus::Completed);
        log.close(root, 500, SpanStatus::Completed);

        assert!(log.active().is_empty());
        assert_eq!(log.completed().len(), 2);
        let child_span = &log.completed()[0];
        assert_eq!(child_span.parent, Some(root));
        assert_eq!(child_span.duration(), 300);
        let root_span = &log.completed()[1];
        match &root_span.detail {
            SpanDetail::Group {
                child_ids,
                aggregated,
                ..
            } => {
                assert_eq!(child_ids, &vec![child]);
                assert_eq!(aggregated.reps, Some(21), "child metrics fold upward");
            }
            other => panic!("expected group detail, got {other:?}"),
        }
    }

    #[test]
    fn timestamps_have_zero_duration() {
        let mut log = ExecutionLog::new();
        log.open(key("root"), "root".into(), vec![], 0, true);
        let ts = log.timestamp("round:start", "Round 1", 250, None);
        let span = log
            .completed()
            .iter()
            .find(|s| s.id == ts)
            .expect("timestamp recorded");
        assert_eq!(span.duration(), 0);
        assert_eq!(span.event_type(), Some("round:start"));
        assert_eq!(span.status, SpanStatus::Completed);
    }

    #[test]
    fn close_clamps_end_to_start() {
        let mut log = ExecutionLog::new();
        let id = log.open(key("b"), "b".into(), vec![], 1_000, false);
        log.close(id, 900, SpanStatus::Completed);
        let span = &log.completed()[0];
        assert_eq!(span.ended, Some(1_000), "ended >= started holds");
    }

    #[test]
    fn metric_without_active_record_is_standalone() {
        let mut log = ExecutionLog::new();
        log.append_metric(
            MetricValues {
                reps: Some(5),
                ..Default::default()
            },
            42,
        );
        assert_eq!(log.completed().len(), 1);
        assert_eq!(log.completed()[0].started, 42);
    }

    #[test]
    fn metric_folds_into_innermost_record() {
        let mut log = ExecutionLog::new();
        log.open(key("root"), "root".into(), vec![], 0, true);
        let record = log.open(key("leaf"), "leaf".into(), vec![], 10, false);
        log.append_metric(
            MetricValues {
                reps: Some(3),
                ..Default::default()
            },
            20,
        );
        log.append_metric(
            MetricValues {
                reps: Some(2),
                ..Default::default()
            },
            30,
        );
        log.close(record, 40, SpanStatus::Completed);
        let span = &log.completed()[0];
        match &span.detail {
            SpanDetail::Record { metrics } => assert_eq!(metrics.reps, Some(5)),
            other => panic!("expected record, got {other:?}"),
        }
    }
}
