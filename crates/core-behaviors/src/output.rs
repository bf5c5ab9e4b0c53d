//! Log output behaviors: segment/completion markers and round milestones.

use core_runtime::{Action, Behavior, BehaviorContext, MemoryRef, names};

/// Emits the `segment` / `completion` timestamp pair bracketing a block's
/// run. Leaves emit both; containers only emit the closing `completion`
/// (their span itself records the grouping).
pub struct SegmentOutput {
    emit_segment: bool,
}

impl SegmentOutput {
    pub fn leaf() -> Self {
        Self { emit_segment: true }
    }

    pub fn container() -> Self {
        Self {
            emit_segment: false,
        }
    }
}

impl Behavior for SegmentOutput {
    fn name(&self) -> &'static str {
        "segment-output"
    }

    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if self.emit_segment {
            vec![Action::timestamp(names::SEGMENT_START, ctx.label.to_string())]
        } else {
            Vec::new()
        }
    }

    fn on_unmount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        vec![Action::timestamp(
            names::SEGMENT_COMPLETE,
            ctx.label.to_string(),
        )]
    }
}

/// Emits a `round:complete` milestone whenever the loop index wraps past a
/// full cycle of child groups. Placed after the coordinator so it observes
/// the post-advance index.
pub struct RoundOutput {
    index: MemoryRef<u64>,
    groups: u32,
}

impl RoundOutput {
    pub fn new(index: MemoryRef<u64>, groups: u32) -> Self {
        Self { index, groups }
    }
}

impl Behavior for RoundOutput {
    fn name(&self) -> &'static str {
        "round-output"
    }

    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if self.groups == 0 {
            return Vec::new();
        }
        let index = ctx.get(self.index).unwrap_or(0);
        let groups = u64::from(self.groups);
        // Wrap detection: the advance that moved us onto position 0 means
        // the previous round's final child just finished.
        if index > 0 && index % groups == 0 {
            let finished = index / groups;
            return vec![Action::timestamp(
                "round:complete",
                format!("Round {finished}"),
            )];
        }
        Vec::new()
    }
}
