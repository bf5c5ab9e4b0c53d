//! Display snapshot production.
//!
//! The snapshot is the only surface a UI may read: a serializable view of
//! the stacked timers, cards, workout state and round progress, rebuilt on
//! demand whenever memory changed. The hub subscribes to the arena and
//! coalesces change notifications through a channel, so producers pay one
//! flag-send per mutation and the consumer rebuilds at most once per
//! drain.
//!
//! Intents flow the other way as `RuntimeCommand`s; nothing in this crate
//! mutates the runtime.

use core_fragment::{Fragment, FragmentType, format_clock, resolve_fragments, total_elapsed};
use core_runtime::{
    Block, ControlButtons, DisplayEntry, MemoryId, MemoryKind, RoundState, ScriptRuntime,
    SearchCriteria, TimerDirection, TimerRole, WorkoutState,
};
use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

/// One timer the UI should render, innermost last.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerView {
    /// Owning block key.
    pub id: String,
    pub owner: String,
    pub role: TimerRole,
    /// Preformatted clock text (remaining for countdowns, elapsed
    /// otherwise).
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_ref: Option<MemoryId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<String>,
}

/// One card describing a stacked block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardView {
    pub id: String,
    pub owner: String,
    #[serde(rename = "type")]
    pub card_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Display strings of the winning-tier fragments, one entry per shown
    /// datum.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplaySnapshot {
    pub timer_stack: Vec<TimerView>,
    pub card_stack: Vec<CardView>,
    pub workout_state: WorkoutState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_span_ref: Option<MemoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_lap_span_ref: Option<MemoryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_round: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rounds: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Subscribes to the memory arena and rebuilds snapshots when something
/// changed.
pub struct DisplayStateHub {
    changes: Receiver<()>,
    _tx: Sender<()>,
}

impl DisplayStateHub {
    /// Attach to a runtime's memory. Every arena change sends one unit
    /// through the channel; `take_dirty` drains them.
    pub fn attach(runtime: &mut ScriptRuntime) -> Self {
        let (tx, rx) = unbounded::<()>();
        let feed = tx.clone();
        runtime.core.memory.subscribe(Arc::new(move |_, change| {
            trace!(target: "display", id = ?change.id, kind = ?change.kind, "memory change");
            let _ = feed.try_send(());
        }));
        Self {
            changes: rx,
            _tx: tx,
        }
    }

    /// True when memory changed since the last call. Drains the coalesced
    /// notifications.
    pub fn take_dirty(&self) -> bool {
        let mut dirty = false;
        loop {
            match self.changes.try_recv() {
                Ok(()) => dirty = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        dirty
    }

    /// Build the current snapshot. Pure read of runtime state.
    pub fn snapshot(&self, runtime: &ScriptRuntime) -> DisplaySnapshot {
        build_snapshot(runtime)
    }
}

/// Snapshot construction without a hub (tests, one-shot dumps).
pub fn build_snapshot(runtime: &ScriptRuntime) -> DisplaySnapshot {
    let now = runtime.core.clock.now();
    let mut timer_stack = Vec::new();
    let mut card_stack = Vec::new();
    let mut global_span_ref = None;
    let mut current_lap_span_ref = None;
    let mut current_round = None;
    let mut total_rounds = None;

    // Bottom-first so the workout-level timer leads the stack.
    let blocks: Vec<&Block> = {
        let mut topfirst: Vec<&Block> = runtime.stack().iter().collect();
        topfirst.reverse();
        topfirst
    };

    for block in blocks {
        let owner = core_runtime::OwnerKey::Block(block.key.clone());
        let buttons = block_buttons(runtime, &owner);

        let display: Option<DisplayEntry> = runtime
            .core
            .memory
            .search(&SearchCriteria {
                kind: Some(MemoryKind::Display),
                owner: Some(owner.clone()),
                visibility: None,
            })
            .into_iter()
            .find_map(|(_, entry)| match &entry.value {
                core_runtime::MemoryValue::Display(d) => Some(d.clone()),
                _ => None,
            });

        if let Some(entry) = &display
            && let Some(span_ref) = entry.span_ref
        {
            let format = clock_text(runtime, span_ref, entry, now);
            match entry.role {
                TimerRole::Workout if global_span_ref.is_none() => {
                    global_span_ref = Some(span_ref);
                }
                TimerRole::Round | TimerRole::Interval => {
                    current_lap_span_ref = Some(span_ref);
                }
                _ => {}
            }
            timer_stack.push(TimerView {
                id: block.key.to_string(),
                owner: block.key.to_string(),
                role: entry.role,
                format,
                span_ref: Some(span_ref),
                buttons: buttons.clone(),
            });
        }

        // Innermost round-state wins.
        if let Some(state) = block_round_state(runtime, &owner) {
            current_round = Some(state.current);
            total_rounds = state.total;
        }

        card_stack.push(CardView {
            id: block.key.to_string(),
            owner: block.key.to_string(),
            card_type: block.block_type.to_string(),
            title: display.as_ref().map(|d| d.title.clone()),
            subtitle: display.as_ref().and_then(|d| d.subtitle.clone()),
            metrics: block_metric_strings(runtime, &owner),
            buttons,
        });
    }

    DisplaySnapshot {
        timer_stack,
        card_stack,
        workout_state: runtime.state(),
        global_span_ref,
        current_lap_span_ref,
        current_round,
        total_rounds,
        errors: runtime
            .core
            .errors
            .iter()
            .map(|e| e.error.to_string())
            .collect(),
    }
}

fn clock_text(
    runtime: &ScriptRuntime,
    span_ref: MemoryId,
    entry: &DisplayEntry,
    now: u64,
) -> String {
    let elapsed = runtime
        .core
        .memory
        .get_raw::<Vec<core_fragment::TimeSpan>>(span_ref)
        .map(|spans| total_elapsed(&spans, now))
        .unwrap_or(0);
    match (entry.direction, entry.duration_ms) {
        (Some(TimerDirection::Down), Some(duration)) => {
            format_clock(duration.saturating_sub(elapsed))
        }
        _ => format_clock(elapsed),
    }
}

fn block_round_state(
    runtime: &ScriptRuntime,
    owner: &core_runtime::OwnerKey,
) -> Option<RoundState> {
    runtime
        .core
        .memory
        .search(&SearchCriteria {
            kind: Some(MemoryKind::RoundState),
            owner: Some(owner.clone()),
            visibility: None,
        })
        .into_iter()
        .find_map(|(_, entry)| match &entry.value {
            core_runtime::MemoryValue::Round(state) => Some(*state),
            _ => None,
        })
}

fn block_buttons(runtime: &ScriptRuntime, owner: &core_runtime::OwnerKey) -> Vec<String> {
    runtime
        .core
        .memory
        .search(&SearchCriteria {
            kind: Some(MemoryKind::Controls),
            owner: Some(owner.clone()),
            visibility: None,
        })
        .into_iter()
        .find_map(|(_, entry)| match &entry.value {
            core_runtime::MemoryValue::Controls(buttons) => Some(button_names(*buttons)),
            _ => None,
        })
        .unwrap_or_default()
}

fn button_names(buttons: ControlButtons) -> Vec<String> {
    const ALL: [(ControlButtons, &str); 6] = [
        (ControlButtons::START, "start"),
        (ControlButtons::PAUSE, "pause"),
        (ControlButtons::RESUME, "resume"),
        (ControlButtons::NEXT, "next"),
        (ControlButtons::RESET, "reset"),
        (ControlButtons::COMPLETE, "complete"),
    ];
    ALL.iter()
        .filter(|(flag, _)| buttons.contains(*flag))
        .map(|(_, name)| (*name).to_string())
        .collect()
}

/// The winning-precedence fragments of the interesting display types,
/// rendered to strings.
fn block_metric_strings(runtime: &ScriptRuntime, owner: &core_runtime::OwnerKey) -> Vec<String> {
    let fragments: Vec<Fragment> = runtime
        .core
        .memory
        .search(&SearchCriteria {
            kind: Some(MemoryKind::Fragment),
            owner: Some(owner.clone()),
            visibility: None,
        })
        .into_iter()
        .find_map(|(_, entry)| match &entry.value {
            core_runtime::MemoryValue::Fragments(fragments) => Some(fragments.clone()),
            _ => None,
        })
        .unwrap_or_default();

    const SHOWN: [FragmentType; 5] = [
        FragmentType::Rep,
        FragmentType::Effort,
        FragmentType::Resistance,
        FragmentType::Distance,
        FragmentType::CurrentRound,
    ];
    let mut out = Vec::new();
    for ty in SHOWN {
        for fragment in resolve_fragments(&fragments, ty) {
            out.push(fragment.display());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_compiler::JitCompiler;
    use core_runtime::RuntimeCommand;
    use core_script::parse;
    use std::sync::Arc as StdArc;

    fn runtime(text: &str) -> ScriptRuntime {
        ScriptRuntime::new(parse(text), StdArc::new(JitCompiler::standard()))
    }

    #[test]
    fn snapshot_reflects_stack_and_round_progress() {
        let mut rt = runtime("(3)\n  21 Thrusters 95lb\n  15 Pullups");
        rt.start(0);
        let snapshot = build_snapshot(&rt);
        assert_eq!(snapshot.workout_state, WorkoutState::Running);
        assert_eq!(snapshot.card_stack.len(), 3, "root, rounds, effort");
        assert_eq!(snapshot.current_round, Some(1));
        assert_eq!(snapshot.total_rounds, Some(3));
        assert!(snapshot.global_span_ref.is_some(), "workout clock surfaced");
        let effort_card = snapshot.card_stack.last().expect("effort card");
        assert_eq!(effort_card.card_type, "Effort");
        assert!(
            effort_card.metrics.iter().any(|m| m == "Thrusters"),
            "effort fragment shown: {:?}",
            effort_card.metrics
        );
        assert!(effort_card.metrics.iter().any(|m| m == "95lb"));
    }

    #[test]
    fn countdown_timer_formats_remaining() {
        let mut rt = runtime("10:00 AMRAP\n  5 Pullups");
        rt.start(0);
        rt.tick(60_000);
        let snapshot = build_snapshot(&rt);
        // Bottom-first: the root's count-up clock leads, the AMRAP
        // countdown follows it.
        let amrap_timer = snapshot
            .timer_stack
            .iter()
            .filter(|t| t.role == TimerRole::Workout)
            .next_back()
            .expect("amrap countdown");
        assert_eq!(amrap_timer.format, "9:00");
    }

    #[test]
    fn hub_reports_dirty_after_changes_and_coalesces() {
        let mut rt = runtime("30 Situps");
        let hub = DisplayStateHub::attach(&mut rt);
        assert!(!hub.take_dirty(), "clean before start");
        rt.start(0);
        assert!(hub.take_dirty(), "start mutated memory");
        assert!(!hub.take_dirty(), "drained in one take");
        rt.dispatch(RuntimeCommand::Next, 1_000);
        assert!(hub.take_dirty());
        let snapshot = hub.snapshot(&rt);
        assert_eq!(snapshot.workout_state, WorkoutState::Complete);
        assert!(snapshot.card_stack.is_empty());
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let mut rt = runtime("EMOM 2\n  5 Burpees");
        rt.start(0);
        let snapshot = build_snapshot(&rt);
        let json = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(json["workout_state"], "running");
        assert!(json["timer_stack"].as_array().expect("timers").len() >= 2);
    }
}
