//! Countdown sound cues.
//!
//! Watches the block's accumulated span time on every tick and emits one
//! `sound:cue` event (plus a log milestone) per configured lead before the
//! target expires. Cues are data: consumers decide what noise "3" makes.

use core_fragment::{TimeSpan, total_elapsed};
use core_runtime::{
    Action, Behavior, BehaviorContext, EventPayload, MemoryRef, RuntimeEvent, names,
};
use tracing::trace;

pub struct SoundCue {
    spans: MemoryRef<Vec<TimeSpan>>,
    duration_ms: u64,
    /// Remaining-ms thresholds, largest first (e.g. [3000, 2000, 1000]).
    leads: Vec<u64>,
    fired: Vec<bool>,
}

impl SoundCue {
    pub fn new(spans: MemoryRef<Vec<TimeSpan>>, duration_ms: u64, mut leads: Vec<u64>) -> Self {
        leads.sort_unstable_by(|a, b| b.cmp(a));
        let fired = vec![false; leads.len()];
        Self {
            spans,
            duration_ms,
            leads,
            fired,
        }
    }

    /// Conventional 3-2-1 countdown.
    pub fn three_two_one(spans: MemoryRef<Vec<TimeSpan>>, duration_ms: u64) -> Self {
        Self::new(spans, duration_ms, vec![3_000, 2_000, 1_000])
    }
}

impl Behavior for SoundCue {
    fn name(&self) -> &'static str {
        "sound-cue"
    }

    fn on_event(&mut self, event: &RuntimeEvent, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if event.name != names::TIMER_TICK {
            return Vec::new();
        }
        let Some(spans) = ctx.get(self.spans) else {
            return Vec::new();
        };
        let elapsed = total_elapsed(&spans, ctx.now());
        let remaining = self.duration_ms.saturating_sub(elapsed);
        if elapsed >= self.duration_ms {
            return Vec::new();
        }
        let mut actions = Vec::new();
        for (lead, fired) in self.leads.iter().zip(self.fired.iter_mut()) {
            if !*fired && remaining <= *lead {
                *fired = true;
                let cue = (lead / 1_000).to_string();
                trace!(target: "runtime.clock", block = %ctx.key, cue = %cue, "sound cue");
                actions.push(Action::timestamp(names::SOUND_CUE, cue.clone()));
                actions.push(Action::EmitEvent(RuntimeEvent::with_payload(
                    names::SOUND_CUE,
                    ctx.now(),
                    EventPayload::Sound { cue },
                )));
            }
        }
        actions
    }
}
