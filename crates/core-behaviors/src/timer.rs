//! Timer behaviors: span bookkeeping, pause/resume, countdown completion.
//!
//! All timer state lives in two memory entries allocated by the owning
//! strategy (`timer-spans`, `timer-running`); the behaviors share the refs
//! and never talk to each other directly. At most one open span exists per
//! block at any instant: spans open through `StartTimer` and close through
//! `StopTimer`, both idempotent against double fires.

use core_fragment::{TimeSpan, total_elapsed};
use core_runtime::{
    Action, Behavior, BehaviorContext, CompletionStatus, MemoryRef, RuntimeEvent, TimerDirection,
    names,
};
use tracing::{debug, trace};

/// Starts the block's clock at mount: opens the first time span and raises
/// the running flag. Direction and target duration were fixed at
/// compilation; this behavior only brings the allocated state to life.
pub struct TimerInit {
    spans: MemoryRef<Vec<TimeSpan>>,
    running: MemoryRef<bool>,
}

impl TimerInit {
    pub fn new(spans: MemoryRef<Vec<TimeSpan>>, running: MemoryRef<bool>) -> Self {
        Self { spans, running }
    }
}

impl Behavior for TimerInit {
    fn name(&self) -> &'static str {
        "timer-init"
    }

    fn on_mount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        ctx.set(self.running, true);
        vec![Action::StartTimer(self.spans)]
    }
}

/// Keeps the span list honest across the block's life: closes the open
/// span when the block unmounts so a popped block never leaves a dangling
/// open interval.
pub struct TimerTick {
    spans: MemoryRef<Vec<TimeSpan>>,
    running: MemoryRef<bool>,
}

impl TimerTick {
    pub fn new(spans: MemoryRef<Vec<TimeSpan>>, running: MemoryRef<bool>) -> Self {
        Self { spans, running }
    }
}

impl Behavior for TimerTick {
    fn name(&self) -> &'static str {
        "timer-tick"
    }

    fn on_event(&mut self, event: &RuntimeEvent, _ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if event.name == names::TIMER_TICK {
            trace!(target: "runtime.clock", elapsed = event.elapsed_ms(), "tick observed");
        }
        Vec::new()
    }

    fn on_unmount(&mut self, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        ctx.set(self.running, false);
        vec![Action::StopTimer(self.spans)]
    }
}

/// Pause gating: closes the current span on `runtime:pause`, opens a fresh
/// one on `runtime:resume`. Elapsed time therefore excludes the pause.
pub struct TimerPause {
    spans: MemoryRef<Vec<TimeSpan>>,
    running: MemoryRef<bool>,
}

impl TimerPause {
    pub fn new(spans: MemoryRef<Vec<TimeSpan>>, running: MemoryRef<bool>) -> Self {
        Self { spans, running }
    }
}

impl Behavior for TimerPause {
    fn name(&self) -> &'static str {
        "timer-pause"
    }

    fn on_event(&mut self, event: &RuntimeEvent, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        match event.name.as_str() {
            name if name == names::RUNTIME_PAUSE => {
                ctx.set(self.running, false);
                vec![Action::StopTimer(self.spans)]
            }
            name if name == names::RUNTIME_RESUME => {
                ctx.set(self.running, true);
                vec![Action::StartTimer(self.spans)]
            }
            _ => Vec::new(),
        }
    }
}

/// Countdown completion: on every tick, compare accumulated span time with
/// the target duration and mark the block complete when it expires. Only
/// meaningful for `TimerDirection::Down`; count-up blocks never
/// self-complete.
pub struct TimerCompletion {
    spans: MemoryRef<Vec<TimeSpan>>,
    completion: MemoryRef<CompletionStatus>,
    duration_ms: u64,
    direction: TimerDirection,
}

impl TimerCompletion {
    pub fn new(
        spans: MemoryRef<Vec<TimeSpan>>,
        completion: MemoryRef<CompletionStatus>,
        duration_ms: u64,
        direction: TimerDirection,
    ) -> Self {
        Self {
            spans,
            completion,
            duration_ms,
            direction,
        }
    }

    fn expired(&self, ctx: &BehaviorContext<'_>) -> bool {
        let Some(spans) = ctx.get(self.spans) else {
            return false;
        };
        total_elapsed(&spans, ctx.now()) >= self.duration_ms
    }
}

impl Behavior for TimerCompletion {
    fn name(&self) -> &'static str {
        "timer-completion"
    }

    fn on_event(&mut self, event: &RuntimeEvent, ctx: &mut BehaviorContext<'_>) -> Vec<Action> {
        if event.name != names::TIMER_TICK || self.direction != TimerDirection::Down {
            return Vec::new();
        }
        if ctx.get(self.completion) != Some(CompletionStatus::InProgress) {
            return Vec::new();
        }
        if !self.expired(ctx) {
            return Vec::new();
        }
        debug!(target: "runtime.clock", block = %ctx.key, target_ms = self.duration_ms, "countdown expired");
        ctx.set(self.completion, CompletionStatus::Complete);
        vec![Action::EmitEvent(RuntimeEvent::new(
            names::TIMER_COMPLETE,
            ctx.now(),
        ))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_runtime::{
        Block, BlockCompiler, BlockContext, CompilationContext, CompileError, MemoryKind,
        ScriptRuntime, Visibility, VmCore,
    };
    use core_script::{StatementId, parse};
    use std::sync::Arc;

    /// Compiles a single countdown block; enough runtime to drive ticks.
    struct CountdownCompiler {
        duration_ms: u64,
    }

    impl BlockCompiler for CountdownCompiler {
        fn compile_ids(
            &self,
            _ids: &[StatementId],
            vm: &mut VmCore,
            _context: &CompilationContext,
        ) -> Result<Block, CompileError> {
            self.compile_root(vm)
        }

        fn compile_root(&self, vm: &mut VmCore) -> Result<Block, CompileError> {
            let key = vm.mint_block_key("timer");
            let mut context = BlockContext::new(key);
            let completion = context.allocate(
                &mut vm.memory,
                MemoryKind::CompletionStatus,
                CompletionStatus::InProgress,
                Visibility::Public,
            );
            let spans = context.allocate(
                &mut vm.memory,
                MemoryKind::TimerSpans,
                Vec::<TimeSpan>::new(),
                Visibility::Public,
            );
            let running = context.allocate(
                &mut vm.memory,
                MemoryKind::TimerRunning,
                false,
                Visibility::Public,
            );
            let behaviors: Vec<Box<dyn Behavior>> = vec![
                Box::new(TimerInit::new(spans, running)),
                Box::new(TimerTick::new(spans, running)),
                Box::new(TimerPause::new(spans, running)),
                Box::new(TimerCompletion::new(
                    spans,
                    completion,
                    self.duration_ms,
                    TimerDirection::Down,
                )),
            ];
            Ok(Block::new(
                context,
                Vec::new(),
                "timer",
                "timer".to_string(),
                completion,
                behaviors,
            ))
        }
    }

    fn countdown_runtime(duration_ms: u64) -> ScriptRuntime {
        ScriptRuntime::new(parse("2:00"), Arc::new(CountdownCompiler { duration_ms }))
    }

    #[test]
    fn mount_opens_exactly_one_span() {
        let mut rt = countdown_runtime(120_000);
        rt.start(0);
        assert_eq!(rt.stack().len(), 1, "timer mounted");
        let spans_ref = rt
            .core
            .memory
            .search(&core_runtime::SearchCriteria::of_kind(MemoryKind::TimerSpans))
            .into_iter()
            .next()
            .map(|(id, _)| id)
            .expect("spans entry");
        let spans: Vec<TimeSpan> = rt.core.memory.get_raw(spans_ref).expect("live");
        assert_eq!(spans.len(), 1);
        assert!(spans[0].is_open());
    }

    #[test]
    fn countdown_completes_at_target() {
        let mut rt = countdown_runtime(120_000);
        rt.start(0);
        rt.tick(119_900);
        assert_eq!(rt.stack().len(), 1, "still running just before target");
        rt.tick(120_000);
        assert_eq!(rt.stack().len(), 0, "expired timer pops");
        assert!(rt.is_complete());
    }

    #[test]
    fn pause_freezes_countdown_progress() {
        let mut rt = countdown_runtime(10_000);
        rt.start(0);
        rt.tick(4_000);
        rt.dispatch(core_runtime::RuntimeCommand::Pause, 5_000);
        // A long pause; target would have long passed in wall time.
        rt.dispatch(core_runtime::RuntimeCommand::Resume, 60_000);
        rt.tick(61_000);
        assert_eq!(
            rt.stack().len(),
            1,
            "only 6s of running time accrued, timer still live"
        );
        rt.tick(65_000);
        assert!(rt.is_complete(), "5s before pause + 5s after reaches the 10s target");
    }

    #[test]
    fn unmount_closes_open_span() {
        let mut rt = countdown_runtime(1_000);
        rt.start(0);
        rt.tick(1_000);
        // Block popped; its memory is released, and before release the
        // span was closed by StopTimer (observable through the log having
        // no open spans and memory being empty).
        assert_eq!(rt.core.memory.live_entries(), 0);
        assert!(rt.core.log.active().is_empty());
    }
}
