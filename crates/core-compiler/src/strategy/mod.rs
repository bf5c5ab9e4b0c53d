//! Strategy trait and the shared block assembly helpers.
//!
//! A strategy pairs a shape test (`matches`) with a constructor
//! (`compile`). Construction order is fixed by contract: mint the key,
//! allocate every memory entry through a fresh `BlockContext`, build the
//! behaviors around the allocated refs, return the block. Nothing defers
//! allocation to mount.

use core_behaviors::SoundCue;
use core_fragment::{
    Fragment, FragmentOrigin, FragmentType, FragmentValue, MetricValues, TimeSpan,
};
use core_runtime::{
    Block, BlockContext, CompilationContext, CompileError, CompletionStatus, ControlButtons,
    DisplayEntry, MemoryKind, MemoryRef, TimerDirection, TimerRole, Visibility, VmCore,
};
use core_script::{CodeStatement, render_statement};

pub mod effort;
pub mod group;
pub mod interval;
pub mod rounds;
pub mod time_bound;
pub mod timer;

pub use effort::EffortStrategy;
pub use group::GroupStrategy;
pub use interval::IntervalStrategy;
pub use rounds::RoundsStrategy;
pub use time_bound::TimeBoundRoundsStrategy;
pub use timer::TimerStrategy;

/// Countdown blocks shorter than this skip sound cues entirely.
const MIN_CUE_DURATION_MS: u64 = 4_000;

/// Compile-time knobs threaded from configuration into the strategies.
#[derive(Debug, Clone, Default)]
pub struct StrategyOptions {
    /// Countdown cue thresholds (remaining ms). `None` takes the 3-2-1
    /// default; an empty list disables cues.
    pub cue_leads: Option<Vec<u64>>,
}

impl StrategyOptions {
    fn leads(&self) -> Vec<u64> {
        self.cue_leads
            .clone()
            .unwrap_or_else(|| vec![3_000, 2_000, 1_000])
    }
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Shape test against the statement group (the primary statement
    /// leads).
    fn matches(&self, statements: &[&CodeStatement]) -> bool;

    fn compile(
        &self,
        statements: &[&CodeStatement],
        vm: &mut VmCore,
        context: &CompilationContext,
    ) -> Result<Block, CompileError>;
}

/// Partially assembled block: key, context and the refs every block gets
/// (completion flag plus the compiled fragment entry).
pub struct BlockParts {
    pub context: BlockContext,
    pub completion: MemoryRef<CompletionStatus>,
    pub fragments: MemoryRef<Vec<Fragment>>,
}

/// Mint the key and allocate the universal entries. The fragment entry
/// receives every parsed fragment of the statement group plus any
/// compiler-origin overrides derived from the parent context, so compiled
/// data is never silently dropped between parse and runtime.
pub fn begin_block(
    kind_tag: &str,
    statements: &[&CodeStatement],
    vm: &mut VmCore,
    context: &CompilationContext,
) -> BlockParts {
    let key = vm.mint_block_key(kind_tag);
    let mut block_context = BlockContext::new(key.clone());
    let completion = block_context.allocate(
        &mut vm.memory,
        MemoryKind::CompletionStatus,
        CompletionStatus::InProgress,
        Visibility::Public,
    );

    let mut fragments: Vec<Fragment> = Vec::new();
    for statement in statements {
        fragments.extend(statement.fragments.iter().cloned());
    }
    if let Some(reps) = context.reps {
        // Rep count imposed by the parent loop (rep schemes); compiler
        // origin out-ranks the parsed count.
        let mut fragment =
            Fragment::with_origin(FragmentValue::Rep { count: reps }, FragmentOrigin::Compiler);
        fragment.owner = Some(key.to_string());
        fragments.push(fragment);
    }
    for fragment in &mut fragments {
        fragment.owner.get_or_insert_with(|| key.to_string());
    }
    let fragments = block_context.allocate(
        &mut vm.memory,
        MemoryKind::Fragment,
        fragments,
        Visibility::Public,
    );

    BlockParts {
        context: block_context,
        completion,
        fragments,
    }
}

/// Allocate the `timer-spans` + `timer-running` pair.
pub fn timer_state(
    parts: &mut BlockParts,
    vm: &mut VmCore,
) -> (MemoryRef<Vec<TimeSpan>>, MemoryRef<bool>) {
    let spans = parts.context.allocate(
        &mut vm.memory,
        MemoryKind::TimerSpans,
        Vec::<TimeSpan>::new(),
        Visibility::Public,
    );
    let running = parts.context.allocate(
        &mut vm.memory,
        MemoryKind::TimerRunning,
        false,
        Visibility::Public,
    );
    (spans, running)
}

/// Publish the block's display entry.
pub fn display(
    parts: &mut BlockParts,
    vm: &mut VmCore,
    title: String,
    subtitle: Option<String>,
    role: TimerRole,
    spans: Option<MemoryRef<Vec<TimeSpan>>>,
    duration_ms: Option<u64>,
    direction: Option<TimerDirection>,
) {
    let entry = DisplayEntry {
        title,
        subtitle,
        role,
        span_ref: spans.map(|r| r.id()),
        duration_ms,
        direction,
    };
    parts
        .context
        .allocate(&mut vm.memory, MemoryKind::Display, entry, Visibility::Public);
}

/// Publish the block's control buttons.
pub fn controls(parts: &mut BlockParts, vm: &mut VmCore, buttons: ControlButtons) {
    parts
        .context
        .allocate(&mut vm.memory, MemoryKind::Controls, buttons, Visibility::Public);
}

/// Sound cues for countdown blocks long enough to hear them.
pub fn countdown_cues(
    spans: MemoryRef<Vec<TimeSpan>>,
    duration_ms: u64,
    options: &StrategyOptions,
) -> Option<SoundCue> {
    let leads = options.leads();
    (duration_ms >= MIN_CUE_DURATION_MS && !leads.is_empty())
        .then(|| SoundCue::new(spans, duration_ms, leads))
}

/// Canonical single-line label for a statement group.
pub fn label_of(statements: &[&CodeStatement]) -> String {
    let rendered: Vec<String> = statements
        .iter()
        .map(|s| render_statement(s).trim().to_string())
        .collect();
    rendered.join(" + ")
}

/// Target duration carried by the statement (parser or hinted timer).
pub fn statement_timer_ms(statement: &CodeStatement) -> Option<u64> {
    statement.fragments_of(FragmentType::Timer).find_map(|f| {
        match f.value {
            FragmentValue::Timer { ms } => Some(ms),
            _ => None,
        }
    })
}

/// Rounds fragment on the statement, if any.
pub fn statement_rounds(statement: &CodeStatement) -> Option<&core_fragment::RoundsSpec> {
    statement
        .fragments_of(FragmentType::Rounds)
        .find_map(|f| match &f.value {
            FragmentValue::Rounds(spec) => Some(spec),
            _ => None,
        })
}

/// Metrics template for a leaf: rep count (context override first), load
/// and distance from the statement.
pub fn leaf_metrics(statements: &[&CodeStatement], context: &CompilationContext) -> MetricValues {
    let mut metrics = MetricValues::default();
    metrics.reps = context.reps.or_else(|| {
        statements.iter().find_map(|s| {
            s.fragments_of(FragmentType::Rep).find_map(|f| match f.value {
                FragmentValue::Rep { count } => Some(count),
                _ => None,
            })
        })
    });
    metrics.weight = statements.iter().find_map(|s| {
        s.fragments_of(FragmentType::Resistance)
            .find_map(|f| match &f.value {
                FragmentValue::Resistance(load) => Some(load.amount),
                _ => None,
            })
    });
    metrics.distance = statements.iter().find_map(|s| {
        s.fragments_of(FragmentType::Distance)
            .find_map(|f| match &f.value {
                FragmentValue::Distance(d) => Some(d.amount),
                _ => None,
            })
    });
    metrics
}

/// Effort name shown on cards, falling back through context and fragments.
pub fn effort_title(statements: &[&CodeStatement], context: &CompilationContext) -> String {
    if let Some(effort) = &context.effort {
        return effort.clone();
    }
    let names: Vec<String> = statements
        .iter()
        .filter_map(|s| {
            s.fragments_of(FragmentType::Effort).find_map(|f| match &f.value {
                FragmentValue::Effort { name } => Some(name.clone()),
                _ => None,
            })
        })
        .collect();
    if names.is_empty() {
        label_of(statements)
    } else {
        names.join(" + ")
    }
}
