//! Fragment model: typed semantic tokens flowing from the parser through the
//! compiler into runtime memory, plus the origin precedence rules consumers
//! use to decide which fragment of a given type to surface.
//!
//! This crate is the leaf data crate of the workspace; it has no knowledge of
//! statements, blocks or the runtime. Everything here is `serde`-visible
//! because fragments end up in display snapshots and persisted history.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod metrics;

pub use metrics::MetricValues;

/// A single measured time interval, epoch milliseconds. This is the one
/// canonical span type used by the clock, timer memory and execution log.
///
/// Invariants:
/// * `ended`, when present, is >= `started`.
/// * An open span is exactly one with `ended == None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub started: u64,
    pub ended: Option<u64>,
}

impl TimeSpan {
    pub fn open(started: u64) -> Self {
        Self {
            started,
            ended: None,
        }
    }

    pub fn closed(started: u64, ended: u64) -> Self {
        debug_assert!(ended >= started, "span must not end before it starts");
        Self {
            started,
            ended: Some(ended),
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended.is_none()
    }

    /// Duration in milliseconds; open spans measure up to `now`.
    pub fn duration(&self, now: u64) -> u64 {
        self.ended.unwrap_or(now).saturating_sub(self.started)
    }
}

/// Sum the durations of a span list, measuring open spans against `now`.
pub fn total_elapsed(spans: &[TimeSpan], now: u64) -> u64 {
    spans.iter().map(|s| s.duration(now)).sum()
}

/// Where a fragment came from. Origin decides precedence when multiple
/// fragments of the same type compete for display (see `precedence_tier`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentOrigin {
    Parser,
    Compiler,
    Runtime,
    User,
    Collected,
    Hinted,
    Tracked,
    Analyzed,
}

impl FragmentOrigin {
    /// Precedence tier, lower wins. User-entered and collected data beats
    /// live runtime data, which beats compiler hints, which beat the raw
    /// parse.
    pub fn precedence_tier(self) -> u8 {
        match self {
            FragmentOrigin::User | FragmentOrigin::Collected => 0,
            FragmentOrigin::Runtime | FragmentOrigin::Tracked | FragmentOrigin::Analyzed => 1,
            FragmentOrigin::Compiler | FragmentOrigin::Hinted => 2,
            FragmentOrigin::Parser => 3,
        }
    }
}

/// Discriminant-only view of a fragment, used for memory search criteria and
/// precedence grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FragmentType {
    Timer,
    Rep,
    Effort,
    Resistance,
    Distance,
    Rounds,
    Action,
    Lap,
    CurrentRound,
    Elapsed,
    Total,
    Spans,
    Sound,
    SystemTime,
    Text,
    Group,
    Increment,
}

/// Child-grouping operator attached to a statement line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LapKind {
    /// `-` prefix: statement forms its own round group.
    Round,
    /// `+` prefix: statement composes with the preceding group.
    Compose,
    /// No prefix: statement repeats as its own group.
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadUnit {
    /// Pounds; also produced by the bare `#` suffix.
    Lb,
    Kg,
}

impl fmt::Display for LoadUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadUnit::Lb => write!(f, "lb"),
            LoadUnit::Kg => write!(f, "kg"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadValue {
    pub amount: f64,
    pub unit: LoadUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    M,
    Km,
    Mi,
    Ft,
    Yd,
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DistanceUnit::M => "m",
            DistanceUnit::Km => "km",
            DistanceUnit::Mi => "mi",
            DistanceUnit::Ft => "ft",
            DistanceUnit::Yd => "yd",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceValue {
    pub amount: f64,
    pub unit: DistanceUnit,
}

/// Round grouping parsed from `(3)` or `(21-15-9)`. A rep scheme implies
/// `total == rep_scheme.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundsSpec {
    pub total: u32,
    pub rep_scheme: Option<Vec<u32>>,
}

impl RoundsSpec {
    pub fn fixed(total: u32) -> Self {
        Self {
            total,
            rep_scheme: None,
        }
    }

    pub fn scheme(reps: Vec<u32>) -> Self {
        Self {
            total: reps.len() as u32,
            rep_scheme: Some(reps),
        }
    }
}

/// Live round progress written by the runtime (1-based `current`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundProgress {
    pub current: u32,
    pub total: Option<u32>,
}

/// The typed payload of a fragment; one variant per `FragmentType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FragmentValue {
    Timer { ms: u64 },
    Rep { count: u32 },
    Effort { name: String },
    Resistance(LoadValue),
    Distance(DistanceValue),
    Rounds(RoundsSpec),
    Action { name: String },
    Lap { kind: LapKind },
    CurrentRound(RoundProgress),
    Elapsed { ms: u64 },
    Total { ms: u64 },
    Spans { spans: Vec<TimeSpan> },
    Sound { cue: String },
    SystemTime { at: u64 },
    Text { text: String },
    Group { label: String },
    Increment { delta: i32 },
}

impl FragmentValue {
    pub fn fragment_type(&self) -> FragmentType {
        match self {
            FragmentValue::Timer { .. } => FragmentType::Timer,
            FragmentValue::Rep { .. } => FragmentType::Rep,
            FragmentValue::Effort { .. } => FragmentType::Effort,
            FragmentValue::Resistance(_) => FragmentType::Resistance,
            FragmentValue::Distance(_) => FragmentType::Distance,
            FragmentValue::Rounds(_) => FragmentType::Rounds,
            FragmentValue::Action { .. } => FragmentType::Action,
            FragmentValue::Lap { .. } => FragmentType::Lap,
            FragmentValue::CurrentRound(_) => FragmentType::CurrentRound,
            FragmentValue::Elapsed { .. } => FragmentType::Elapsed,
            FragmentValue::Total { .. } => FragmentType::Total,
            FragmentValue::Spans { .. } => FragmentType::Spans,
            FragmentValue::Sound { .. } => FragmentType::Sound,
            FragmentValue::SystemTime { .. } => FragmentType::SystemTime,
            FragmentValue::Text { .. } => FragmentType::Text,
            FragmentValue::Group { .. } => FragmentType::Group,
            FragmentValue::Increment { .. } => FragmentType::Increment,
        }
    }
}

/// Position of a token in the original workout text (0-based line, byte
/// column within the line).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// One semantic datum. Carries its payload, origin, optional source
/// location, optional owning block key and optional capture timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub value: FragmentValue,
    pub origin: FragmentOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourcePos>,
    /// BlockKey of the owning runtime block, once one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Epoch ms at which a runtime-originated fragment was captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<u64>,
}

impl Fragment {
    pub fn parsed(value: FragmentValue, source: SourcePos) -> Self {
        Self {
            value,
            origin: FragmentOrigin::Parser,
            source: Some(source),
            owner: None,
            at: None,
        }
    }

    pub fn with_origin(value: FragmentValue, origin: FragmentOrigin) -> Self {
        Self {
            value,
            origin,
            source: None,
            owner: None,
            at: None,
        }
    }

    pub fn fragment_type(&self) -> FragmentType {
        self.value.fragment_type()
    }

    /// Human-readable rendering used by display snapshots and logs.
    pub fn display(&self) -> String {
        match &self.value {
            FragmentValue::Timer { ms } => format_clock(*ms),
            FragmentValue::Rep { count } => count.to_string(),
            FragmentValue::Effort { name } => name.clone(),
            FragmentValue::Resistance(load) => format!("{}{}", trim_amount(load.amount), load.unit),
            FragmentValue::Distance(d) => format!("{}{}", trim_amount(d.amount), d.unit),
            FragmentValue::Rounds(spec) => match &spec.rep_scheme {
                Some(reps) => {
                    let joined = reps
                        .iter()
                        .map(|r| r.to_string())
                        .collect::<Vec<_>>()
                        .join("-");
                    format!("({joined})")
                }
                None => format!("({})", spec.total),
            },
            FragmentValue::Action { name } => name.clone(),
            FragmentValue::Lap { kind } => match kind {
                LapKind::Round => "-".to_string(),
                LapKind::Compose => "+".to_string(),
                LapKind::Repeat => String::new(),
            },
            FragmentValue::CurrentRound(p) => match p.total {
                Some(total) => format!("{}/{}", p.current, total),
                None => p.current.to_string(),
            },
            FragmentValue::Elapsed { ms } | FragmentValue::Total { ms } => format_clock(*ms),
            FragmentValue::Spans { spans } => format!("{} span(s)", spans.len()),
            FragmentValue::Sound { cue } => cue.clone(),
            FragmentValue::SystemTime { at } => at.to_string(),
            FragmentValue::Text { text } => text.clone(),
            FragmentValue::Group { label } => label.clone(),
            FragmentValue::Increment { delta } => format!("{delta:+}"),
        }
    }
}

/// Render milliseconds as right-aligned clock text (`mm:ss`, growing to
/// `h:mm:ss` and `d:hh:mm:ss` as needed).
pub fn format_clock(ms: u64) -> String {
    let total_secs = ms / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = (total_secs / 3600) % 24;
    let days = total_secs / 86_400;
    if days > 0 {
        format!("{days}:{hours:02}:{mins:02}:{secs:02}")
    } else if hours > 0 {
        format!("{hours}:{mins:02}:{secs:02}")
    } else {
        format!("{mins}:{secs:02}")
    }
}

fn trim_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{}", amount as i64)
    } else {
        format!("{amount}")
    }
}

/// Resolve the fragments of `ty` that consumers should surface: every
/// fragment in the best (lowest) precedence tier present, in input order.
/// Sibling fragments within the winning tier are all preserved, so a
/// 21-15-9 rep scheme keeps its three parser Rep fragments together.
pub fn resolve_fragments<'a>(fragments: &'a [Fragment], ty: FragmentType) -> Vec<&'a Fragment> {
    let best = fragments
        .iter()
        .filter(|f| f.fragment_type() == ty)
        .map(|f| f.origin.precedence_tier())
        .min();
    match best {
        Some(tier) => fragments
            .iter()
            .filter(|f| f.fragment_type() == ty && f.origin.precedence_tier() == tier)
            .collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frag(value: FragmentValue, origin: FragmentOrigin) -> Fragment {
        Fragment::with_origin(value, origin)
    }

    #[test]
    fn tier_ordering_matches_contract() {
        assert_eq!(FragmentOrigin::User.precedence_tier(), 0);
        assert_eq!(FragmentOrigin::Collected.precedence_tier(), 0);
        assert_eq!(FragmentOrigin::Runtime.precedence_tier(), 1);
        assert_eq!(FragmentOrigin::Tracked.precedence_tier(), 1);
        assert_eq!(FragmentOrigin::Analyzed.precedence_tier(), 1);
        assert_eq!(FragmentOrigin::Compiler.precedence_tier(), 2);
        assert_eq!(FragmentOrigin::Hinted.precedence_tier(), 2);
        assert_eq!(FragmentOrigin::Parser.precedence_tier(), 3);
    }

    #[test]
    fn resolution_picks_best_tier_only() {
        let frags = vec![
            frag(FragmentValue::Rep { count: 21 }, FragmentOrigin::Parser),
            frag(FragmentValue::Rep { count: 18 }, FragmentOrigin::Runtime),
            frag(FragmentValue::Rep { count: 20 }, FragmentOrigin::User),
        ];
        let resolved = resolve_fragments(&frags, FragmentType::Rep);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].value, FragmentValue::Rep { count: 20 });
    }

    #[test]
    fn resolution_keeps_all_siblings_in_winning_tier() {
        // 21-15-9 parses to three sibling Rep fragments in the parser tier.
        let frags = vec![
            frag(FragmentValue::Rep { count: 21 }, FragmentOrigin::Parser),
            frag(FragmentValue::Rep { count: 15 }, FragmentOrigin::Parser),
            frag(FragmentValue::Rep { count: 9 }, FragmentOrigin::Parser),
        ];
        let resolved = resolve_fragments(&frags, FragmentType::Rep);
        let counts: Vec<u32> = resolved
            .iter()
            .map(|f| match f.value {
                FragmentValue::Rep { count } => count,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(counts, vec![21, 15, 9]);
    }

    #[test]
    fn resolution_ignores_other_types() {
        let frags = vec![
            frag(
                FragmentValue::Effort {
                    name: "Thrusters".into(),
                },
                FragmentOrigin::Parser,
            ),
            frag(FragmentValue::Rep { count: 5 }, FragmentOrigin::Parser),
        ];
        assert!(resolve_fragments(&frags, FragmentType::Timer).is_empty());
        assert_eq!(resolve_fragments(&frags, FragmentType::Effort).len(), 1);
    }

    #[test]
    fn timespan_duration_open_and_closed() {
        let open = TimeSpan::open(1_000);
        assert!(open.is_open());
        assert_eq!(open.duration(4_500), 3_500);
        let closed = TimeSpan::closed(1_000, 2_000);
        assert!(!closed.is_open());
        // `now` is ignored once the span is closed.
        assert_eq!(closed.duration(99_999), 1_000);
    }

    #[test]
    fn total_elapsed_sums_mixed_spans() {
        let spans = vec![TimeSpan::closed(0, 500), TimeSpan::open(1_000)];
        assert_eq!(total_elapsed(&spans, 1_400), 900);
    }

    #[test]
    fn clock_formatting_right_aligned() {
        assert_eq!(format_clock(0), "0:00");
        assert_eq!(format_clock(90_000), "1:30");
        assert_eq!(format_clock(600_000), "10:00");
        assert_eq!(format_clock(3_661_000), "1:01:01");
        assert_eq!(format_clock(90_061_000), "1:01:01:01");
    }

    #[test]
    fn fragment_serde_round_trip() {
        let f = Fragment::parsed(
            FragmentValue::Resistance(LoadValue {
                amount: 95.0,
                unit: LoadUnit::Lb,
            }),
            SourcePos::new(1, 13),
        );
        let json = serde_json::to_string(&f).expect("serialize");
        let back: Fragment = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, f);
    }

    #[test]
    fn display_rendering() {
        assert_eq!(
            frag(FragmentValue::Timer { ms: 600_000 }, FragmentOrigin::Parser).display(),
            "10:00"
        );
        assert_eq!(
            frag(
                FragmentValue::Rounds(RoundsSpec::scheme(vec![21, 15, 9])),
                FragmentOrigin::Parser
            )
            .display(),
            "(21-15-9)"
        );
        assert_eq!(
            frag(
                FragmentValue::Resistance(LoadValue {
                    amount: 95.0,
                    unit: LoadUnit::Lb,
                }),
                FragmentOrigin::Parser
            )
            .display(),
            "95lb"
        );
    }
}
