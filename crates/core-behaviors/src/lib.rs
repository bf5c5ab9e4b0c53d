//! The behavior library: composable units of block semantics.
//!
//! Strategies assemble blocks from these parts, injecting the memory refs
//! they allocated. Behaviors hold refs and private state only; they reach
//! the wider runtime exclusively through their hook context and the
//! actions they return.
//!
//! Ordering matters and is part of each behavior's contract (see
//! `rounds`): a typical loop block registers
//! `[TimerInit?, RoundInit, RoundCompletion, LoopCoordinator, RoundAdvance,
//! RoundOutput, SegmentOutput, HistoryRecord]`.

mod control;
mod history;
mod looping;
mod output;
mod rounds;
mod sound;
mod timer;

pub use control::PopOnEvent;
pub use history::HistoryRecord;
pub use looping::{ChildRunner, LoopCoordinator, LoopKind};
pub use output::{RoundOutput, SegmentOutput};
pub use rounds::{RoundAdvance, RoundCompletion, RoundInit};
pub use sound::SoundCue;
pub use timer::{TimerCompletion, TimerInit, TimerPause, TimerTick};
