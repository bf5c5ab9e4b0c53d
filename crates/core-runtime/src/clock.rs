//! Workout clock.
//!
//! The clock never drives time itself: an external tick source (the binary's
//! tokio interval, or a virtual driver in tests) advances `now` and the
//! runtime turns each advance into a `timer:tick` event. Pausing closes the
//! open span; resuming opens a new one, so `elapsed` naturally excludes
//! paused stretches.

use core_fragment::{TimeSpan, total_elapsed};
use tracing::debug;

#[derive(Debug, Default)]
pub struct RuntimeClock {
    spans: Vec<TimeSpan>,
    now: u64,
    running: bool,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest observed epoch-ms. Monotonic: `advance_to` never moves it
    /// backwards.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn spans(&self) -> &[TimeSpan] {
        &self.spans
    }

    /// Running time in milliseconds, paused stretches excluded.
    pub fn elapsed(&self) -> u64 {
        total_elapsed(&self.spans, self.now)
    }

    pub fn start(&mut self, now: u64) {
        self.advance_to(now);
        if self.running {
            return;
        }
        self.spans.push(TimeSpan::open(self.now));
        self.running = true;
        debug!(target: "runtime.clock", now = self.now, "clock started");
    }

    pub fn stop(&mut self, now: u64) {
        self.advance_to(now);
        if !self.running {
            return;
        }
        if let Some(span) = self.spans.last_mut().filter(|s| s.is_open()) {
            span.ended = Some(self.now);
        }
        self.running = false;
        debug!(target: "runtime.clock", now = self.now, elapsed = self.elapsed(), "clock stopped");
    }

    /// Record an externally observed instant. Returns the new elapsed-ms so
    /// tick sources can forward it to listeners.
    pub fn advance_to(&mut self, now: u64) -> u64 {
        if now > self.now {
            self.now = now;
        }
        self.elapsed()
    }

    /// At most one open span may exist at any instant.
    pub fn open_span(&self) -> Option<&TimeSpan> {
        self.spans.last().filter(|s| s.is_open())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_tracks_only_running_time() {
        let mut clock = RuntimeClock::new();
        clock.start(1_000);
        assert_eq!(clock.advance_to(4_000), 3_000);
        clock.stop(5_000);
        assert_eq!(clock.elapsed(), 4_000);
        // Paused stretch is excluded.
        clock.start(10_000);
        clock.advance_to(12_000);
        assert_eq!(clock.elapsed(), 6_000);
    }

    #[test]
    fn now_is_monotonic() {
        let mut clock = RuntimeClock::new();
        clock.advance_to(5_000);
        clock.advance_to(3_000);
        assert_eq!(clock.now(), 5_000);
    }

    #[test]
    fn at_most_one_open_span() {
        let mut clock = RuntimeClock::new();
        clock.start(0);
        clock.start(100);
        assert_eq!(clock.spans().len(), 1);
        assert!(clock.open_span().is_some());
        clock.stop(200);
        assert!(clock.open_span().is_none());
        clock.start(300);
        assert_eq!(clock.spans().len(), 2);
    }

    #[test]
    fn stop_when_idle_is_a_noop() {
        let mut clock = RuntimeClock::new();
        clock.stop(1_000);
        assert_eq!(clock.spans().len(), 0);
        assert!(!clock.is_running());
    }
}
