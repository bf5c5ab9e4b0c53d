//! Integration-adjacent test: the same wiring the binary performs (config,
//! compiler options, runtime, display hub, history save), driven with a
//! virtual clock.

use core_compiler::{JitCompiler, StrategyOptions};
use core_display::DisplayStateHub;
use core_history::{ContentProvider, JsonFileProvider, entry_from_run};
use core_runtime::{RuntimeCommand, ScriptRuntime, WorkoutState};
use core_script::parse;
use std::sync::Arc;

fn virtual_run(text: &str, step_ms: u64, auto_next_ms: u64, cap_ms: u64) -> ScriptRuntime {
    let script = parse(text);
    assert!(script.errors().is_empty());
    let compiler = JitCompiler::with_options(StrategyOptions {
        cue_leads: Some(vec![3_000, 2_000, 1_000]),
    });
    let mut runtime = ScriptRuntime::new(script, Arc::new(compiler));
    let hub = DisplayStateHub::attach(&mut runtime);
    runtime.start(0);
    let mut now = 0;
    let mut last_gesture = 0;
    while !runtime.is_complete() && now < cap_ms {
        now += step_ms;
        runtime.tick(now);
        if auto_next_ms > 0 && !runtime.is_complete() && now - last_gesture >= auto_next_ms {
            runtime.dispatch(RuntimeCommand::Next, now);
            last_gesture = now;
        }
        let _ = hub.take_dirty();
    }
    runtime
}

#[test]
fn amrap_workout_completes_under_virtual_clock() {
    let rt = virtual_run("10:00 AMRAP\n  5 Pullups\n  10 Pushups", 100, 15_000, 1_200_000);
    assert_eq!(rt.state(), WorkoutState::Complete);
    assert!(rt.core.errors.is_empty());
    assert_eq!(rt.core.clock.elapsed(), 600_000, "stopped at the cap");
    // Sound cues fired approaching the horn.
    assert!(
        rt.core
            .log
            .completed()
            .iter()
            .any(|s| s.event_type() == Some("sound:cue"))
    );
}

#[test]
fn gesture_driven_workout_relies_on_auto_next() {
    let rt = virtual_run("(3)\n  21 Thrusters 95lb\n  15 Pullups", 100, 5_000, 600_000);
    assert_eq!(rt.state(), WorkoutState::Complete);
    assert_eq!(rt.core.memory.live_entries(), 0);
}

#[tokio::test]
async fn completed_run_saves_into_history_file() {
    let rt = virtual_run("30 Clean & Jerk 135lb", 100, 5_000, 60_000);
    assert_eq!(rt.state(), WorkoutState::Complete);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("history.json");
    let provider = JsonFileProvider::open(path.clone()).expect("open");
    let entry = entry_from_run(
        "clean-and-jerk",
        "30 Clean & Jerk 135lb",
        rt.core.script.statements().to_vec(),
        rt.core.clock.now(),
        rt.core.clock.elapsed(),
        rt.core.log.completed().to_vec(),
    );
    let saved = provider.save_entry(entry).await.expect("save");
    let results = saved.results.expect("results recorded");
    assert!(!results.log.is_empty());

    // Survives a reopen with the execution log intact.
    let provider = JsonFileProvider::open(path).expect("reopen");
    let loaded = provider
        .get_entry(&saved.id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(
        loaded.results.expect("results").log.len(),
        rt.core.log.completed().len()
    );
}
