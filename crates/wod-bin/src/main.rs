//! WOD Wiki entrypoint: parse, check and run workout scripts from the
//! command line.
//!
//! `run` executes a workout end to end. With `--virtual` the clock is
//! driven by synthetic ticks (deterministic, no sleeping); otherwise a
//! tokio interval supplies real-time ticks at the configured cadence and
//! Ctrl-C ends the run early. Gesture-gated blocks advance on a simulated
//! `next` every `--auto-next-ms`.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use core_compiler::{JitCompiler, StrategyOptions};
use core_display::{DisplayStateHub, build_snapshot};
use core_history::{ContentProvider, JsonFileProvider, entry_from_run};
use core_runtime::{RuntimeCommand, ScriptRuntime, SpanDetail};
use core_script::{Script, parse, to_canonical_text};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Virtual runs stop after this much simulated time if the workout never
/// completes (a gesture-gated script with auto-next disabled, say).
const VIRTUAL_TIME_CAP_MS: u64 = 24 * 60 * 60 * 1_000;

#[derive(Parser, Debug)]
#[command(name = "wodwiki", version, about = "Workout DSL compiler and runtime")]
struct Args {
    /// Configuration file path (overrides discovery of `wodwiki.toml`).
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse and execute a workout file, printing the execution log.
    Run {
        /// Workout file (UTF-8 text).
        path: PathBuf,
        /// Drive the clock with virtual ticks of this many ms; runs to
        /// completion without sleeping.
        #[arg(long = "virtual", value_name = "MS_PER_TICK")]
        virtual_step: Option<u64>,
        /// Simulated `next` gesture cadence in ms (0 disables).
        #[arg(long, default_value_t = 30_000)]
        auto_next_ms: u64,
        /// Save the completed run into the configured history file.
        #[arg(long)]
        save: bool,
    },
    /// Parse a workout file and dump the statement tree as JSON.
    Parse {
        path: PathBuf,
        /// Print canonical workout text instead of JSON.
        #[arg(long)]
        canonical: bool,
    },
    /// Report parse errors and exit non-zero if any.
    Check { path: PathBuf },
}

fn configure_logging(config: &core_config::Config) -> Result<Option<WorkerGuard>> {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| config.file.log.filter.clone())
        .unwrap_or_else(|| "info".to_string());
    let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.file.log.file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "wodwiki.log".to_string());
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn load_script(path: &PathBuf) -> Result<(String, Script)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading workout file {}", path.display()))?;
    let script = parse(&text);
    for error in script.errors() {
        warn!(target: "script.parser", %error, "parse problem");
    }
    if script.is_empty() {
        bail!("no statements parsed from {}", path.display());
    }
    Ok((text, script))
}

fn build_runtime(script: Script, config: &core_config::Config) -> ScriptRuntime {
    let compiler = JitCompiler::with_options(StrategyOptions {
        cue_leads: Some(config.sound_leads()),
    });
    ScriptRuntime::new(script, std::sync::Arc::new(compiler))
}

fn print_summary(runtime: &ScriptRuntime) {
    println!("execution log:");
    for span in runtime.core.log.completed() {
        let duration = span.duration();
        let kind = match &span.detail {
            SpanDetail::Timestamp { event_type } => format!("timestamp {event_type}"),
            SpanDetail::Group { child_ids, .. } => format!("group ({} children)", child_ids.len()),
            SpanDetail::Record { metrics } => {
                let mut parts = Vec::new();
                if let Some(reps) = metrics.reps {
                    parts.push(format!("{reps} reps"));
                }
                if let Some(weight) = metrics.weight {
                    parts.push(format!("{weight} load"));
                }
                if let Some(distance) = metrics.distance {
                    parts.push(format!("{distance} dist"));
                }
                if parts.is_empty() {
                    "record".to_string()
                } else {
                    format!("record [{}]", parts.join(", "))
                }
            }
        };
        println!(
            "  {:>8}ms +{:>8}ms  {:<28} {}",
            span.started, duration, kind, span.label
        );
    }
    match serde_json::to_string_pretty(&build_snapshot(runtime)) {
        Ok(json) => println!("final snapshot:\n{json}"),
        Err(err) => warn!(%err, "snapshot serialization failed"),
    }
}

/// Deterministic run: synthetic clock, no sleeping.
fn run_virtual(runtime: &mut ScriptRuntime, step_ms: u64, auto_next_ms: u64) {
    let hub = DisplayStateHub::attach(runtime);
    let step = step_ms.max(1);
    runtime.start(0);
    let mut now = 0u64;
    let mut last_gesture = 0u64;
    while !runtime.is_complete() && now < VIRTUAL_TIME_CAP_MS {
        now += step;
        runtime.tick(now);
        if auto_next_ms > 0 && !runtime.is_complete() && now - last_gesture >= auto_next_ms {
            runtime.dispatch(RuntimeCommand::Next, now);
            last_gesture = now;
        }
        if hub.take_dirty() {
            tracing::trace!(target: "display", now, "snapshot dirty");
        }
    }
    if !runtime.is_complete() {
        warn!(
            target: "runtime",
            cap_ms = VIRTUAL_TIME_CAP_MS,
            "virtual run hit the time cap before completing"
        );
    }
}

/// Wall-clock run: tokio interval ticks until completion or Ctrl-C.
async fn run_real(runtime: &mut ScriptRuntime, tick_ms: u64, auto_next_ms: u64) {
    let hub = DisplayStateHub::attach(runtime);
    let started = now_ms();
    runtime.start(started);
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(tick_ms.max(1)));
    let mut last_gesture = started;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = now_ms();
                runtime.tick(now);
                if auto_next_ms > 0 && !runtime.is_complete() && now - last_gesture >= auto_next_ms {
                    runtime.dispatch(RuntimeCommand::Next, now);
                    last_gesture = now;
                }
                if hub.take_dirty() {
                    tracing::trace!(target: "display", now, "snapshot dirty");
                }
                if runtime.is_complete() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!(target: "runtime", "interrupted, completing workout");
                runtime.dispatch(RuntimeCommand::Complete, now_ms());
                break;
            }
        }
    }
}

async fn save_run(
    runtime: &ScriptRuntime,
    title: &str,
    raw: &str,
    config: &core_config::Config,
) -> Result<()> {
    let Some(path) = &config.file.history.path else {
        warn!(target: "history", "no history.path configured, run not saved");
        return Ok(());
    };
    let provider = JsonFileProvider::open(path.clone())
        .with_context(|| format!("opening history file {}", path.display()))?;
    let entry = entry_from_run(
        title,
        raw,
        runtime.core.script.statements().to_vec(),
        runtime.core.clock.now(),
        runtime.core.clock.elapsed(),
        runtime.core.log.completed().to_vec(),
    );
    let saved = provider.save_entry(entry).await?;
    info!(target: "history", id = %saved.id, path = %path.display(), "run saved");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = core_config::load_from(args.config.clone())?;
    let _log_guard = configure_logging(&config)?;

    match args.command {
        Command::Parse { path, canonical } => {
            let (_, script) = load_script(&path)?;
            if canonical {
                println!("{}", to_canonical_text(&script));
            } else {
                println!("{}", serde_json::to_string_pretty(&script)?);
            }
            Ok(())
        }
        Command::Check { path } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading workout file {}", path.display()))?;
            let script = parse(&text);
            if script.errors().is_empty() {
                println!("ok: {} statements", script.statements().len());
                Ok(())
            } else {
                for error in script.errors() {
                    eprintln!("{error}");
                }
                bail!("{} parse error(s)", script.errors().len());
            }
        }
        Command::Run {
            path,
            virtual_step,
            auto_next_ms,
            save,
        } => {
            let (raw, script) = load_script(&path)?;
            let title = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "workout".to_string());
            let mut runtime = build_runtime(script, &config);
            info!(
                target: "runtime",
                file = %path.display(),
                virtual_mode = virtual_step.is_some(),
                "run starting"
            );
            match virtual_step {
                Some(step) => run_virtual(&mut runtime, step, auto_next_ms),
                None => {
                    run_real(&mut runtime, config.effective_tick_interval_ms, auto_next_ms).await
                }
            }
            print_summary(&runtime);
            if save {
                save_run(&runtime, &title, &raw, &config).await?;
            }
            if runtime.core.errors.is_empty() {
                Ok(())
            } else {
                bail!("{} runtime error(s); see log", runtime.core.errors.len());
            }
        }
    }
}
