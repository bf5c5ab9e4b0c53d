//! Configuration loading and parsing.
//!
//! Parses `wodwiki.toml` (or an override path provided by the binary),
//! extracting the tick cadence, sound cue leads, log filter and history
//! file location. Unknown fields are ignored (TOML deserialization
//! tolerance) so the file can grow without breaking older binaries. A
//! missing or unparsable file falls back to defaults; configuration is
//! never a fatal error.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

/// Bounds on the effective tick cadence. The runtime contract requires
/// the first tick within 150 ms of start, so the interval may never
/// exceed that; the floor keeps a mistyped `1` from busy-spinning.
pub const MIN_TICK_INTERVAL_MS: u64 = 10;
pub const MAX_TICK_INTERVAL_MS: u64 = 150;

#[derive(Debug, Deserialize, Clone)]
pub struct TickConfig {
    #[serde(default = "TickConfig::default_interval_ms")]
    pub interval_ms: u64,
}

impl TickConfig {
    const fn default_interval_ms() -> u64 {
        100
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SoundConfig {
    #[serde(default = "SoundConfig::default_enabled")]
    pub enabled: bool,
    /// Remaining-ms thresholds for countdown cues.
    #[serde(default = "SoundConfig::default_leads_ms")]
    pub leads_ms: Vec<u64>,
}

impl SoundConfig {
    const fn default_enabled() -> bool {
        true
    }
    fn default_leads_ms() -> Vec<u64> {
        vec![3_000, 2_000, 1_000]
    }
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            leads_ms: Self::default_leads_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct LogConfig {
    /// EnvFilter directive string; `RUST_LOG` overrides it.
    #[serde(default)]
    pub filter: Option<String>,
    /// Log file path; unset logs to stderr only.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct HistoryConfig {
    /// JSON history file; unset keeps history in memory only.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub tick: TickConfig,
    #[serde(default)]
    pub sound: SoundConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Original file string, when one was read.
    pub raw: Option<String>,
    /// Parsed (or default) data.
    pub file: ConfigFile,
    /// Tick cadence after clamping; computed by `effective_tick_interval`.
    pub effective_tick_interval_ms: u64,
}

/// Best-effort config path following platform conventions: prefer a local
/// `wodwiki.toml`, then the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("wodwiki.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("wodwiki").join("wodwiki.toml");
    }
    PathBuf::from("wodwiki.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(target: "config", path = %path.display(), "configuration loaded");
                let mut config = Config {
                    raw: Some(content),
                    file,
                    effective_tick_interval_ms: 0,
                };
                config.effective_tick_interval();
                Ok(config)
            }
            Err(err) => {
                // Fall back to defaults rather than refusing to start.
                warn!(target: "config", path = %path.display(), %err, "config parse failed, using defaults");
                Ok(defaulted())
            }
        }
    } else {
        Ok(defaulted())
    }
}

fn defaulted() -> Config {
    let mut config = Config::default();
    config.effective_tick_interval();
    config
}

impl Config {
    /// Clamp the configured cadence into the supported band and record the
    /// effective value. Returns it.
    pub fn effective_tick_interval(&mut self) -> u64 {
        let raw = self.file.tick.interval_ms;
        let clamped = raw.clamp(MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS);
        if clamped != raw {
            info!(
                target: "config",
                raw,
                clamped,
                min = MIN_TICK_INTERVAL_MS,
                max = MAX_TICK_INTERVAL_MS,
                "tick_interval_clamped"
            );
        }
        self.effective_tick_interval_ms = clamped;
        clamped
    }

    /// Sound leads honoring the enable switch.
    pub fn sound_leads(&self) -> Vec<u64> {
        if self.file.sound.enabled {
            self.file.sound.leads_ms.clone()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn default_config_when_missing_file() {
        let cfg = load_from(Some(PathBuf::from("__nonexistent_hopefully__.toml"))).unwrap();
        assert_eq!(cfg.file.tick.interval_ms, 100);
        assert_eq!(cfg.effective_tick_interval_ms, 100);
        assert!(cfg.file.sound.enabled);
    }

    #[test]
    fn parses_tick_and_sound_sections() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[tick]\ninterval_ms = 50\n[sound]\nenabled = false\nleads_ms = [5000]\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.effective_tick_interval_ms, 50);
        assert!(!cfg.file.sound.enabled);
        assert!(cfg.sound_leads().is_empty(), "disabled sound yields no leads");
    }

    #[test]
    fn clamps_out_of_band_cadence() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[tick]\ninterval_ms = 5000\n").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.effective_tick_interval_ms, MAX_TICK_INTERVAL_MS);
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[tick]\ninterval_ms = 1\n").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.effective_tick_interval_ms, MIN_TICK_INTERVAL_MS);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[tick]\ninterval_ms = 100\nfuture_knob = true\n[brand_new_section]\nx = 1\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.effective_tick_interval_ms, 100);
    }

    #[test]
    fn parse_error_falls_back_to_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "this is { not toml").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert!(cfg.raw.is_none());
        assert_eq!(cfg.effective_tick_interval_ms, 100);
    }

    #[test]
    fn log_and_history_sections_parse() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[log]\nfilter = \"runtime=debug\"\n[history]\npath = \"wods.json\"\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.file.log.filter.as_deref(), Some("runtime=debug"));
        assert_eq!(cfg.file.history.path, Some(PathBuf::from("wods.json")));
    }
}
