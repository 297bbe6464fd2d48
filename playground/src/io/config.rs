//! Playground configuration stored as TOML (default `playground.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::output::DEFAULT_OUTPUT_BUDGET_CHARS;
use crate::engine::EngineOptions;

pub const DEFAULT_CONFIG_FILE: &str = "playground.toml";
pub const DEFAULT_ARCHIVE_BASE_URL: &str = "https://vyxal.github.io/versions";

/// Engine and codec configuration (TOML).
///
/// Missing fields take their defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Whole-run timeout for auto-runs, in seconds. `0` disables it.
    pub default_timeout_secs: u64,

    /// Character budget of the buffered stdout.
    pub output_budget_chars: usize,

    /// Consecutive worker spawn/boot failures before the engine gives up.
    pub max_boot_failures: u32,

    /// JSON compatibility table. The built-in table is used when unset.
    pub compat_path: Option<PathBuf>,

    /// Where archived interpreter builds live.
    pub archive_base_url: String,

    /// Version stamped into permalinks of sessions that carry none.
    pub interpreter_version: String,

    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Interpreter worker argv (e.g. `["vyxal-worker", "--jsonl"]`).
    pub command: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: vec!["vyxal-worker".to_string()],
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 10,
            output_budget_chars: DEFAULT_OUTPUT_BUDGET_CHARS,
            max_boot_failures: 3,
            compat_path: None,
            archive_base_url: DEFAULT_ARCHIVE_BASE_URL.to_string(),
            interpreter_version: env!("CARGO_PKG_VERSION").to_string(),
            worker: WorkerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_budget_chars == 0 {
            return Err(anyhow!("output_budget_chars must be > 0"));
        }
        if self.max_boot_failures == 0 {
            return Err(anyhow!("max_boot_failures must be > 0"));
        }
        if self.worker.command.is_empty() || self.worker.command[0].trim().is_empty() {
            return Err(anyhow!("worker.command must be a non-empty array"));
        }
        if self.archive_base_url.trim().is_empty() {
            return Err(anyhow!("archive_base_url must not be empty"));
        }
        Ok(())
    }

    /// The configured auto-run timeout, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.default_timeout_secs > 0).then(|| Duration::from_secs(self.default_timeout_secs))
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            output_budget_chars: self.output_budget_chars,
            max_boot_failures: self.max_boot_failures,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` next to `path` and rename it into place.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path has no file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
