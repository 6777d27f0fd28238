//! Resolver configuration stored in `resolver.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "resolver.toml";

/// Resolver configuration (TOML).
///
/// Missing fields take the defaults below; CLI flags override individual
/// fields after loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Hard ceiling on oracle consultations per run.
    pub max_ai_iterations: u32,

    /// Hard ceiling on resolution passes per run.
    pub max_total_iterations: u32,

    /// Per-command timeout in seconds.
    pub command_timeout_secs: u64,

    /// Pause between consecutive commands, in milliseconds.
    pub command_pause_ms: u64,

    /// Truncate captured stdout/stderr beyond this many bytes per stream.
    pub output_limit_bytes: usize,

    /// Dependency check run after a solution succeeds. Empty disables it.
    pub final_check: String,

    pub advisor: AdvisorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Command that answers a prompt on stdin. `{output}` is replaced with
    /// the path the response should be written to.
    pub command: Vec<String>,

    /// Maximum time to wait for one consultation, in seconds.
    pub timeout_secs: u64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            command: [
                "codex",
                "exec",
                "--skip-git-repo-check",
                "--output-last-message",
                "{output}",
                "-",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            timeout_secs: 15 * 60,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_ai_iterations: 8,
            max_total_iterations: 20,
            command_timeout_secs: 300,
            command_pause_ms: 1000,
            output_limit_bytes: 1_000_000,
            final_check: "pip check".to_string(),
            advisor: AdvisorConfig::default(),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_total_iterations == 0 {
            return Err(anyhow!("max_total_iterations must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.advisor.timeout_secs == 0 {
            return Err(anyhow!("advisor.timeout_secs must be > 0"));
        }
        if self.advisor.command.is_empty() || self.advisor.command[0].trim().is_empty() {
            return Err(anyhow!("advisor.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn command_pause(&self) -> Duration {
        Duration::from_millis(self.command_pause_ms)
    }

    pub fn advisor_timeout(&self) -> Duration {
        Duration::from_secs(self.advisor.timeout_secs)
    }

    pub fn final_check(&self) -> Option<&str> {
        Some(self.final_check.trim()).filter(|cmd| !cmd.is_empty())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ResolverConfig::default()`.
pub fn load_config(path: &Path) -> Result<ResolverConfig> {
    if !path.exists() {
        let cfg = ResolverConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ResolverConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ResolverConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
