//! Agent configuration stored under `.devagent/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::views::AgentMode;

/// Default location of the config file relative to the working directory.
pub const CONFIG_PATH: &str = ".devagent/config.toml";

/// Agent configuration (TOML).
///
/// Constructed once at startup and passed by reference to each component.
/// Missing fields default to the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// How programs are obtained for each step.
    pub mode: AgentMode,

    /// Directory holding journals, the memory table and job records.
    pub data_dir: PathBuf,

    /// Wall-clock bound for a single RUN instruction.
    pub run_timeout_secs: u64,

    /// Bytes of stdout/stderr kept per RUN; the rest is drained and dropped.
    pub run_output_limit_bytes: usize,

    /// Rows scanned from the memory table before selection.
    pub candidate_scan_limit: usize,

    /// Items in the decision context's memory view.
    pub memory_view_limit: usize,

    /// Events read back when summarizing a job's recent state.
    pub recent_events_limit: usize,

    /// Minimum item count before an external ranking is requested.
    pub rerank_min_external_items: usize,

    pub bootstrap: BootstrapConfig,

    pub capabilities: CapabilityConfig,
}

/// Bounds for the context gathered in bootstrap mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootstrapConfig {
    pub tree_max_depth: usize,
    pub failure_limit: usize,
    pub failure_max_chars: usize,
    pub focus_file_max_chars: usize,
    pub memory_highlights: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            tree_max_depth: 2,
            failure_limit: 3,
            failure_max_chars: 2000,
            focus_file_max_chars: 4000,
            memory_highlights: 10,
        }
    }
}

/// External commands backing the optional capabilities.
///
/// An empty command leaves the capability unavailable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Receives a `meta_plan_request` and prints a plan.
    pub planner: Vec<String>,
    /// Receives a `program_request` and prints a program.
    pub generator: Vec<String>,
    /// Receives a `rank_request` and prints `{"ranked_ids": [...]}`.
    pub ranker: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            planner: Vec::new(),
            generator: Vec::new(),
            ranker: Vec::new(),
            timeout_secs: 120,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: AgentMode::OptimizedStructured,
            data_dir: PathBuf::from(".devagent"),
            run_timeout_secs: 30,
            run_output_limit_bytes: 1_000_000,
            candidate_scan_limit: 1000,
            memory_view_limit: 50,
            recent_events_limit: 200,
            rerank_min_external_items: 2,
            bootstrap: BootstrapConfig::default(),
            capabilities: CapabilityConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.run_timeout_secs == 0 {
            return Err(anyhow!("run_timeout_secs must be > 0"));
        }
        if self.run_output_limit_bytes == 0 {
            return Err(anyhow!("run_output_limit_bytes must be > 0"));
        }
        if self.candidate_scan_limit == 0 {
            return Err(anyhow!("candidate_scan_limit must be > 0"));
        }
        if self.capabilities.timeout_secs == 0 {
            return Err(anyhow!("capabilities.timeout_secs must be > 0"));
        }
        for (name, command) in [
            ("planner", &self.capabilities.planner),
            ("generator", &self.capabilities.generator),
            ("ranker", &self.capabilities.ranker),
        ] {
            if command.first().is_some_and(|program| program.trim().is_empty()) {
                return Err(anyhow!("capabilities.{name} must start with a program"));
            }
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(anyhow!("data_dir must be non-empty"));
        }
        Ok(())
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
