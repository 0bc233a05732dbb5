//! Optional external capabilities consumed by the core.
//!
//! Each capability is a single-method trait. Absence is the [`Unavailable`]
//! implementation, never a flag checked at call sites. Callers always keep a
//! deterministic local fallback for `Ok(None)` and `Err(_)` alike.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::io::config::AgentConfig;
use crate::io::process::run_command_with_timeout;

/// Proposes a retrieval plan for a `meta_plan_request` payload.
pub trait PlanProposer {
    fn propose(&self, request: &Value) -> Result<Option<Value>>;
}

/// Proposes a program from a rendered bootstrap prompt.
pub trait ProgramGenerator {
    fn generate(&self, prompt: &str) -> Result<Option<Value>>;
}

/// Orders memory items; each item is `{id, kind, snippet}`.
pub trait RankingOracle {
    fn rank(&self, items: &[Value]) -> Result<Option<Vec<String>>>;
}

/// Nearest-neighbor search returning `(id, distance)` pairs, closest first.
pub trait SimilarityIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>>;
}

/// The absent capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl PlanProposer for Unavailable {
    fn propose(&self, _request: &Value) -> Result<Option<Value>> {
        Ok(None)
    }
}

impl ProgramGenerator for Unavailable {
    fn generate(&self, _prompt: &str) -> Result<Option<Value>> {
        Ok(None)
    }
}

impl RankingOracle for Unavailable {
    fn rank(&self, _items: &[Value]) -> Result<Option<Vec<String>>> {
        Ok(None)
    }
}

impl SimilarityIndex for Unavailable {
    fn search(&self, _query: &[f32], _k: usize) -> Result<Vec<(String, f32)>> {
        Ok(Vec::new())
    }
}

/// Exact nearest-neighbor index over fixed-dimension vectors.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    entries: Vec<(String, Vec<f32>)>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: Vec::new(),
        }
    }

    fn ensure_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            bail!(
                "vector dimension mismatch: expected {}, got {}",
                self.dim,
                vector.len()
            );
        }
        Ok(())
    }

    /// Insert or replace the vector stored for `id`.
    pub fn add(&mut self, id: impl Into<String>, vector: Vec<f32>) -> Result<()> {
        self.ensure_dim(&vector)?;
        let id = id.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = vector,
            None => self.entries.push((id, vector)),
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &str) {
        self.entries.retain(|(existing, _)| existing != id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SimilarityIndex for FlatIndex {
    /// Squared L2 distance, ascending; ties keep insertion order.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        self.ensure_dim(query)?;
        let mut scored: Vec<(String, f32)> = self
            .entries
            .iter()
            .map(|(id, vector)| {
                let distance = vector
                    .iter()
                    .zip(query)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>();
                (id.clone(), distance)
            })
            .collect();
        scored.sort_by(|(_, a), (_, b)| a.total_cmp(b));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Capability backed by an external command speaking JSON over stdin/stdout.
///
/// The request document is written to stdin; stdout must hold one JSON
/// document. An empty stdout means "no answer".
#[derive(Debug, Clone)]
pub struct CommandCapability {
    argv: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandCapability {
    pub fn new(
        argv: Vec<String>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            bail!("capability command must be a non-empty array");
        }
        Ok(Self {
            argv,
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        })
    }

    #[instrument(skip_all, fields(program = %self.argv[0]))]
    fn call(&self, request: &Value) -> Result<Option<Value>> {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]).current_dir(&self.workdir);
        let input = serde_json::to_vec(request).context("serialize capability request")?;
        let output = run_command_with_timeout(
            cmd,
            Some(input.as_slice()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run capability {}", self.argv[0]))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "capability timed out");
            return Err(anyhow!("capability timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "capability failed");
            return Err(anyhow!(
                "capability failed with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "capability output exceeded {} bytes",
                self.output_limit_bytes
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            debug!("capability returned no answer");
            return Ok(None);
        }
        let value = serde_json::from_str(stdout.trim()).context("parse capability output")?;
        Ok(Some(value))
    }
}

impl PlanProposer for CommandCapability {
    fn propose(&self, request: &Value) -> Result<Option<Value>> {
        self.call(request)
    }
}

impl ProgramGenerator for CommandCapability {
    fn generate(&self, prompt: &str) -> Result<Option<Value>> {
        self.call(&json!({"kind": "program_request", "prompt": prompt}))
    }
}

#[derive(Debug, Deserialize)]
struct RankingResult {
    ranked_ids: Vec<String>,
}

impl RankingOracle for CommandCapability {
    fn rank(&self, items: &[Value]) -> Result<Option<Vec<String>>> {
        let Some(value) = self.call(&json!({"kind": "rank_request", "items": items}))? else {
            return Ok(None);
        };
        let result: RankingResult =
            serde_json::from_value(value).context("parse ranking result")?;
        Ok(Some(result.ranked_ids))
    }
}

/// The capability set one controller works with.
pub struct Capabilities {
    pub planner: Box<dyn PlanProposer>,
    pub generator: Box<dyn ProgramGenerator>,
    pub ranker: Box<dyn RankingOracle>,
    pub index: Box<dyn SimilarityIndex>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            planner: Box::new(Unavailable),
            generator: Box::new(Unavailable),
            ranker: Box::new(Unavailable),
            index: Box::new(Unavailable),
        }
    }
}

impl Capabilities {
    /// Command-backed capabilities for every non-empty `[capabilities]`
    /// entry; the rest, and the similarity index, stay unavailable.
    pub fn from_config(config: &AgentConfig, workdir: &Path) -> Result<Self> {
        let section = &config.capabilities;
        let timeout = Duration::from_secs(section.timeout_secs);
        let command = |argv: &[String]| -> Result<Option<CommandCapability>> {
            if argv.is_empty() {
                return Ok(None);
            }
            CommandCapability::new(
                argv.to_vec(),
                workdir,
                timeout,
                config.run_output_limit_bytes,
            )
            .map(Some)
        };

        let mut capabilities = Self::default();
        if let Some(planner) = command(&section.planner)? {
            capabilities.planner = Box::new(planner);
        }
        if let Some(generator) = command(&section.generator)? {
            capabilities.generator = Box::new(generator);
        }
        if let Some(ranker) = command(&section.ranker)? {
            capabilities.ranker = Box::new(ranker);
        }
        debug!(
            planner = !section.planner.is_empty(),
            generator = !section.generator.is_empty(),
            ranker = !section.ranker.is_empty(),
            "capabilities configured"
        );
        Ok(capabilities)
    }
}
