//! Job records: per-job state, goal and step bookkeeping.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::State;
use crate::core::views::GoalView;
use crate::io::config::write_atomic;
use crate::io::store::lock;

/// Persisted per-job bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub state: State,
    pub goal_view: GoalView,
    /// Highest step id executed so far; `0` before the first step.
    pub last_step_id: u64,
}

pub trait JobStore: Send + Sync {
    fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// Insert or replace the record for `job.job_id`.
    fn put(&self, job: &Job) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryJobs {
    jobs: Mutex<BTreeMap<String, Job>>,
}

impl InMemoryJobs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobs {
    fn get(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(lock(&self.jobs)?.get(job_id).cloned())
    }

    fn put(&self, job: &Job) -> Result<()> {
        lock(&self.jobs)?.insert(job.job_id.clone(), job.clone());
        Ok(())
    }
}

/// One JSON file per job: `<dir>/<job_id>.json`.
#[derive(Debug)]
pub struct FileJobs {
    dir: PathBuf,
}

impl FileJobs {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `None` for ids that are not a single plain file name.
    fn job_path(&self, job_id: &str) -> Option<PathBuf> {
        let plain = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        plain.then(|| self.dir.join(format!("{job_id}.json")))
    }
}

impl JobStore for FileJobs {
    fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let Some(path) = self.job_path(job_id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "loading job");
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read job {}", path.display()))?;
        let job = serde_json::from_str(&contents)
            .with_context(|| format!("parse job {}", path.display()))?;
        Ok(Some(job))
    }

    fn put(&self, job: &Job) -> Result<()> {
        let path = self
            .job_path(&job.job_id)
            .with_context(|| format!("invalid job id {:?}", job.job_id))?;
        debug!(path = %path.display(), last_step_id = job.last_step_id, "writing job");
        let mut buf = serde_json::to_string_pretty(job).context("serialize job")?;
        buf.push('\n');
        write_atomic(&path, buf.as_bytes())
    }
}
