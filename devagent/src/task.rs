//! Task runner: job lifecycle around the meta controller.

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::controller::{MetaController, StepResult};
use crate::core::types::{Program, State};
use crate::core::views::{AgentHints, GoalView};
use crate::io::jobs::{Job, JobStore};
use crate::io::stamp::new_id;

/// `run_step` was called with an id no job was created under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNotFound {
    pub job_id: String,
}

impl fmt::Display for JobNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job not found: {}", self.job_id)
    }
}

impl std::error::Error for JobNotFound {}

pub struct TaskRunner {
    controller: MetaController,
    jobs: Box<dyn JobStore>,
}

impl TaskRunner {
    pub fn new(controller: MetaController, jobs: Box<dyn JobStore>) -> Self {
        Self { controller, jobs }
    }

    pub fn controller(&self) -> &MetaController {
        &self.controller
    }

    pub fn job(&self, job_id: &str) -> Result<Option<Job>> {
        self.jobs.get(job_id)
    }

    /// Allocate a job with an empty-head state and no steps.
    #[instrument(skip_all, fields(task_type = %goal.task_type))]
    pub fn create_job(&self, repo_root: impl Into<PathBuf>, goal: GoalView) -> Result<String> {
        let job = Job {
            job_id: new_id("job"),
            state: State::new(repo_root),
            goal_view: goal,
            last_step_id: 0,
        };
        self.jobs.put(&job).context("persist new job")?;
        info!(job_id = %job.job_id, "job created");
        Ok(job.job_id)
    }

    /// Run the next step of `job_id`.
    ///
    /// Fails with [`JobNotFound`] for unknown ids. On success the job's state
    /// is replaced and `last_step_id` advances to the highest event step id.
    #[instrument(skip_all, fields(job_id = %job_id, instructions = program.len()))]
    pub fn run_step(
        &self,
        job_id: &str,
        program: &Program,
        hints: Option<&AgentHints>,
    ) -> Result<StepResult> {
        let mut job = self
            .jobs
            .get(job_id)?
            .ok_or_else(|| JobNotFound {
                job_id: job_id.to_string(),
            })?;
        let start_step_id = job.last_step_id + 1;
        let result = self.controller.run_step(
            job_id,
            &job.state,
            program,
            &job.goal_view,
            hints,
            start_step_id,
        )?;

        job.state = result.state.clone();
        if let Some(max_step) = result.events.iter().map(|event| event.step_id).max() {
            job.last_step_id = max_step;
        }
        self.jobs.put(&job).context("persist job after step")?;
        debug!(last_step_id = job.last_step_id, "job advanced");
        Ok(result)
    }
}
