//! Meta planner: an external proposal when one validates, the rule table
//! otherwise.

use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::core::plan::{MetaInput, MetaPlan};
use crate::core::planner::rule_plan;
use crate::core::types::{FallbackReason, Sourced};
use crate::io::capability::PlanProposer;
use crate::io::schema::{META_PLAN_SCHEMA, validate_json};
use crate::io::stamp::now_unix;

pub struct MetaPlanner<'a> {
    proposer: &'a dyn PlanProposer,
}

impl<'a> MetaPlanner<'a> {
    pub fn new(proposer: &'a dyn PlanProposer) -> Self {
        Self { proposer }
    }

    /// Plan one step. Never fails; the origin records whether the rule table
    /// stood in.
    #[instrument(skip_all, fields(task_type = %input.goal_view.task_type, mode = %input.mode))]
    pub fn propose_plan(&self, input: &MetaInput) -> Sourced<MetaPlan> {
        let reason = match self.request_plan(input) {
            Ok(plan) => {
                debug!("external plan accepted");
                return Sourced::external(plan);
            }
            Err(reason) => reason,
        };
        debug!(reason = ?reason, "using rule plan");
        Sourced::fallback(rule_plan(input, now_unix()), reason)
    }

    fn request_plan(&self, input: &MetaInput) -> Result<MetaPlan, FallbackReason> {
        let request = match serde_json::to_value(input) {
            Ok(meta_input) => json!({"kind": "meta_plan_request", "meta_input": meta_input}),
            Err(err) => {
                warn!(err = %err, "could not encode planner input");
                return Err(FallbackReason::Failed);
            }
        };
        let response = match self.proposer.propose(&request) {
            Ok(Some(response)) => response,
            Ok(None) => return Err(FallbackReason::NoAnswer),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "plan proposer failed");
                return Err(FallbackReason::Failed);
            }
        };
        parse_plan(response).map_err(|err| {
            warn!(err = %err, "discarding invalid plan");
            FallbackReason::Invalid
        })
    }
}

fn parse_plan(response: Value) -> anyhow::Result<MetaPlan> {
    validate_json("meta_plan", META_PLAN_SCHEMA, &response)?;
    Ok(serde_json::from_value(response)?)
}
