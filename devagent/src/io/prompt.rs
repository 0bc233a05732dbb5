//! Bootstrap prompt rendering.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::memory::MemoryItem;

const BOOTSTRAP_TEMPLATE: &str = include_str!("prompts/bootstrap.md");

/// Everything gathered for one bootstrap prompt. Empty strings render as
/// placeholders.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapInputs<'a> {
    pub goal: &'a str,
    pub repo_tree: &'a str,
    pub recent_failures: &'a str,
    /// Already ranked and truncated.
    pub highlights: &'a [MemoryItem],
    pub focus_files: &'a str,
}

#[derive(Debug, Serialize)]
struct Highlight<'a> {
    kind: &'a str,
    snippet: &'a str,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("bootstrap", BOOTSTRAP_TEMPLATE)
            .expect("bootstrap template should be valid");
        Self { env }
    }

    fn render_bootstrap(&self, input: &BootstrapInputs<'_>) -> Result<String> {
        let highlights: Vec<Highlight<'_>> = input
            .highlights
            .iter()
            .map(|item| Highlight {
                kind: item.kind.as_str(),
                snippet: &item.snippet,
            })
            .collect();
        let template = self.env.get_template("bootstrap")?;
        let rendered = template.render(context! {
            goal => input.goal.trim(),
            repo_tree => input.repo_tree.trim(),
            failures => input.recent_failures.trim(),
            highlights => highlights,
            focus_files => input.focus_files.trim(),
        })?;
        Ok(rendered)
    }
}

/// Render the single prompt sent to the program generator in bootstrap mode.
pub fn render_bootstrap(input: &BootstrapInputs<'_>) -> Result<String> {
    let rendered = PromptEngine::new().render_bootstrap(input)?;
    debug!(
        chars = rendered.len(),
        highlights = input.highlights.len(),
        "bootstrap prompt rendered"
    );
    Ok(rendered)
}
