//! Diagnostic tracing for the `devagent` binary.
//!
//! Tracing output goes to stderr and is controlled by `RUST_LOG`. It is never
//! the record of what a job did: events, decision traces and memory rows are
//! written to the journals under the data directory regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directive used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "warn";

/// Install the stderr subscriber.
///
/// Safe to call more than once; only the first call installs anything.
///
/// ```bash
/// RUST_LOG=devagent=debug devagent job step <job-id> --program program.json
/// ```
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref()))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

fn filter_from(raw: Option<&str>) -> EnvFilter {
    raw.filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
