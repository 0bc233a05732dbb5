//! Memory items and the deterministic mapping from events to items.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::types::{Event, EventType, JsonMap};

/// Snippet prefix length taken from RUN stderr.
pub const STDERR_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    ErrorPattern,
    ModuleHistory,
    UpgradeStep,
    HumanFeedback,
    RunConfig,
}

impl MemoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ErrorPattern => "error_pattern",
            Self::ModuleHistory => "module_history",
            Self::UpgradeStep => "upgrade_step",
            Self::HumanFeedback => "human_feedback",
            Self::RunConfig => "run_config",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable, retrievable fact derived from an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub kind: MemoryKind,
    pub pointer: JsonMap,
    pub snippet: String,
    pub dimensions: JsonMap,
    pub stats: JsonMap,
}

impl MemoryItem {
    /// Recency signal; items without `stats.created_at` count as `0`.
    pub fn created_at(&self) -> f64 {
        self.stats
            .get("created_at")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn dimension_str(&self, key: &str) -> Option<&str> {
        self.dimensions.get(key).and_then(Value::as_str)
    }
}

/// Aggregate view over the memory table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub counts_by_kind: BTreeMap<String, u64>,
    /// Total row count. A coarse proxy, not a time-decayed measure.
    pub recent_activity_score: f64,
}

impl MemoryStats {
    pub fn from_kinds<I: IntoIterator<Item = MemoryKind>>(kinds: I) -> Self {
        let mut counts_by_kind = BTreeMap::new();
        let mut total = 0u64;
        for kind in kinds {
            *counts_by_kind.entry(kind.as_str().to_string()).or_insert(0) += 1;
            total += 1;
        }
        Self {
            counts_by_kind,
            recent_activity_score: total as f64,
        }
    }

    pub fn total(&self) -> u64 {
        self.counts_by_kind.values().sum()
    }
}

/// A memory item field holds a value the row store cannot persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotJsonSafe {
    pub item_id: String,
    pub field: &'static str,
    pub key: String,
}

impl fmt::Display for NotJsonSafe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory item '{}' has non-serializable {}.{}",
            self.item_id, self.field, self.key
        )
    }
}

impl std::error::Error for NotJsonSafe {}

/// Check the storage shape rules before any write.
///
/// `dimensions` may hold scalars or lists of scalars; `pointer` and `stats`
/// hold scalars only.
pub fn check_json_safe(item: &MemoryItem) -> Result<(), NotJsonSafe> {
    let reject = |field: &'static str, key: &str| NotJsonSafe {
        item_id: item.id.clone(),
        field,
        key: key.to_string(),
    };
    for (key, value) in &item.dimensions {
        let ok = match value {
            Value::Array(values) => values.iter().all(is_scalar),
            other => is_scalar(other),
        };
        if !ok {
            return Err(reject("dimensions", key));
        }
    }
    for (key, value) in &item.pointer {
        if !is_scalar(value) {
            return Err(reject("pointer", key));
        }
    }
    for (key, value) in &item.stats {
        if !is_scalar(value) {
            return Err(reject("stats", key));
        }
    }
    Ok(())
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Textual form used for equality filters over dimensions.
///
/// Strings compare verbatim, other values by their JSON text, missing as `null`.
pub fn filter_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// True when every filter entry matches the item's dimension by text.
pub fn matches_filters(dimensions: &JsonMap, filters: &JsonMap) -> bool {
    filters
        .iter()
        .all(|(key, want)| filter_text(dimensions.get(key)) == filter_text(Some(want)))
}

/// The event could not be mapped to a memory item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEvent {
    pub event_id: String,
    pub reason: String,
}

impl fmt::Display for MalformedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed event {}: {}", self.event_id, self.reason)
    }
}

impl std::error::Error for MalformedEvent {}

/// Map one event to the memory item it produces.
///
/// Returns `Ok(None)` for event types that carry no memory (META, SYSTEM).
/// The item id is the event id, so re-ingesting an event overwrites its item.
pub fn item_for_event(event: &Event, now: f64) -> Result<Option<MemoryItem>, MalformedEvent> {
    let malformed = |reason: &str| MalformedEvent {
        event_id: event.event_id.clone(),
        reason: reason.to_string(),
    };
    let mut stats = JsonMap::new();
    stats.insert("created_at".to_string(), json!(now));
    stats.insert("access_count".to_string(), json!(0));

    let mut pointer = JsonMap::new();
    pointer.insert("event_id".to_string(), json!(event.event_id));
    pointer.insert("job_id".to_string(), json!(event.job_id));

    match event.kind {
        EventType::Run => {
            let exit_code = event
                .exit_code()
                .ok_or_else(|| malformed("exit_code is not an integer"))?;
            let mut dimensions = JsonMap::new();
            dimensions.insert("kind".to_string(), json!("run"));
            dimensions.insert("exit_code".to_string(), json!(exit_code));
            dimensions.insert("job_id".to_string(), json!(event.job_id));

            let (kind, snippet) = if exit_code != 0 {
                let stderr = match event.payload.get("stderr") {
                    None | Some(Value::Null) => "",
                    Some(Value::String(s)) => s.as_str(),
                    Some(_) => return Err(malformed("stderr is not a string")),
                };
                let head: String = stderr.chars().take(STDERR_SNIPPET_CHARS).collect();
                (
                    MemoryKind::ErrorPattern,
                    format!("RUN failed with exit_code={exit_code}, stderr={head}"),
                )
            } else {
                (
                    MemoryKind::RunConfig,
                    format!("RUN succeeded with exit_code={exit_code}"),
                )
            };
            Ok(Some(MemoryItem {
                id: event.event_id.clone(),
                kind,
                pointer,
                snippet,
                dimensions,
                stats,
            }))
        }
        EventType::Edit => {
            let file_path = event
                .payload_str("file_path")
                .ok_or_else(|| malformed("EDIT event without file_path"))?;
            let rejected = event.payload.contains_key("error");
            let mut dimensions = JsonMap::new();
            dimensions.insert("kind".to_string(), json!("edit"));
            let snippet = if rejected {
                dimensions.insert("rejected_path".to_string(), json!(file_path));
                format!("Edit rejected: {file_path}")
            } else {
                dimensions.insert("file_path".to_string(), json!(file_path));
                pointer.insert("file_path".to_string(), json!(file_path));
                format!("Edited file: {file_path}")
            };
            Ok(Some(MemoryItem {
                id: event.event_id.clone(),
                kind: MemoryKind::ModuleHistory,
                pointer,
                snippet,
                dimensions,
                stats,
            }))
        }
        EventType::Meta | EventType::System => Ok(None),
    }
}
