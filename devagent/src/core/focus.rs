//! Focus derivation from memory items and from failing RUN output.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::memory::MemoryItem;
use crate::core::plan::FocusSpec;
use crate::core::types::{Event, EventType};
use crate::core::views::FocusView;

static SOURCE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"src/[^\s:]+\.[A-Za-z0-9]+").expect("source path pattern should be valid")
});
static TEST_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"tests/[^\s:]+\.[A-Za-z0-9]+").expect("test path pattern should be valid")
});

/// Build a focus view from already ranked memory items.
///
/// Reads `file_path`, `module`, `modules` and `test_path` dimensions, keeps
/// the first occurrence of each value, and caps files at
/// `spec.max_focus_files`. `spec.modules` and `spec.only_failing_tests` are
/// not used as filters.
pub fn derive_focus(items: &[MemoryItem], spec: &FocusSpec) -> FocusView {
    let mut files = Vec::new();
    let mut modules = Vec::new();
    let mut tests = Vec::new();
    for item in items {
        if let Some(path) = non_empty_str(item.dimensions.get("file_path")) {
            files.push(path.to_string());
        }
        if let Some(module) = non_empty_str(item.dimensions.get("module")) {
            modules.push(module.to_string());
        }
        if let Some(Value::Array(values)) = item.dimensions.get("modules") {
            modules.extend(values.iter().filter_map(Value::as_str).map(str::to_string));
        }
        if let Some(test) = non_empty_str(item.dimensions.get("test_path")) {
            tests.push(test.to_string());
        }
    }
    let mut files = dedup_first_seen(files);
    files.truncate(spec.max_focus_files);
    FocusView {
        files,
        modules: dedup_first_seen(modules),
        tests: dedup_first_seen(tests),
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Infer focus from the stderr of failing RUN events, without any model.
///
/// Successful runs are never scanned. Paths are unique and sorted; modules
/// are always empty.
pub fn infer_baseline(events: &[Event]) -> FocusView {
    let mut files = BTreeSet::new();
    let mut tests = BTreeSet::new();
    for event in events {
        if event.kind != EventType::Run || !event.is_failed_run() {
            continue;
        }
        let Some(stderr) = event.payload_str("stderr") else {
            continue;
        };
        files.extend(SOURCE_PATH_RE.find_iter(stderr).map(|m| m.as_str().to_string()));
        tests.extend(TEST_PATH_RE.find_iter(stderr).map(|m| m.as_str().to_string()));
    }
    FocusView {
        files: files.into_iter().collect(),
        modules: Vec::new(),
        tests: tests.into_iter().collect(),
    }
}

/// Concatenate two views, `first` winning on order, dropping repeats.
pub fn merge_focus(first: FocusView, second: FocusView) -> FocusView {
    let chain = |a: Vec<String>, b: Vec<String>| dedup_first_seen(a.into_iter().chain(b).collect());
    FocusView {
        files: chain(first.files, second.files),
        modules: chain(first.modules, second.modules),
        tests: chain(first.tests, second.tests),
    }
}

fn dedup_first_seen(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}
