//! Repository context gathered for bootstrap prompts.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::core::sandbox::{is_strict_descendant, join_within};
use crate::core::types::{Event, EventType};

/// Indented listing of `root` down to `max_depth`, `.git` skipped.
///
/// The first line is `<root name>/`; each entry is `- name`, with a trailing
/// `/` for directories, indented two spaces per level. Entries are sorted by
/// name. Unreadable directories are listed without children.
pub fn repo_tree(root: &Path, max_depth: usize) -> String {
    let Ok(root) = root.canonicalize() else {
        return String::new();
    };
    let name = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut lines = vec![format!("{name}/")];
    append_entries(&mut lines, &root, 1, max_depth);
    lines.join("\n")
}

fn append_entries(lines: &mut Vec<String>, dir: &Path, depth: usize, max_depth: usize) {
    if depth > max_depth {
        return;
    }
    let mut entries: Vec<_> = match fs::read_dir(dir) {
        Ok(read) => read.filter_map(Result::ok).map(|entry| entry.path()).collect(),
        Err(err) => {
            debug!(dir = %dir.display(), err = %err, "skipping unreadable directory");
            return;
        }
    };
    entries.sort();
    for path in entries {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if depth == 1 && name == ".git" {
            continue;
        }
        let is_dir = path.is_dir();
        let suffix = if is_dir { "/" } else { "" };
        lines.push(format!("{}- {name}{suffix}", "  ".repeat(depth)));
        if is_dir && depth < max_depth {
            append_entries(lines, &path, depth + 1, max_depth);
        }
    }
}

/// Failing RUN events rendered as `RUN failed (exit_code=N): cmd` plus the
/// first `max_chars` characters of stderr, newest first.
pub fn recent_failures(events: &[Event], limit: usize, max_chars: usize) -> String {
    let failures: Vec<String> = events
        .iter()
        .filter(|event| event.kind == EventType::Run && event.is_failed_run())
        .take(limit)
        .map(|event| {
            let exit_code = event.exit_code().unwrap_or_default();
            let mut header = format!("RUN failed (exit_code={exit_code})");
            if let Some(cmd) = event.payload_str("cmd") {
                header.push_str(": ");
                header.push_str(cmd);
            }
            let stderr = truncate_chars(event.payload_str("stderr").unwrap_or_default(), max_chars);
            format!("{header}\n{stderr}")
        })
        .collect();
    failures.join("\n\n---\n\n")
}

/// Contents of the focus files that resolve inside `root`, each as
/// `File: <path>` followed by at most `max_chars` characters.
///
/// Paths outside the root, missing files and unreadable files are skipped.
pub fn focus_file_contents(root: &Path, files: &[String], max_chars: usize) -> String {
    let Ok(root) = root.canonicalize() else {
        return String::new();
    };
    let mut snippets = Vec::new();
    for file_path in files {
        let Some(candidate) = join_within(&root, file_path) else {
            continue;
        };
        let Ok(resolved) = candidate.canonicalize() else {
            continue;
        };
        if !is_strict_descendant(&root, &resolved) || !resolved.is_file() {
            continue;
        }
        let bytes = match fs::read(&resolved) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(path = %resolved.display(), err = %err, "skipping unreadable focus file");
                continue;
            }
        };
        let content = String::from_utf8_lossy(&bytes);
        snippets.push(format!(
            "File: {file_path}\n{}",
            truncate_chars(&content, max_chars)
        ));
    }
    snippets.join("\n\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
