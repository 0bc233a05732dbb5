//! File-backed stores under the data directory.
//!
//! Journals are JSON lines appended one batch per call. The memory table is a
//! single JSON array rewritten atomically on every upsert.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::core::memory::{MemoryItem, MemoryStats, check_json_safe};
use crate::core::types::{JobRecord, JsonMap};
use crate::io::config::write_atomic;
use crate::io::store::{Journal, MemoryStore, lock, newest_for_job, scan_rows, upsert_row};

/// Append-only JSON lines journal.
#[derive(Debug)]
pub struct JsonlJournal<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _records: PhantomData<fn() -> T>,
}

impl<T> JsonlJournal<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _records: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: DeserializeOwned> JsonlJournal<T> {
    fn read_all(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read journal {}", self.path.display()))?;
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("parse journal {} line {}", self.path.display(), idx + 1)
                })
            })
            .collect()
    }
}

impl<T: JobRecord + Clone + Serialize + DeserializeOwned> Journal<T> for JsonlJournal<T> {
    #[instrument(skip_all, fields(path = %self.path.display(), count = records.len()))]
    fn append(&self, records: &[T]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record).context("serialize journal record")?);
            buf.push('\n');
        }
        let _guard = lock(&self.write_lock)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open journal {}", self.path.display()))?;
        file.write_all(buf.as_bytes())
            .with_context(|| format!("append journal {}", self.path.display()))?;
        debug!("journal appended");
        Ok(())
    }

    fn recent_for_job(&self, job_id: &str, limit: usize) -> Result<Vec<T>> {
        let _guard = lock(&self.write_lock)?;
        Ok(newest_for_job(&self.read_all()?, job_id, limit))
    }
}

/// Memory table persisted as one JSON document.
#[derive(Debug)]
pub struct FileMemoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Vec<MemoryItem>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read memory table {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse memory table {}", self.path.display()))
    }
}

impl MemoryStore for FileMemoryStore {
    #[instrument(skip_all, fields(id = %item.id))]
    fn upsert(&self, item: &MemoryItem) -> Result<()> {
        check_json_safe(item)?;
        let _guard = lock(&self.write_lock)?;
        let mut rows = self.load()?;
        upsert_row(&mut rows, item);
        let mut buf = serde_json::to_string_pretty(&rows).context("serialize memory table")?;
        buf.push('\n');
        write_atomic(&self.path, buf.as_bytes())?;
        debug!(rows = rows.len(), "memory table written");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<MemoryItem>> {
        let _guard = lock(&self.write_lock)?;
        Ok(self.load()?.into_iter().find(|row| row.id == id))
    }

    fn query_by_dimensions(&self, filters: &JsonMap, scan_limit: usize) -> Result<Vec<MemoryItem>> {
        let _guard = lock(&self.write_lock)?;
        Ok(scan_rows(&self.load()?, filters, scan_limit))
    }

    fn stats(&self) -> Result<MemoryStats> {
        let _guard = lock(&self.write_lock)?;
        Ok(MemoryStats::from_kinds(
            self.load()?.iter().map(|row| row.kind),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryKind;
    use crate::core::types::{Event, EventType};
    use crate::test_support::memory_item;
    use serde_json::json;

    fn event(job_id: &str, step_id: u64) -> Event {
        Event {
            event_id: format!("{job_id}-{step_id}"),
            job_id: job_id.to_string(),
            step_id,
            kind: EventType::Meta,
            payload: JsonMap::new(),
            started_at: 0.0,
            ended_at: 0.0,
        }
    }

    #[test]
    fn journal_survives_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs").join("events.jsonl");
        let journal = JsonlJournal::<Event>::new(&path);
        journal.append(&[event("a", 1), event("a", 2)]).expect("append");
        journal.append(&[]).expect("append empty");

        let reopened = JsonlJournal::<Event>::new(&path);
        reopened.append(&[event("b", 1)]).expect("append");
        let recent = reopened.recent_for_job("a", 10).expect("recent");
        let steps: Vec<u64> = recent.iter().map(|e| e.step_id).collect();
        assert_eq!(steps, vec![2, 1]);
        assert_eq!(fs::read_to_string(&path).expect("read").lines().count(), 3);
    }

    #[test]
    fn missing_journal_reads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let journal = JsonlJournal::<Event>::new(temp.path().join("none.jsonl"));
        assert!(journal.recent_for_job("a", 5).expect("recent").is_empty());
    }

    #[test]
    fn memory_table_upserts_by_id_on_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("memory.json");
        let store = FileMemoryStore::new(&path);
        store
            .upsert(&memory_item("a", MemoryKind::RunConfig, 1.0))
            .expect("upsert");
        let mut later = memory_item("a", MemoryKind::ErrorPattern, 2.0);
        later.snippet = "later".to_string();
        store.upsert(&later).expect("upsert");

        let reopened = FileMemoryStore::new(&path);
        let item = reopened.get("a").expect("get").expect("present");
        assert_eq!(item.snippet, "later");
        assert_eq!(reopened.stats().expect("stats").counts_by_kind["error_pattern"], 1);
        assert_eq!(reopened.stats().expect("stats").total(), 1);
    }

    #[test]
    fn unsafe_item_leaves_table_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("memory.json");
        let store = FileMemoryStore::new(&path);
        let mut item = memory_item("bad", MemoryKind::RunConfig, 1.0);
        item.pointer.insert("list".to_string(), json!([1, 2]));
        assert!(store.upsert(&item).is_err());
        assert!(!path.exists());
    }
}
