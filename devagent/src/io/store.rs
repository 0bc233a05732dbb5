//! Storage seams for events, traces and memory items.
//!
//! The core consumes persistence through these traits only. Each call is
//! atomic on its own; there are no cross-call transactions.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::core::memory::{MemoryItem, MemoryStats, check_json_safe, matches_filters};
use crate::core::types::{Event, JobRecord, JsonMap, TraceEntry};
use crate::io::file_store::{FileMemoryStore, JsonlJournal};

/// Append-only log of per-job records.
pub trait Journal<T>: Send + Sync {
    fn append(&self, records: &[T]) -> Result<()>;

    /// Most recent records for `job_id`, ordered by step id descending and then
    /// by append order descending.
    fn recent_for_job(&self, job_id: &str, limit: usize) -> Result<Vec<T>>;
}

/// Memory table keyed by item id.
pub trait MemoryStore: Send + Sync {
    /// Insert or overwrite by id. Rejects non JSON-safe items before writing.
    fn upsert(&self, item: &MemoryItem) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<MemoryItem>>;

    /// Rows whose dimensions match every filter by textual value, in scan
    /// order, at most `scan_limit`.
    fn query_by_dimensions(&self, filters: &JsonMap, scan_limit: usize) -> Result<Vec<MemoryItem>>;

    fn stats(&self) -> Result<MemoryStats>;
}

/// The persisted collaborators one agent works against.
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn Journal<Event>>,
    pub traces: Arc<dyn Journal<TraceEntry>>,
    pub memory: Arc<dyn MemoryStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            events: Arc::new(InMemoryJournal::<Event>::new()),
            traces: Arc::new(InMemoryJournal::<TraceEntry>::new()),
            memory: Arc::new(InMemoryMemoryStore::new()),
        }
    }

    /// File-backed stores: `events.jsonl`, `traces.jsonl` and `memory.json`
    /// under `data_dir`.
    pub fn on_disk(data_dir: &Path) -> Self {
        Self {
            events: Arc::new(JsonlJournal::<Event>::new(data_dir.join("events.jsonl"))),
            traces: Arc::new(JsonlJournal::<TraceEntry>::new(data_dir.join("traces.jsonl"))),
            memory: Arc::new(FileMemoryStore::new(data_dir.join("memory.json"))),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow!("store lock poisoned"))
}

/// Select the newest records for one job from an append-ordered slice.
pub(crate) fn newest_for_job<T: JobRecord + Clone>(
    records: &[T],
    job_id: &str,
    limit: usize,
) -> Vec<T> {
    let mut matching: Vec<(usize, &T)> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| record.job_id() == job_id)
        .collect();
    matching.sort_by(|(ia, a), (ib, b)| b.step_id().cmp(&a.step_id()).then(ib.cmp(ia)));
    matching
        .into_iter()
        .take(limit)
        .map(|(_, record)| record.clone())
        .collect()
}

/// Journal held in memory.
#[derive(Debug)]
pub struct InMemoryJournal<T> {
    records: Mutex<Vec<T>>,
}

impl<T> Default for InMemoryJournal<T> {
    fn default() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }
}

impl<T> InMemoryJournal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: JobRecord + Clone + Send> Journal<T> for InMemoryJournal<T> {
    fn append(&self, records: &[T]) -> Result<()> {
        lock(&self.records)?.extend_from_slice(records);
        Ok(())
    }

    fn recent_for_job(&self, job_id: &str, limit: usize) -> Result<Vec<T>> {
        let records = lock(&self.records)?;
        Ok(newest_for_job(&records, job_id, limit))
    }
}

/// Memory table held in memory, preserving first-insert scan order.
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    rows: Mutex<Vec<MemoryItem>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Overwrite in place when the id exists, append otherwise.
pub(crate) fn upsert_row(rows: &mut Vec<MemoryItem>, item: &MemoryItem) {
    match rows.iter_mut().find(|row| row.id == item.id) {
        Some(row) => *row = item.clone(),
        None => rows.push(item.clone()),
    }
}

pub(crate) fn scan_rows(rows: &[MemoryItem], filters: &JsonMap, scan_limit: usize) -> Vec<MemoryItem> {
    rows.iter()
        .filter(|row| matches_filters(&row.dimensions, filters))
        .take(scan_limit)
        .cloned()
        .collect()
}

impl MemoryStore for InMemoryMemoryStore {
    fn upsert(&self, item: &MemoryItem) -> Result<()> {
        check_json_safe(item)?;
        let mut rows = lock(&self.rows)?;
        upsert_row(&mut rows, item);
        debug!(id = %item.id, kind = %item.kind, "memory item upserted");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<MemoryItem>> {
        Ok(lock(&self.rows)?.iter().find(|row| row.id == id).cloned())
    }

    fn query_by_dimensions(&self, filters: &JsonMap, scan_limit: usize) -> Result<Vec<MemoryItem>> {
        let rows = lock(&self.rows)?;
        Ok(scan_rows(&rows, filters, scan_limit))
    }

    fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats::from_kinds(
            lock(&self.rows)?.iter().map(|row| row.kind),
        ))
    }
}
