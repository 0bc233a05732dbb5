//! Turn events into memory items.
//!
//! A bad event or a failed write is logged and counted; it never stops the
//! rest of the batch.

use tracing::{debug, instrument, warn};

use crate::core::memory::item_for_event;
use crate::core::types::Event;
use crate::io::stamp::now_secs;
use crate::io::store::MemoryStore;

/// Counts from one ingest batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub upserted: usize,
    /// Events that carry no memory (META, SYSTEM).
    pub skipped: usize,
    /// Malformed events and rejected upserts.
    pub failed: usize,
}

pub struct MemoryIngest<'a> {
    store: &'a dyn MemoryStore,
}

impl<'a> MemoryIngest<'a> {
    pub fn new(store: &'a dyn MemoryStore) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(events = events.len()))]
    pub fn ingest(&self, events: &[Event]) -> IngestReport {
        let mut report = IngestReport::default();
        for event in events {
            let item = match item_for_event(event, now_secs()) {
                Ok(Some(item)) => item,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(err) => {
                    warn!(event_id = %event.event_id, err = %err, "skipping malformed event");
                    report.failed += 1;
                    continue;
                }
            };
            match self.store.upsert(&item) {
                Ok(()) => report.upserted += 1,
                Err(err) => {
                    warn!(event_id = %event.event_id, err = %format!("{err:#}"), "memory upsert failed");
                    report.failed += 1;
                }
            }
        }
        debug!(
            upserted = report.upserted,
            skipped = report.skipped,
            failed = report.failed,
            "ingest finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryKind;
    use crate::core::types::{EventType, JsonMap};
    use crate::io::store::InMemoryMemoryStore;
    use serde_json::json;

    fn event(id: &str, kind: EventType, payload: serde_json::Value) -> Event {
        let serde_json::Value::Object(payload) = payload else {
            panic!("payload must be an object");
        };
        Event {
            event_id: id.to_string(),
            job_id: "job".to_string(),
            step_id: 1,
            kind,
            payload,
            started_at: 0.0,
            ended_at: 0.0,
        }
    }

    #[test]
    fn one_bad_event_does_not_stop_the_batch() {
        let store = InMemoryMemoryStore::new();
        let ingest = MemoryIngest::new(&store);
        let report = ingest.ingest(&[
            event("bad", EventType::Run, json!({"cmd": "x", "exit_code": "two"})),
            event("ok", EventType::Run, json!({"cmd": "x", "exit_code": 0, "stderr": ""})),
            event("meta", EventType::Meta, json!({})),
        ]);
        assert_eq!(
            report,
            IngestReport {
                upserted: 1,
                skipped: 1,
                failed: 1
            }
        );
        let item = store.get("ok").expect("get").expect("present");
        assert_eq!(item.kind, MemoryKind::RunConfig);
        assert_eq!(store.get("bad").expect("get"), None);
    }

    #[test]
    fn reingesting_keeps_one_item_with_the_later_write() {
        let store = InMemoryMemoryStore::new();
        let ingest = MemoryIngest::new(&store);
        let failing = event(
            "e1",
            EventType::Run,
            json!({"cmd": "pytest", "exit_code": 1, "stderr": "first"}),
        );
        ingest.ingest(std::slice::from_ref(&failing));
        let mut again = failing;
        again.payload.insert("stderr".to_string(), json!("second"));
        ingest.ingest(&[again]);

        assert_eq!(store.stats().expect("stats").total(), 1);
        let item = store.get("e1").expect("get").expect("present");
        assert!(item.snippet.ends_with("stderr=second"));
        assert_eq!(store.query_by_dimensions(&JsonMap::new(), 10).expect("scan").len(), 1);
    }
}
