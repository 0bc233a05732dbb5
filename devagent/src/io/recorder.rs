//! Append events and decision traces to their journals.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::types::{Event, TraceEntry};
use crate::io::store::Stores;

/// Thin pass-through onto the event and trace journals.
pub struct Recorder<'a> {
    stores: &'a Stores,
}

impl<'a> Recorder<'a> {
    pub fn new(stores: &'a Stores) -> Self {
        Self { stores }
    }

    #[instrument(skip_all, fields(count = events.len()))]
    pub fn record_events(&self, events: &[Event]) -> Result<()> {
        self.stores
            .events
            .append(events)
            .context("append events")?;
        debug!("events recorded");
        Ok(())
    }

    #[instrument(skip_all, fields(job_id = %entry.job_id, step_id = entry.step_id))]
    pub fn record_trace(&self, entry: &TraceEntry) -> Result<()> {
        self.stores
            .traces
            .append(std::slice::from_ref(entry))
            .context("append trace")?;
        debug!(decision_id = %entry.decision_id, "trace recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{EventType, JsonMap};

    #[test]
    fn records_reach_the_journals() {
        let stores = Stores::in_memory();
        let recorder = Recorder::new(&stores);
        let event = Event {
            event_id: "e1".to_string(),
            job_id: "job".to_string(),
            step_id: 4,
            kind: EventType::Meta,
            payload: JsonMap::new(),
            started_at: 1.0,
            ended_at: 1.0,
        };
        recorder.record_events(&[event.clone()]).expect("events");
        recorder
            .record_trace(&TraceEntry {
                decision_id: "d1".to_string(),
                job_id: "job".to_string(),
                step_id: 4,
                decision_input_summary: JsonMap::new(),
                program_summary: JsonMap::new(),
                outcome_summary: JsonMap::new(),
            })
            .expect("trace");

        assert_eq!(stores.events.recent_for_job("job", 10).expect("events"), vec![event]);
        let traces = stores.traces.recent_for_job("job", 10).expect("traces");
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].decision_id, "d1");
    }
}
