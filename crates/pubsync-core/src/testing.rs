//! Recording event sink for unit tests.

use crate::document::{Diff, Fields};
use crate::subscription::{DeliveryError, EventSink};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Added(String, Fields),
    Changed(Diff),
    Removed(String),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<Event>>,
    closed: bool,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn closed() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            closed: true,
        })
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub(crate) fn added_ids(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Added(id, _) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) -> Result<(), DeliveryError> {
        if self.closed {
            return Err(DeliveryError::Closed);
        }
        self.events.lock().push(event);
        Ok(())
    }
}

impl EventSink for RecordingSink {
    fn added(&self, _collection: &str, id: &str, fields: &Fields) -> Result<(), DeliveryError> {
        self.record(Event::Added(id.to_string(), fields.clone()))
    }

    fn changed(&self, _collection: &str, diff: &Diff) -> Result<(), DeliveryError> {
        self.record(Event::Changed(diff.clone()))
    }

    fn removed(&self, _collection: &str, id: &str) -> Result<(), DeliveryError> {
        self.record(Event::Removed(id.to_string()))
    }
}
