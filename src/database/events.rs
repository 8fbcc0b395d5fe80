use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::common::CommonMetricData;
use crate::core::Glean;
use crate::storage::Store;

/// One recorded event, as stored and as reported in the `events` section
/// of a ping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Milliseconds on the event timeline. Within one stored list,
    /// timestamps are monotonically non-decreasing.
    pub timestamp: u64,
    /// The event metric's category.
    pub category: String,
    /// The event metric's name.
    pub name: String,
    /// The validated extra map, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<HashMap<String, String>>,
}

/// The category/name of the synthetic marker separating event sequences
/// recorded by different process lifetimes. The reserved category keeps it
/// aligned with internal-metric naming.
const RESTART_CATEGORY: &str = "glean.internal";
const RESTART_NAME: &str = "restarted";

/// Append-only per-ping event lists.
///
/// Timestamps handed in by recording code are relative to the current
/// process's monotonic epoch; the database offsets them past the largest
/// previously-persisted timestamp so a ping's merged list stays monotonic
/// across restarts.
pub struct EventDatabase {
    store: Mutex<Box<dyn Store>>,
    timestamp_offset: AtomicU64,
}

impl EventDatabase {
    /// Creates the database over its store. Call
    /// [`initialize`](Self::initialize) before recording.
    pub fn new(store: Box<dyn Store>) -> Self {
        Self {
            store: Mutex::new(store),
            timestamp_offset: AtomicU64::new(0),
        }
    }

    /// Scans persisted event lists, appends a restart marker to every
    /// non-empty one and computes the timestamp offset for this process.
    ///
    /// Returns the pings whose lists now exceed `max_events` and must be
    /// submitted immediately.
    pub fn initialize(&self, max_events: usize) -> Vec<String> {
        let mut store = self.store.lock().unwrap();
        let root = match store.get(&[]) {
            Some(JsonValue::Object(root)) => root,
            _ => return Vec::new(),
        };

        let mut lists: HashMap<String, Vec<RecordedEvent>> = HashMap::new();
        let mut max_timestamp = 0;
        for (ping, stored) in root {
            let events: Vec<RecordedEvent> = match serde_json::from_value(stored) {
                Ok(events) => events,
                Err(_) => {
                    log::warn!("Malformed event list for ping {ping}, deleting");
                    let _ = store.delete(&[ping.as_str()]);
                    continue;
                }
            };
            if let Some(last) = events.iter().map(|event| event.timestamp).max() {
                max_timestamp = max_timestamp.max(last);
            }
            if !events.is_empty() {
                lists.insert(ping, events);
            }
        }

        if lists.is_empty() {
            return Vec::new();
        }

        let offset = max_timestamp + 1;
        self.timestamp_offset.store(offset, Ordering::SeqCst);

        let mut overflowing = Vec::new();
        for (ping, mut events) in lists {
            events.push(RecordedEvent {
                timestamp: offset,
                category: RESTART_CATEGORY.into(),
                name: RESTART_NAME.into(),
                extra: None,
            });
            let over_capacity = events.len() > max_events;
            let stored = serde_json::to_value(&events).unwrap_or(JsonValue::Null);
            if let Err(err) = store.update(&[ping.as_str()], &mut |_| stored.clone()) {
                log::error!("Failed to persist restart marker for ping {ping}: {err}");
                continue;
            }
            if over_capacity {
                overflowing.push(ping);
            }
        }
        overflowing
    }

    /// Appends an event to every destination ping's list.
    ///
    /// Returns the pings whose lists now exceed `glean`'s event capacity.
    pub fn record(
        &self,
        glean: &Glean,
        meta: &CommonMetricData,
        timestamp: u64,
        extra: Option<HashMap<String, String>>,
    ) -> Vec<String> {
        let event = RecordedEvent {
            timestamp: self.timestamp_offset.load(Ordering::SeqCst) + timestamp,
            category: meta.category.clone(),
            name: meta.name.clone(),
            extra,
        };

        let max_events = glean.max_events();
        let mut overflowing = Vec::new();
        let mut store = self.store.lock().unwrap();
        for ping in &meta.send_in_pings {
            let mut new_len = 0;
            let result = store.update(&[ping.as_str()], &mut |old| {
                let mut events: Vec<RecordedEvent> = old
                    .and_then(|value| serde_json::from_value(value.clone()).ok())
                    .unwrap_or_default();
                events.push(event.clone());
                new_len = events.len();
                serde_json::to_value(&events).unwrap_or(JsonValue::Null)
            });
            match result {
                Ok(()) if new_len > max_events => overflowing.push(ping.clone()),
                Ok(()) => {}
                Err(err) => log::error!("Failed to record event into ping {ping}: {err}"),
            }
        }
        overflowing
    }

    /// Takes the event list for `ping`, sorted by timestamp and rebased
    /// so the first event sits at 0, the shape reported in payloads.
    /// With `clear`, the stored list is erased.
    pub fn snapshot(&self, ping: &str, clear: bool) -> Option<Vec<RecordedEvent>> {
        let mut store = self.store.lock().unwrap();
        let stored = store.get(&[ping])?;
        let mut events: Vec<RecordedEvent> = match serde_json::from_value(stored) {
            Ok(events) => events,
            Err(_) => {
                log::warn!("Malformed event list for ping {ping}, deleting");
                let _ = store.delete(&[ping]);
                return None;
            }
        };
        if clear {
            let _ = store.delete(&[ping]);
        }
        if events.is_empty() {
            return None;
        }
        events.sort_by_key(|event| event.timestamp);
        let first = events[0].timestamp;
        for event in &mut events {
            event.timestamp -= first;
        }
        Some(events)
    }

    /// The stored events for `ping`, sorted, without clearing or
    /// rebasing.
    pub fn peek(&self, ping: &str) -> Vec<RecordedEvent> {
        let store = self.store.lock().unwrap();
        let mut events: Vec<RecordedEvent> = store
            .get(&[ping])
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        events.sort_by_key(|event| event.timestamp);
        events
    }

    /// Erases every stored event list.
    pub fn clear_all(&self) {
        let mut store = self.store.lock().unwrap();
        if let Err(err) = store.delete(&[]) {
            log::error!("Failed to clear the events store: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::new_glean;

    fn meta(name: &str) -> CommonMetricData {
        CommonMetricData {
            name: name.into(),
            category: "ui".into(),
            send_in_pings: vec!["events".into()],
            ..Default::default()
        }
    }

    #[test]
    fn snapshots_are_sorted_and_rebased() {
        let glean = new_glean(true);
        let db = glean.events_db();

        // Deliberately out of order; recording order must not matter.
        db.record(&glean, &meta("b"), 10, None);
        db.record(&glean, &meta("a"), 5, None);
        db.record(&glean, &meta("c"), 7, None);

        let events = db.snapshot("events", true).unwrap();
        assert_eq!(
            vec![("a", 0), ("c", 2), ("b", 5)],
            events
                .iter()
                .map(|event| (event.name.as_str(), event.timestamp as i32))
                .collect::<Vec<_>>()
        );

        // The snapshot cleared the list.
        assert!(db.snapshot("events", false).is_none());
    }

    #[test]
    fn recording_reports_pings_over_capacity() {
        let glean = new_glean(true);
        let db = glean.events_db();

        let max = glean.max_events();
        for i in 0..max {
            assert!(db.record(&glean, &meta("spam"), i as u64, None).is_empty());
        }
        assert_eq!(
            vec!["events".to_string()],
            db.record(&glean, &meta("spam"), max as u64, None)
        );
    }

    #[test]
    fn initialization_appends_a_restart_marker() {
        let glean = new_glean(true);
        let db = glean.events_db();
        db.record(&glean, &meta("before"), 3, None);

        let overflowing = db.initialize(glean.max_events());
        assert!(overflowing.is_empty());

        let events = db.peek("events");
        assert_eq!(2, events.len());
        assert_eq!("restarted", events[1].name);
        assert_eq!(RESTART_CATEGORY, events[1].category);
        // The marker sits past everything previously stored.
        assert!(events[1].timestamp > events[0].timestamp);
    }

    #[test]
    fn initialization_on_an_empty_store_is_quiet() {
        let glean = new_glean(true);
        assert!(glean.events_db().initialize(glean.max_events()).is_empty());
        assert!(glean.events_db().peek("events").is_empty());
    }
}
