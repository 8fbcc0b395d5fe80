use std::collections::HashMap;

use crate::common::CommonMetricData;
use crate::constants::{MAX_EXTRA_KEYS, MAX_EXTRA_KEY_LENGTH, MAX_EXTRA_VALUE_LENGTH};
use crate::core::{self, Glean};
use crate::database::events::RecordedEvent;
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::MetricType;
use crate::platform;
use crate::utils::truncate_string_at_boundary;

/// An event metric. Records that something happened, with an optional map
/// of extra context, ordered by a monotonic timestamp.
#[derive(Clone, Debug)]
pub struct EventMetric {
    meta: CommonMetricData,
    allowed_extra_keys: Vec<String>,
}

impl MetricType for EventMetric {
    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }
}

impl EventMetric {
    /// Creates a new event metric accepting the given extra keys.
    pub fn new(meta: CommonMetricData, allowed_extra_keys: Vec<String>) -> Self {
        Self {
            meta,
            allowed_extra_keys,
        }
    }

    /// Records an event. The timestamp is taken now, not when the record
    /// task executes.
    pub fn record(&self, extra: HashMap<String, String>) {
        let timestamp = platform::now_ms();
        let metric = self.clone();
        core::launch_with_glean(move |glean| metric.record_sync(glean, timestamp, extra));
    }

    /// Validates the extras against the allowed keys and the size limits,
    /// recording errors for out-of-contract entries.
    fn validate_extra(
        &self,
        glean: &Glean,
        extra: HashMap<String, String>,
    ) -> Option<HashMap<String, String>> {
        if extra.is_empty() {
            return None;
        }

        let mut validated = HashMap::new();
        for (key, value) in extra {
            if !self.allowed_extra_keys.contains(&key) {
                record_error(
                    glean,
                    &self.meta,
                    ErrorType::InvalidValue,
                    format!("Unknown extra key '{key}'"),
                    None,
                );
                continue;
            }
            let key = if key.chars().count() > MAX_EXTRA_KEY_LENGTH {
                record_error(
                    glean,
                    &self.meta,
                    ErrorType::InvalidOverflow,
                    format!("Extra key '{key}' longer than {MAX_EXTRA_KEY_LENGTH} characters"),
                    None,
                );
                truncate_string_at_boundary(&key, MAX_EXTRA_KEY_LENGTH)
            } else {
                key
            };
            let value = if value.chars().count() > MAX_EXTRA_VALUE_LENGTH {
                record_error(
                    glean,
                    &self.meta,
                    ErrorType::InvalidOverflow,
                    format!("Extra value for '{key}' longer than {MAX_EXTRA_VALUE_LENGTH} characters"),
                    None,
                );
                truncate_string_at_boundary(&value, MAX_EXTRA_VALUE_LENGTH)
            } else {
                value
            };
            validated.insert(key, value);
        }

        if validated.len() > MAX_EXTRA_KEYS {
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidOverflow,
                format!("More than {MAX_EXTRA_KEYS} extra keys"),
                None,
            );
            let mut keys: Vec<String> = validated.keys().cloned().collect();
            keys.sort();
            for key in keys.into_iter().skip(MAX_EXTRA_KEYS) {
                validated.remove(&key);
            }
        }

        if validated.is_empty() {
            None
        } else {
            Some(validated)
        }
    }

    pub(crate) fn record_sync(
        &self,
        glean: &Glean,
        timestamp: u64,
        extra: HashMap<String, String>,
    ) {
        if !self.should_record(glean) {
            return;
        }
        let extra = self.validate_extra(glean, extra);
        let overflowing = glean
            .events_db()
            .record(glean, &self.meta, timestamp, extra);
        // Pings whose event list just ran over capacity go out right away,
        // inside the same dispatched unit as this recording.
        for ping_name in overflowing {
            glean.submit_ping_by_name(&ping_name, Some("max_capacity"));
        }
    }

    pub(crate) fn get_value(
        &self,
        glean: &Glean,
        ping_name: Option<&str>,
    ) -> Option<Vec<RecordedEvent>> {
        let ping = ping_name.or_else(|| self.meta.send_in_pings.first().map(String::as_str))?;
        let events: Vec<RecordedEvent> = glean
            .events_db()
            .peek(ping)
            .into_iter()
            .filter(|event| event.category == self.meta.category && event.name == self.meta.name)
            .collect();
        if events.is_empty() {
            None
        } else {
            Some(events)
        }
    }

    /// **Exported for test purposes.**
    ///
    /// Gets the events recorded so far for this metric. This blocks on the
    /// dispatcher.
    pub fn test_get_value(&self, ping_name: Option<&str>) -> Option<Vec<RecordedEvent>> {
        core::block_on_dispatcher();
        core::with_glean(|glean| self.get_value(glean, ping_name)).flatten()
    }
}
