use crate::common::CommonMetricData;
use crate::constants::MAX_STRING_LENGTH;
use crate::core::{self, Glean};
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{Metric, MetricType};
use crate::utils::truncate_string_at_boundary;

/// A string metric. Records a single short text value.
#[derive(Clone, Debug)]
pub struct StringMetric {
    meta: CommonMetricData,
}

impl MetricType for StringMetric {
    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }
}

impl StringMetric {
    /// Creates a new string metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self { meta }
    }

    /// Sets to the specified value.
    ///
    /// Values longer than 100 characters are truncated and an
    /// `invalid_overflow` error is recorded.
    pub fn set(&self, value: impl Into<String>) {
        let metric = self.clone();
        let value = value.into();
        core::launch_with_glean(move |glean| metric.set_sync(glean, &value));
    }

    pub(crate) fn set_sync(&self, glean: &Glean, value: &str) {
        if !self.should_record(glean) {
            return;
        }
        let stored = if value.chars().count() > MAX_STRING_LENGTH {
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidOverflow,
                format!("Value length {} exceeds maximum of {}", value.len(), MAX_STRING_LENGTH),
                None,
            );
            truncate_string_at_boundary(value, MAX_STRING_LENGTH)
        } else {
            value.to_string()
        };
        glean
            .metrics_db()
            .record(glean, &self.meta, &Metric::String(stored));
    }

    pub(crate) fn get_value(&self, glean: &Glean, ping_name: Option<&str>) -> Option<String> {
        let ping = ping_name.or_else(|| self.meta.send_in_pings.first().map(String::as_str))?;
        match glean.metrics_db().get_metric(
            self.meta.lifetime,
            ping,
            "string",
            &self.meta.identifier(glean),
        ) {
            Some(Metric::String(value)) => Some(value),
            _ => None,
        }
    }

    /// **Exported for test purposes.**
    ///
    /// Gets the currently stored value. This blocks on the dispatcher.
    pub fn test_get_value(&self, ping_name: Option<&str>) -> Option<String> {
        core::block_on_dispatcher();
        core::with_glean(|glean| self.get_value(glean, ping_name)).flatten()
    }
}
