use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::common::CommonMetricData;
use crate::core::{self, Glean};
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{Metric, MetricType};

/// The loose UUID shape accepted from callers: 32 hex digits with the
/// usual group separators optional.
pub(crate) static UUID_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{12}$",
    )
    .unwrap()
});

/// A UUID metric. Records an identifier such as a client or session id.
#[derive(Clone, Debug)]
pub struct UuidMetric {
    meta: CommonMetricData,
}

impl MetricType for UuidMetric {
    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }
}

impl UuidMetric {
    /// Creates a new UUID metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self { meta }
    }

    /// Sets to the specified value.
    ///
    /// Values not matching the loose UUID shape record an `invalid_value`
    /// error and are not persisted.
    pub fn set(&self, value: impl Into<String>) {
        let metric = self.clone();
        let value = value.into();
        core::launch_with_glean(move |glean| metric.set_sync(glean, &value));
    }

    /// Generates a new random UUID v4, sets the metric to it and returns
    /// it.
    pub fn generate_and_set(&self) -> Uuid {
        let uuid = Uuid::new_v4();
        let metric = self.clone();
        let value = uuid.to_string();
        core::launch_with_glean(move |glean| metric.set_sync(glean, &value));
        uuid
    }

    pub(crate) fn set_sync(&self, glean: &Glean, value: &str) {
        if !self.should_record(glean) {
            return;
        }
        if !UUID_SHAPE.is_match(value) {
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidValue,
                format!("Unexpected UUID string '{value}'"),
                None,
            );
            return;
        }
        glean
            .metrics_db()
            .record(glean, &self.meta, &Metric::Uuid(value.to_string()));
    }

    pub(crate) fn set_from_uuid_sync(&self, glean: &Glean, value: Uuid) {
        self.set_sync(glean, &value.to_string());
    }

    pub(crate) fn get_value(&self, glean: &Glean, ping_name: Option<&str>) -> Option<Uuid> {
        let ping = ping_name.or_else(|| self.meta.send_in_pings.first().map(String::as_str))?;
        match glean.metrics_db().get_metric(
            self.meta.lifetime,
            ping,
            "uuid",
            &self.meta.identifier(glean),
        ) {
            Some(Metric::Uuid(value)) => Uuid::parse_str(&value).ok(),
            _ => None,
        }
    }

    /// **Exported for test purposes.**
    ///
    /// Gets the currently stored value. This blocks on the dispatcher.
    pub fn test_get_value(&self, ping_name: Option<&str>) -> Option<Uuid> {
        core::block_on_dispatcher();
        core::with_glean(|glean| self.get_value(glean, ping_name)).flatten()
    }
}
