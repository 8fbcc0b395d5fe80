use crate::common::CommonMetricData;
use crate::core::{self, Glean};
use crate::metrics::{Metric, MetricType};

/// A boolean metric. Records a simple true or false value.
#[derive(Clone, Debug)]
pub struct BooleanMetric {
    meta: CommonMetricData,
}

impl MetricType for BooleanMetric {
    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }
}

impl BooleanMetric {
    /// Creates a new boolean metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self { meta }
    }

    /// Sets to the specified boolean value.
    pub fn set(&self, value: bool) {
        let metric = self.clone();
        core::launch_with_glean(move |glean| metric.set_sync(glean, value));
    }

    pub(crate) fn set_sync(&self, glean: &Glean, value: bool) {
        if !self.should_record(glean) {
            return;
        }
        glean
            .metrics_db()
            .record(glean, &self.meta, &Metric::Boolean(value));
    }

    pub(crate) fn get_value(&self, glean: &Glean, ping_name: Option<&str>) -> Option<bool> {
        let ping = ping_name.or_else(|| self.meta.send_in_pings.first().map(String::as_str))?;
        match glean.metrics_db().get_metric(
            self.meta.lifetime,
            ping,
            "boolean",
            &self.meta.identifier(glean),
        ) {
            Some(Metric::Boolean(value)) => Some(value),
            _ => None,
        }
    }

    /// **Exported for test purposes.**
    ///
    /// Gets the currently stored value, from `ping_name` or the metric's
    /// first destination ping. This blocks on the dispatcher.
    pub fn test_get_value(&self, ping_name: Option<&str>) -> Option<bool> {
        core::block_on_dispatcher();
        core::with_glean(|glean| self.get_value(glean, ping_name)).flatten()
    }
}
