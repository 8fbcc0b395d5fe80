use crate::common::CommonMetricData;
use crate::core::{self, Glean};
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{Metric, MetricType};

/// A quantity metric. Records a single non-negative integer, e.g. the
/// width of a display in pixels.
#[derive(Clone, Debug)]
pub struct QuantityMetric {
    meta: CommonMetricData,
}

impl MetricType for QuantityMetric {
    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }
}

impl QuantityMetric {
    /// Creates a new quantity metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self { meta }
    }

    /// Sets to the specified value. Negative values record an
    /// `invalid_value` error instead.
    pub fn set(&self, value: i64) {
        let metric = self.clone();
        core::launch_with_glean(move |glean| metric.set_sync(glean, value));
    }

    pub(crate) fn set_sync(&self, glean: &Glean, value: i64) {
        if !self.should_record(glean) {
            return;
        }
        if value < 0 {
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidValue,
                format!("Set negative value {value}"),
                None,
            );
            return;
        }
        glean
            .metrics_db()
            .record(glean, &self.meta, &Metric::Quantity(value));
    }

    pub(crate) fn get_value(&self, glean: &Glean, ping_name: Option<&str>) -> Option<i64> {
        let ping = ping_name.or_else(|| self.meta.send_in_pings.first().map(String::as_str))?;
        match glean.metrics_db().get_metric(
            self.meta.lifetime,
            ping,
            "quantity",
            &self.meta.identifier(glean),
        ) {
            Some(Metric::Quantity(value)) => Some(value),
            _ => None,
        }
    }

    /// **Exported for test purposes.**
    ///
    /// Gets the currently stored value. This blocks on the dispatcher.
    pub fn test_get_value(&self, ping_name: Option<&str>) -> Option<i64> {
        core::block_on_dispatcher();
        core::with_glean(|glean| self.get_value(glean, ping_name)).flatten()
    }
}
