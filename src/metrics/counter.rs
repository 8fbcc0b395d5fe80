use crate::common::CommonMetricData;
use crate::core::{self, Glean};
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{Metric, MetricType};

/// A counter metric. Accumulates a positive integer, saturating at
/// `i32::MAX`.
#[derive(Clone, Debug)]
pub struct CounterMetric {
    meta: CommonMetricData,
}

impl MetricType for CounterMetric {
    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }
}

impl CounterMetric {
    /// Creates a new counter metric.
    pub fn new(meta: CommonMetricData) -> Self {
        Self { meta }
    }

    /// Increases the counter by `amount`.
    ///
    /// A zero or negative amount records an `invalid_value` error instead.
    pub fn add(&self, amount: i32) {
        let metric = self.clone();
        core::launch_with_glean(move |glean| metric.add_sync(glean, amount));
    }

    pub(crate) fn add_sync(&self, glean: &Glean, amount: i32) {
        if !self.should_record(glean) {
            return;
        }
        if amount <= 0 {
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidValue,
                format!("Added negative or zero value {amount}"),
                None,
            );
            return;
        }
        glean
            .metrics_db()
            .transform(glean, &self.meta, "counter", &mut |old| match old {
                Some(Metric::Counter(count)) => Metric::Counter(count.saturating_add(amount)),
                _ => Metric::Counter(amount),
            });
    }

    pub(crate) fn get_value(&self, glean: &Glean, ping_name: Option<&str>) -> Option<i32> {
        let ping = ping_name.or_else(|| self.meta.send_in_pings.first().map(String::as_str))?;
        match glean.metrics_db().get_metric(
            self.meta.lifetime,
            ping,
            "counter",
            &self.meta.identifier(glean),
        ) {
            Some(Metric::Counter(count)) => Some(count),
            _ => None,
        }
    }

    /// **Exported for test purposes.**
    ///
    /// Gets the currently stored value. This blocks on the dispatcher.
    pub fn test_get_value(&self, ping_name: Option<&str>) -> Option<i32> {
        core::block_on_dispatcher();
        core::with_glean(|glean| self.get_value(glean, ping_name)).flatten()
    }
}
