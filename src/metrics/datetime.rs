use chrono::{DateTime, FixedOffset};

use crate::common::CommonMetricData;
use crate::core::{self, Glean};
use crate::metrics::{Metric, MetricType, TimeUnit};
use crate::utils::{local_now_with_offset, truncate_to_time_unit};

/// A datetime metric. Records a point in time together with the local
/// timezone offset, reported at the metric's [`TimeUnit`] precision.
#[derive(Clone, Debug)]
pub struct DatetimeMetric {
    meta: CommonMetricData,
    time_unit: TimeUnit,
}

impl MetricType for DatetimeMetric {
    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }
}

impl DatetimeMetric {
    /// Creates a new datetime metric.
    pub fn new(meta: CommonMetricData, time_unit: TimeUnit) -> Self {
        Self { meta, time_unit }
    }

    /// Sets to the specified datetime, or to the current local time when
    /// `None`.
    pub fn set(&self, value: Option<DateTime<FixedOffset>>) {
        let metric = self.clone();
        core::launch_with_glean(move |glean| metric.set_sync(glean, value));
    }

    pub(crate) fn set_sync(&self, glean: &Glean, value: Option<DateTime<FixedOffset>>) {
        if !self.should_record(glean) {
            return;
        }
        let value = value.unwrap_or_else(local_now_with_offset);
        glean
            .metrics_db()
            .record(glean, &self.meta, &Metric::Datetime(value, self.time_unit));
    }

    /// The stored value truncated to the metric's precision, matching
    /// what a ping would report.
    pub(crate) fn get_value(
        &self,
        glean: &Glean,
        ping_name: Option<&str>,
    ) -> Option<DateTime<FixedOffset>> {
        let ping = ping_name.or_else(|| self.meta.send_in_pings.first().map(String::as_str))?;
        match glean.metrics_db().get_metric(
            self.meta.lifetime,
            ping,
            "datetime",
            &self.meta.identifier(glean),
        ) {
            Some(Metric::Datetime(value, unit)) => Some(truncate_to_time_unit(value, unit)),
            _ => None,
        }
    }

    /// **Exported for test purposes.**
    ///
    /// Gets the currently stored value. This blocks on the dispatcher.
    pub fn test_get_value(&self, ping_name: Option<&str>) -> Option<DateTime<FixedOffset>> {
        core::block_on_dispatcher();
        core::with_glean(|glean| self.get_value(glean, ping_name)).flatten()
    }
}
