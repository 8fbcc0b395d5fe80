use std::collections::HashMap;

use crate::common::CommonMetricData;
use crate::core::{self, Glean};
use crate::error_recording::{record_error, ErrorType};
use crate::histogram::{Histogram, HistogramType, Precomputed};
use crate::metrics::{DistributionData, Metric, MetricType, RecordedDistribution};

/// A custom distribution metric. Accumulates integer samples into a
/// histogram with caller-chosen bucketing.
#[derive(Clone, Debug)]
pub struct CustomDistributionMetric {
    meta: CommonMetricData,
    range_min: u64,
    range_max: u64,
    bucket_count: usize,
    histogram_type: HistogramType,
}

impl MetricType for CustomDistributionMetric {
    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }
}

impl CustomDistributionMetric {
    /// Creates a new custom distribution with the given bucketing.
    pub fn new(
        meta: CommonMetricData,
        range_min: u64,
        range_max: u64,
        bucket_count: usize,
        histogram_type: HistogramType,
    ) -> Self {
        Self {
            meta,
            range_min,
            range_max,
            bucket_count,
            histogram_type,
        }
    }

    /// Accumulates signed samples. Negative samples are discarded, each
    /// recording an `invalid_value` error.
    pub fn accumulate_samples_signed(&self, samples: Vec<i64>) {
        let metric = self.clone();
        core::launch_with_glean(move |glean| metric.accumulate_samples_sync(glean, &samples));
    }

    /// Accumulates a single signed sample.
    pub fn accumulate_single_sample_signed(&self, sample: i64) {
        self.accumulate_samples_signed(vec![sample]);
    }

    pub(crate) fn accumulate_samples_sync(&self, glean: &Glean, samples: &[i64]) {
        if !self.should_record(glean) {
            return;
        }
        let mut num_negative = 0;
        let mut valid = Vec::with_capacity(samples.len());
        for &sample in samples {
            if sample < 0 {
                num_negative += 1;
            } else {
                valid.push(sample as u64);
            }
        }
        if num_negative > 0 {
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidValue,
                format!("Accumulated {num_negative} negative samples"),
                Some(num_negative),
            );
        }
        if valid.is_empty() {
            return;
        }

        let range_min = self.range_min;
        let range_max = self.range_max;
        let bucket_count = self.bucket_count;
        let histogram_type = self.histogram_type;
        glean
            .metrics_db()
            .transform(glean, &self.meta, "custom_distribution", &mut |old| {
                let mut recorded = match old {
                    Some(Metric::CustomDistribution(recorded)) => recorded,
                    _ => RecordedDistribution {
                        samples: HashMap::new(),
                        range_min,
                        range_max,
                        bucket_count,
                        histogram_type,
                    },
                };
                for &sample in &valid {
                    *recorded.samples.entry(sample).or_insert(0) += 1;
                }
                Metric::CustomDistribution(recorded)
            });
    }

    pub(crate) fn get_value(
        &self,
        glean: &Glean,
        ping_name: Option<&str>,
    ) -> Option<DistributionData> {
        let ping = ping_name.or_else(|| self.meta.send_in_pings.first().map(String::as_str))?;
        match glean.metrics_db().get_metric(
            self.meta.lifetime,
            ping,
            "custom_distribution",
            &self.meta.identifier(glean),
        ) {
            Some(Metric::CustomDistribution(recorded)) => {
                let mut histogram = Histogram::new(Precomputed::new(
                    recorded.range_min,
                    recorded.range_max,
                    recorded.bucket_count,
                    recorded.histogram_type,
                ));
                for (sample, count) in recorded.samples {
                    histogram.accumulate_n(sample, count);
                }
                Some(DistributionData::from_histogram(&histogram))
            }
            _ => None,
        }
    }

    /// **Exported for test purposes.**
    ///
    /// Gets a snapshot of the stored distribution. This blocks on the
    /// dispatcher.
    pub fn test_get_value(&self, ping_name: Option<&str>) -> Option<DistributionData> {
        core::block_on_dispatcher();
        core::with_glean(|glean| self.get_value(glean, ping_name)).flatten()
    }
}
