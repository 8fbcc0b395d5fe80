use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::CommonMetricData;
use crate::core::{self, Glean};
use crate::error_recording::{record_error, ErrorType};
use crate::histogram::{Functional, Histogram};
use crate::metrics::{
    DistributionData, Metric, MetricType, TimeUnit, TIMING_BUCKETS_PER_MAGNITUDE, TIMING_LOG_BASE,
};
use crate::platform;

/// Samples longer than 10 minutes are truncated to this value and an
/// `invalid_overflow` error is recorded.
pub(crate) const MAX_SAMPLE_TIME: u64 = 1000 * 1000 * 1000 * 60 * 10;

/// Identifies one running timer of a timing distribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId {
    id: u64,
}

impl From<u64> for TimerId {
    fn from(id: u64) -> Self {
        Self { id }
    }
}

/// A timing distribution metric. Accumulates durations into a log-linear
/// histogram, either from start/stop timers or from raw samples.
#[derive(Clone, Debug)]
pub struct TimingDistributionMetric {
    meta: CommonMetricData,
    time_unit: TimeUnit,
    next_id: Arc<AtomicU64>,
    starts: Arc<Mutex<HashMap<TimerId, u64>>>,
}

impl MetricType for TimingDistributionMetric {
    fn meta(&self) -> &CommonMetricData {
        &self.meta
    }
}

impl TimingDistributionMetric {
    /// Creates a new timing distribution. `time_unit` is the unit raw
    /// samples arrive in; timers always measure in nanoseconds.
    pub fn new(meta: CommonMetricData, time_unit: TimeUnit) -> Self {
        Self {
            meta,
            time_unit,
            next_id: Arc::new(AtomicU64::new(0)),
            starts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts tracking time. Multiple timers can run concurrently; the
    /// start time is taken now, not when the task executes.
    pub fn start(&self) -> TimerId {
        let id = TimerId::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        let start_time = platform::now_ns();
        let metric = self.clone();
        core::launch_with_glean(move |_| metric.set_start(id, start_time));
        id
    }

    pub(crate) fn set_start(&self, id: TimerId, start_time: u64) {
        self.starts.lock().unwrap().insert(id, start_time);
    }

    /// Stops the given timer and accumulates the elapsed time. Stopping a
    /// timer that was never started records an `invalid_state` error.
    pub fn stop_and_accumulate(&self, id: TimerId) {
        let stop_time = platform::now_ns();
        let metric = self.clone();
        core::launch_with_glean(move |glean| metric.set_stop_and_accumulate(glean, id, stop_time));
    }

    pub(crate) fn set_stop_and_accumulate(&self, glean: &Glean, id: TimerId, stop_time: u64) {
        if !self.should_record(glean) {
            self.starts.lock().unwrap().remove(&id);
            return;
        }
        let start_time = match self.starts.lock().unwrap().remove(&id) {
            Some(start_time) => start_time,
            None => {
                record_error(
                    glean,
                    &self.meta,
                    ErrorType::InvalidState,
                    "Timing not running",
                    None,
                );
                return;
            }
        };
        let duration = match stop_time.checked_sub(start_time) {
            Some(duration) => duration,
            None => {
                record_error(
                    glean,
                    &self.meta,
                    ErrorType::InvalidValue,
                    "Timer stopped with a negative duration",
                    None,
                );
                return;
            }
        };
        let duration = if duration > MAX_SAMPLE_TIME {
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidOverflow,
                "Sample longer than 10 minutes",
                None,
            );
            MAX_SAMPLE_TIME
        } else {
            duration
        };
        self.accumulate_into_storage(glean, &[duration]);
    }

    /// Aborts a previous [`start`](Self::start). No error is recorded if
    /// the timer was not running.
    pub fn cancel(&self, id: TimerId) {
        let metric = self.clone();
        core::launch_with_glean(move |_| {
            metric.starts.lock().unwrap().remove(&id);
        });
    }

    /// Accumulates signed samples in the metric's time unit.
    ///
    /// Negative samples record an `invalid_value` error each; samples over
    /// 10 minutes are truncated with an `invalid_overflow` error each.
    pub fn accumulate_samples(&self, samples: Vec<i64>) {
        let metric = self.clone();
        core::launch_with_glean(move |glean| metric.accumulate_samples_sync(glean, &samples));
    }

    /// Accumulates a single signed sample in the metric's time unit.
    pub fn accumulate_single_sample(&self, sample: i64) {
        self.accumulate_samples(vec![sample]);
    }

    pub(crate) fn accumulate_samples_sync(&self, glean: &Glean, samples: &[i64]) {
        if !self.should_record(glean) {
            return;
        }
        let mut num_negative = 0;
        let mut num_too_long = 0;
        let mut valid = Vec::with_capacity(samples.len());

        for &sample in samples {
            if sample < 0 {
                num_negative += 1;
                continue;
            }
            let mut nanos = self.time_unit.as_nanos(sample as u64);
            if nanos > MAX_SAMPLE_TIME {
                num_too_long += 1;
                nanos = MAX_SAMPLE_TIME;
            }
            valid.push(nanos);
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
        if num_too_long > 0 {
            record_error(
                glean,
                &self.meta,
                ErrorType::InvalidOverflow,
                format!("{num_too_long} samples are longer than 10 minutes"),
                Some(num_too_long),
            );
        }
        self.accumulate_into_storage(glean, &valid);
    }

    /// Accumulates raw nanosecond samples, bypassing unit conversion.
    pub fn accumulate_raw_samples_nanos(&self, samples: Vec<u64>) {
        let metric = self.clone();
        core::launch_with_glean(move |glean| {
            if !metric.should_record(glean) {
                return;
            }
            let mut num_too_long = 0;
            let valid: Vec<u64> = samples
                .iter()
                .map(|&sample| {
                    if sample > MAX_SAMPLE_TIME {
                        num_too_long += 1;
                        MAX_SAMPLE_TIME
                    } else {
                        sample
                    }
                })
                .collect();
            if num_too_long > 0 {
                record_error(
                    glean,
                    &metric.meta,
                    ErrorType::InvalidOverflow,
                    format!("{num_too_long} samples are longer than 10 minutes"),
                    Some(num_too_long),
                );
            }
            metric.accumulate_into_storage(glean, &valid);
        });
    }

    fn accumulate_into_storage(&self, glean: &Glean, samples: &[u64]) {
        if samples.is_empty() {
            return;
        }
        glean
            .metrics_db()
            .transform(glean, &self.meta, "timing_distribution", &mut |old| {
                let mut stored = match old {
                    Some(Metric::TimingDistribution(samples)) => samples,
                    _ => HashMap::new(),
                };
                for &sample in samples {
                    *stored.entry(sample).or_insert(0) += 1;
                }
                Metric::TimingDistribution(stored)
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
            "timing_distribution",
            &self.meta.identifier(glean),
        ) {
            Some(Metric::TimingDistribution(samples)) => {
                let mut histogram = Histogram::new(Functional::new(
                    TIMING_LOG_BASE,
                    TIMING_BUCKETS_PER_MAGNITUDE,
                ));
                for (sample, count) in samples {
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
