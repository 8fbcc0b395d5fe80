//! The typed metrics this SDK can record.
//!
//! Every metric type validates its input, stores an internal
//! representation through the metrics database and projects it to a
//! payload shape when a ping is assembled. The closed set of internal
//! representations is the [`Metric`] enum; [`Metric::from_json`] is the
//! decoder keyed by the kind string under which a value is stored.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::histogram::{Functional, Histogram, HistogramType, Precomputed};
use crate::utils::get_iso_time_string;

mod boolean;
mod counter;
mod custom_distribution;
mod datetime;
mod event;
pub(crate) mod labeled;
mod ping;
mod quantity;
mod string;
mod time_unit;
mod timing_distribution;
mod uuid;

pub use self::boolean::BooleanMetric;
pub use self::counter::CounterMetric;
pub use self::custom_distribution::CustomDistributionMetric;
pub use self::datetime::DatetimeMetric;
pub use self::event::EventMetric;
pub use self::labeled::{Labelable, LabeledMetric};
pub use self::ping::PingType;
pub use self::quantity::QuantityMetric;
pub use self::string::StringMetric;
pub use self::time_unit::TimeUnit;
pub use self::timing_distribution::{TimerId, TimingDistributionMetric};
pub use self::uuid::UuidMetric;

use crate::common::CommonMetricData;
use crate::core::Glean;

/// The base of every metric type.
pub trait MetricType {
    /// The metadata shared by all metric types.
    fn meta(&self) -> &CommonMetricData;

    /// Whether a recording on this metric should proceed.
    fn should_record(&self, glean: &Glean) -> bool {
        self.meta().should_record(glean)
    }
}

/// Bucketing parameters of the timing distribution: 8 buckets per power
/// of 2.
pub(crate) const TIMING_LOG_BASE: f64 = 2.0;
pub(crate) const TIMING_BUCKETS_PER_MAGNITUDE: f64 = 8.0;

/// A snapshot of all buckets and the accumulated sum of a distribution.
///
/// The serialized form is the payload shape; `count` stays internal.
#[derive(Clone, Debug, Serialize)]
pub struct DistributionData {
    /// Bucket minimum mapped to the accumulated count.
    pub values: HashMap<u64, u64>,
    /// The sum of all recorded samples.
    pub sum: u64,
    /// The number of recorded samples.
    #[serde(skip)]
    pub count: u64,
}

impl DistributionData {
    pub(crate) fn from_histogram<B: crate::histogram::Bucketing>(
        histogram: &Histogram<B>,
    ) -> Self {
        Self {
            values: histogram.values().clone(),
            sum: histogram.sum(),
            count: histogram.count(),
        }
    }
}

/// The persisted form of a custom distribution: the raw sample counts plus
/// the bucketing parameters needed to rebuild its histogram.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedDistribution {
    /// Sample value mapped to the number of times it was recorded.
    pub samples: HashMap<u64, u64>,
    /// The lowest bucket edge above zero.
    pub range_min: u64,
    /// The highest bucket edge.
    pub range_max: u64,
    /// How many buckets the histogram has.
    pub bucket_count: usize,
    /// Which precomputed bucketing applies.
    pub histogram_type: HistogramType,
}

/// The internal representation of a recorded metric value.
///
/// This is what ends up in storage, under the path
/// `<ping>/<kind>/<identifier>`; the kind string is the storage path
/// segment, not part of the value.
#[derive(Clone, Debug, PartialEq)]
pub enum Metric {
    /// A boolean metric.
    Boolean(bool),
    /// A counter metric: a positive integer, saturating at `i32::MAX`.
    Counter(i32),
    /// A quantity metric: a non-negative integer.
    Quantity(i64),
    /// A string metric, at most 100 characters.
    String(String),
    /// A UUID metric, kept in its textual form.
    Uuid(String),
    /// A datetime with the precision it is reported at.
    Datetime(DateTime<FixedOffset>, TimeUnit),
    /// A timing distribution: nanosecond samples mapped to occurrence
    /// counts; the histogram is rebuilt on projection.
    TimingDistribution(HashMap<u64, u64>),
    /// A custom distribution, samples plus bucketing parameters.
    CustomDistribution(RecordedDistribution),
}

impl Metric {
    /// The section of the ping payload this metric kind is reported in,
    /// doubling as the kind segment of the storage path.
    pub fn ping_section(&self) -> &'static str {
        match self {
            Metric::Boolean(_) => "boolean",
            Metric::Counter(_) => "counter",
            Metric::Quantity(_) => "quantity",
            Metric::String(_) => "string",
            Metric::Uuid(_) => "uuid",
            Metric::Datetime(..) => "datetime",
            Metric::TimingDistribution(_) => "timing_distribution",
            Metric::CustomDistribution(_) => "custom_distribution",
        }
    }

    /// The storage form of this value.
    pub fn as_json(&self) -> JsonValue {
        match self {
            Metric::Boolean(b) => json!(b),
            Metric::Counter(c) => json!(c),
            Metric::Quantity(q) => json!(q),
            Metric::String(s) => json!(s),
            Metric::Uuid(u) => json!(u),
            Metric::Datetime(d, unit) => json!({
                "date": d.to_rfc3339(),
                "time_unit": unit,
            }),
            Metric::TimingDistribution(samples) => {
                serde_json::to_value(samples).unwrap_or(JsonValue::Null)
            }
            Metric::CustomDistribution(recorded) => {
                serde_json::to_value(recorded).unwrap_or(JsonValue::Null)
            }
        }
    }

    /// Decodes a stored value for the given kind, validating it against
    /// the kind's predicate. Returns `None` for schema-invalid values;
    /// callers treat that as storage corruption and delete the leaf.
    pub fn from_json(kind: &str, value: &JsonValue) -> Option<Metric> {
        match kind {
            "boolean" => value.as_bool().map(Metric::Boolean),
            "counter" => value
                .as_i64()
                .filter(|c| (1..=i64::from(i32::MAX)).contains(c))
                .map(|c| Metric::Counter(c as i32)),
            "quantity" => value.as_i64().filter(|q| *q >= 0).map(Metric::Quantity),
            "string" => value
                .as_str()
                .filter(|s| s.chars().count() <= crate::constants::MAX_STRING_LENGTH)
                .map(|s| Metric::String(s.to_string())),
            "uuid" => value
                .as_str()
                .filter(|s| self::uuid::UUID_SHAPE.is_match(s))
                .map(|s| Metric::Uuid(s.to_string())),
            "datetime" => {
                let object = value.as_object()?;
                let date = object.get("date")?.as_str()?;
                let date = DateTime::parse_from_rfc3339(date).ok()?;
                let unit = serde_json::from_value(object.get("time_unit")?.clone()).ok()?;
                Some(Metric::Datetime(date, unit))
            }
            "timing_distribution" => serde_json::from_value(value.clone())
                .ok()
                .map(Metric::TimingDistribution),
            "custom_distribution" => serde_json::from_value(value.clone())
                .ok()
                .map(Metric::CustomDistribution),
            _ => None,
        }
    }

    /// Projects the internal representation to the payload shape reported
    /// in pings.
    pub fn payload(&self) -> JsonValue {
        match self {
            Metric::Boolean(b) => json!(b),
            Metric::Counter(c) => json!(c),
            Metric::Quantity(q) => json!(q),
            Metric::String(s) => json!(s),
            Metric::Uuid(u) => json!(u),
            Metric::Datetime(d, unit) => json!(get_iso_time_string(*d, *unit)),
            Metric::TimingDistribution(samples) => {
                let mut histogram = Histogram::new(Functional::new(
                    TIMING_LOG_BASE,
                    TIMING_BUCKETS_PER_MAGNITUDE,
                ));
                for (&sample, &count) in samples {
                    histogram.accumulate_n(sample, count);
                }
                serde_json::to_value(DistributionData::from_histogram(&histogram))
                    .unwrap_or(JsonValue::Null)
            }
            Metric::CustomDistribution(recorded) => {
                let mut histogram = Histogram::new(Precomputed::new(
                    recorded.range_min,
                    recorded.range_max,
                    recorded.bucket_count,
                    recorded.histogram_type,
                ));
                for (&sample, &count) in &recorded.samples {
                    histogram.accumulate_n(sample, count);
                }
                serde_json::to_value(DistributionData::from_histogram(&histogram))
                    .unwrap_or(JsonValue::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoding_validates_per_kind() {
        assert_eq!(
            Some(Metric::Boolean(true)),
            Metric::from_json("boolean", &json!(true))
        );
        assert_eq!(None, Metric::from_json("boolean", &json!(42)));

        assert_eq!(
            Some(Metric::Counter(7)),
            Metric::from_json("counter", &json!(7))
        );
        assert_eq!(None, Metric::from_json("counter", &json!(0)));
        assert_eq!(None, Metric::from_json("counter", &json!(-3)));

        assert_eq!(
            Some(Metric::Quantity(0)),
            Metric::from_json("quantity", &json!(0))
        );
        assert_eq!(None, Metric::from_json("quantity", &json!(-1)));

        assert_eq!(None, Metric::from_json("string", &json!(false)));
        assert_eq!(None, Metric::from_json("uuid", &json!("not-a-uuid")));
        assert_eq!(None, Metric::from_json("does-not-exist", &json!(1)));
    }

    #[test]
    fn stored_values_round_trip() {
        let values = [
            Metric::Boolean(false),
            Metric::Counter(17),
            Metric::Quantity(42),
            Metric::String("ok".into()),
            Metric::Uuid("e2eaf504-dd1d-44b6-b795-9e8b8a9dcbcb".into()),
            Metric::TimingDistribution(HashMap::from([(128, 2), (256, 1)])),
            Metric::CustomDistribution(RecordedDistribution {
                samples: HashMap::from([(10, 3)]),
                range_min: 1,
                range_max: 100,
                bucket_count: 10,
                histogram_type: HistogramType::Exponential,
            }),
        ];
        for value in values {
            let decoded = Metric::from_json(value.ping_section(), &value.as_json());
            assert_eq!(Some(value), decoded);
        }
    }

    #[test]
    fn datetime_payload_truncates_to_the_time_unit() {
        let date = DateTime::parse_from_rfc3339("2021-04-20T10:30:59.123456789+02:00").unwrap();
        let metric = Metric::Datetime(date, TimeUnit::Minute);
        assert_eq!(json!("2021-04-20T10:30+02:00"), metric.payload());

        let decoded = Metric::from_json("datetime", &metric.as_json());
        assert_eq!(Some(metric), decoded);
    }

    #[test]
    fn distribution_payload_reaccumulates_the_sample_map() {
        let metric = Metric::TimingDistribution(HashMap::from([(100, 2), (5000, 1)]));
        let payload = metric.payload();
        assert_eq!(json!(5200), payload["sum"]);
        let total: u64 = payload["values"]
            .as_object()
            .unwrap()
            .values()
            .map(|v| v.as_u64().unwrap())
            .sum();
        assert_eq!(3, total);
    }
}
