//! Histogram support for the distribution metric types.
//!
//! Two bucketing strategies exist:
//!
//! * [`PrecomputedExponential`] and [`PrecomputedLinear`] compute every
//!   bucket edge up front from `(min, max, bucket_count)` and place samples
//!   by binary search.
//! * [`Functional`] derives buckets from the sample value on the fly with
//!   log-linear spacing; only the buckets a sample ever hit exist.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which precomputed bucketing a custom distribution uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistogramType {
    /// Evenly spaced buckets.
    Linear,
    /// Exponentially spaced buckets.
    Exponential,
}

/// Maps samples to the minimum value of their bucket.
pub trait Bucketing {
    /// The smallest sample value falling into the same bucket as `sample`.
    fn sample_to_bucket_minimum(&self, sample: u64) -> u64;
}

/// Creates the bucket edges for an exponential histogram: logarithmic
/// interpolation between `min` and `max`, rounding forward so every step
/// advances by at least one. The resulting edges are strictly
/// non-decreasing and start at 0.
pub fn exponential_range(min: u64, max: u64, bucket_count: usize) -> Vec<u64> {
    let log_max = (max as f64).ln();

    let mut ranges = Vec::with_capacity(bucket_count);
    ranges.push(0);
    let mut current = min.max(1);
    ranges.push(current);

    for i in 2..bucket_count {
        let log_current = (current as f64).ln();
        let log_ratio = (log_max - log_current) / (bucket_count - i) as f64;
        let log_next = log_current + log_ratio;
        let next_value = log_next.exp().round() as u64;
        current = if next_value > current {
            next_value
        } else {
            current + 1
        };
        ranges.push(current);
    }

    ranges
}

/// Creates the bucket edges for a linear histogram over `[min, max]`.
pub fn linear_range(min: u64, max: u64, bucket_count: usize) -> Vec<u64> {
    let mut ranges = Vec::with_capacity(bucket_count);
    ranges.push(0);

    let min = min.max(1);
    let divisor = (bucket_count as u64).saturating_sub(2).max(1);
    for i in 1..bucket_count {
        let range = (min * (bucket_count as u64 - 1 - i as u64) + max * (i as u64 - 1)) / divisor;
        ranges.push(range);
    }

    ranges
}

/// Bucketing with edges computed once at construction.
#[derive(Clone, Debug)]
pub struct Precomputed {
    bucket_ranges: Vec<u64>,
}

impl Precomputed {
    /// Precomputes the edges for the requested histogram type.
    pub fn new(min: u64, max: u64, bucket_count: usize, histogram_type: HistogramType) -> Self {
        let bucket_ranges = match histogram_type {
            HistogramType::Exponential => exponential_range(min, max, bucket_count),
            HistogramType::Linear => linear_range(min, max, bucket_count),
        };
        Self { bucket_ranges }
    }
}

impl Bucketing for Precomputed {
    fn sample_to_bucket_minimum(&self, sample: u64) -> u64 {
        // Invariant: edges are non-decreasing and edge 0 is 0, so the
        // search always lands on a bucket.
        match self.bucket_ranges.binary_search(&sample) {
            Ok(index) => self.bucket_ranges[index],
            Err(index) => self.bucket_ranges[index - 1],
        }
    }
}

/// Log-linear bucketing computed per sample: `buckets_per_magnitude`
/// buckets for every power of `log_base`.
#[derive(Clone, Debug)]
pub struct Functional {
    exponent: f64,
}

impl Functional {
    /// Creates functional bucketing with the given base and density.
    pub fn new(log_base: f64, buckets_per_magnitude: f64) -> Self {
        let exponent = log_base.powf(1.0 / buckets_per_magnitude);
        Self { exponent }
    }

    fn sample_to_bucket_index(&self, sample: u64) -> u64 {
        (((sample.saturating_add(1)) as f64).ln() / self.exponent.ln()) as u64
    }

    fn bucket_index_to_bucket_minimum(&self, index: u64) -> u64 {
        self.exponent.powf(index as f64).floor() as u64
    }
}

impl Bucketing for Functional {
    fn sample_to_bucket_minimum(&self, sample: u64) -> u64 {
        if sample == 0 {
            return 0;
        }
        self.bucket_index_to_bucket_minimum(self.sample_to_bucket_index(sample))
    }
}

/// A histogram: bucket counts plus the running sum and count of samples.
#[derive(Clone, Debug)]
pub struct Histogram<B: Bucketing> {
    values: HashMap<u64, u64>,
    count: u64,
    sum: u64,
    bucketing: B,
}

impl<B: Bucketing> Histogram<B> {
    /// An empty histogram over the given bucketing.
    pub fn new(bucketing: B) -> Self {
        Self {
            values: HashMap::new(),
            count: 0,
            sum: 0,
            bucketing,
        }
    }

    /// Adds a single sample.
    pub fn accumulate(&mut self, sample: u64) {
        self.accumulate_n(sample, 1);
    }

    /// Adds a sample `n` times, as when rebuilding from a stored sample
    /// map.
    pub fn accumulate_n(&mut self, sample: u64, n: u64) {
        let bucket = self.bucketing.sample_to_bucket_minimum(sample);
        *self.values.entry(bucket).or_insert(0) += n;
        self.sum = self.sum.saturating_add(sample.saturating_mul(n));
        self.count += n;
    }

    /// The non-empty buckets, keyed by bucket minimum.
    pub fn values(&self) -> &HashMap<u64, u64> {
        &self.values
    }

    /// The sum of all accumulated samples.
    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// The number of accumulated samples.
    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_edges_are_strictly_non_decreasing_and_cover_the_range() {
        let ranges = exponential_range(1, 500, 10);
        assert_eq!(10, ranges.len());
        assert_eq!(0, ranges[0]);
        assert!(ranges.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(500, *ranges.last().unwrap());
    }

    #[test]
    fn exponential_edges_advance_even_for_tiny_ranges() {
        // Log interpolation would produce duplicate edges here; the
        // rounding-forward rule keeps them strictly increasing.
        let ranges = exponential_range(1, 4, 8);
        assert!(ranges.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn precomputed_buckets_are_found_by_binary_search() {
        let bucketing = Precomputed::new(1, 500, 10, HistogramType::Exponential);
        assert_eq!(0, bucketing.sample_to_bucket_minimum(0));
        assert_eq!(1, bucketing.sample_to_bucket_minimum(1));
        // A sample beyond the top edge lands in the last bucket.
        assert_eq!(500, bucketing.sample_to_bucket_minimum(10_000));

        // Edges themselves are bucket minima.
        let ranges = exponential_range(1, 500, 10);
        for &edge in &ranges {
            assert_eq!(edge, bucketing.sample_to_bucket_minimum(edge));
        }
    }

    #[test]
    fn linear_edges_cover_the_range() {
        let ranges = linear_range(1, 10, 10);
        assert_eq!(10, ranges.len());
        assert_eq!(0, ranges[0]);
        assert_eq!(10, *ranges.last().unwrap());
    }

    #[test]
    fn functional_bucketing_is_monotonic() {
        let bucketing = Functional::new(2.0, 8.0);
        assert_eq!(0, bucketing.sample_to_bucket_minimum(0));
        let mut last = 0;
        for sample in 0..10_000 {
            let minimum = bucketing.sample_to_bucket_minimum(sample);
            assert!(minimum >= last);
            last = minimum;
        }
    }

    #[test]
    fn accumulation_tracks_sum_and_count() {
        let mut histogram = Histogram::new(Functional::new(2.0, 8.0));
        for sample in [1, 1, 2, 500] {
            histogram.accumulate(sample);
        }
        assert_eq!(4, histogram.count());
        assert_eq!(504, histogram.sum());
        assert_eq!(4, histogram.values().values().sum::<u64>());
        // Identical samples share a bucket.
        assert!(histogram.values().values().any(|&count| count == 2));
    }
}
