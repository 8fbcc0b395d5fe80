use serde::{Deserialize, Serialize};

/// The resolution a time-based metric is reported at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Converts a duration expressed in this unit to nanoseconds,
    /// saturating on overflow.
    pub fn as_nanos(self, duration: u64) -> u64 {
        let factor: u64 = match self {
            TimeUnit::Nanosecond => 1,
            TimeUnit::Microsecond => 1_000,
            TimeUnit::Millisecond => 1_000_000,
            TimeUnit::Second => 1_000_000_000,
            TimeUnit::Minute => 60 * 1_000_000_000,
            TimeUnit::Hour => 60 * 60 * 1_000_000_000,
            TimeUnit::Day => 24 * 60 * 60 * 1_000_000_000,
        };
        duration.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_to_nanoseconds() {
        assert_eq!(1, TimeUnit::Nanosecond.as_nanos(1));
        assert_eq!(1_000_000, TimeUnit::Millisecond.as_nanos(1));
        assert_eq!(120 * 1_000_000_000, TimeUnit::Minute.as_nanos(2));
        assert_eq!(u64::MAX, TimeUnit::Day.as_nanos(u64::MAX));
    }

    #[test]
    fn serializes_in_snake_case() {
        assert_eq!(
            "\"nanosecond\"",
            serde_json::to_string(&TimeUnit::Nanosecond).unwrap()
        );
        let unit: TimeUnit = serde_json::from_str("\"minute\"").unwrap();
        assert_eq!(TimeUnit::Minute, unit);
    }
}
