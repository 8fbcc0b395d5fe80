//! Error recording.
//!
//! User errors (an invalid value handed to a metric) do not surface to the
//! caller. They are counted in labeled counters under the `glean.error`
//! category, labeled by the offending metric's base identifier, and travel
//! in every ping that metric was bound to. The error counters themselves
//! are never error-reported.

use std::fmt::Display;

use crate::common::{CommonMetricData, Lifetime};
use crate::core::Glean;
use crate::metrics::Metric;

/// The recognized kinds of recording errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorType {
    /// The value did not pass the metric kind's validation predicate.
    InvalidValue,
    /// The label on a labeled metric violated the label contract.
    InvalidLabel,
    /// The metric was driven through an impossible state transition, e.g.
    /// stopping a timer that was never started.
    InvalidState,
    /// The value exceeded a bound and was truncated or clamped.
    InvalidOverflow,
    /// The stored value had the wrong shape for the metric kind.
    InvalidType,
}

impl ErrorType {
    /// The error name as it appears in ping payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::InvalidValue => "invalid_value",
            ErrorType::InvalidLabel => "invalid_label",
            ErrorType::InvalidState => "invalid_state",
            ErrorType::InvalidOverflow => "invalid_overflow",
            ErrorType::InvalidType => "invalid_type",
        }
    }
}

/// Builds the metadata of the labeled counter tracking `error` for the
/// metric described by `meta`.
fn error_metric_meta(error: ErrorType, meta: &CommonMetricData) -> CommonMetricData {
    // Errors on one label of a labeled metric count against the whole
    // metric, so an existing label suffix is stripped.
    let base = meta.base_identifier();
    let base = base.split('/').next().unwrap_or(&base);
    CommonMetricData {
        name: format!("{}/{}", error.as_str(), base),
        category: "glean.error".into(),
        send_in_pings: meta.send_in_pings.clone(),
        lifetime: Lifetime::Ping,
        disabled: false,
        dynamic_label: None,
    }
}

/// Counts `num_errors` occurrences of `error` against the metric described
/// by `meta` and logs `message` at warning level.
pub(crate) fn record_error(
    glean: &Glean,
    meta: &CommonMetricData,
    error: ErrorType,
    message: impl Display,
    num_errors: Option<i32>,
) {
    let error_meta = error_metric_meta(error, meta);
    let amount = num_errors.unwrap_or(1).max(1);

    log::warn!("{}: {}", meta.base_identifier(), message);

    glean
        .metrics_db()
        .transform(glean, &error_meta, "counter", &mut |old| match old {
            Some(Metric::Counter(count)) => Metric::Counter(count.saturating_add(amount)),
            _ => Metric::Counter(amount),
        });
}

/// **Exported for test purposes.**
///
/// The number of errors of the given type recorded against the metric
/// described by `meta`, in `ping` or the metric's first destination ping.
pub fn test_get_num_recorded_errors(
    glean: &Glean,
    meta: &CommonMetricData,
    error: ErrorType,
    ping: Option<&str>,
) -> i32 {
    let error_meta = error_metric_meta(error, meta);
    let ping = ping
        .map(str::to_string)
        .or_else(|| meta.send_in_pings.first().cloned());
    let ping = match ping {
        Some(ping) => ping,
        None => return 0,
    };

    match glean.metrics_db().get_metric(
        Lifetime::Ping,
        &ping,
        "counter",
        &error_meta.base_identifier(),
    ) {
        Some(Metric::Counter(count)) => count,
        _ => 0,
    }
}
