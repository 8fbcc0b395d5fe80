//! The labeled-metric wrapper.
//!
//! A labeled metric fans one metric definition out into per-label
//! instances, stored as `<identifier>/<label>` and folded back into a
//! `labeled_<kind>` object when a ping is assembled.
//!
//! Labels come in two flavors: a static allowlist fixed at definition
//! time, or dynamic labels validated at recording time against the label
//! pattern and a budget of 16 distinct labels. Out-of-contract labels
//! fold into `__other__`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::common::CommonMetricData;
use crate::constants::{MAX_LABELS, OTHER_LABEL};
use crate::core::Glean;
use crate::error_recording::{record_error, ErrorType};
use crate::metrics::{BooleanMetric, CounterMetric, MetricType, StringMetric};

/// Labels must look like dotted snake-case identifiers.
static LABEL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,29}(\.[a-z_][a-z0-9_-]{0,29})*$").unwrap());

const MAX_LABEL_LENGTH: usize = 71;

/// A metric type that can live inside a [`LabeledMetric`].
pub trait Labelable: MetricType + Clone {
    /// A copy of this metric with the given fixed name.
    fn with_name(&self, name: String) -> Self;

    /// A copy of this metric carrying a label to be validated at
    /// recording time.
    fn with_dynamic_label(&self, label: String) -> Self;
}

macro_rules! impl_labelable {
    ($metric:ident) => {
        impl Labelable for $metric {
            fn with_name(&self, name: String) -> Self {
                let mut meta = self.meta().clone();
                meta.name = name;
                meta.dynamic_label = None;
                Self::new(meta)
            }

            fn with_dynamic_label(&self, label: String) -> Self {
                let mut meta = self.meta().clone();
                meta.dynamic_label = Some(label);
                Self::new(meta)
            }
        }
    };
}

impl_labelable!(BooleanMetric);
impl_labelable!(CounterMetric);
impl_labelable!(StringMetric);

/// Wraps another metric type, splitting its storage by label.
#[derive(Clone, Debug)]
pub struct LabeledMetric<T> {
    submetric: T,
    labels: Option<Vec<String>>,
}

impl<T: Labelable> LabeledMetric<T> {
    /// Creates a labeled metric over the given submetric. With
    /// `Some(labels)` the set of labels is fixed; with `None` labels are
    /// dynamic and validated at recording time.
    pub fn new(submetric: T, labels: Option<Vec<String>>) -> Self {
        Self { submetric, labels }
    }

    /// The metric instance for the given label.
    pub fn get(&self, label: &str) -> T {
        match &self.labels {
            Some(allowed) => {
                let label = if allowed.iter().any(|allowed| allowed == label) {
                    label
                } else {
                    OTHER_LABEL
                };
                let name = format!("{}/{}", self.submetric.meta().name, label);
                self.submetric.with_name(name)
            }
            None => self.submetric.with_dynamic_label(label.to_string()),
        }
    }
}

/// Resolves a dynamic label into the storage identifier
/// `<base>/<label>`, enforcing the label contract.
///
/// A label already present in storage is accepted as-is; past the label
/// budget everything folds into `__other__`; a label violating the
/// pattern folds into `__other__` and records an `invalid_label` error.
pub(crate) fn dynamic_label(
    glean: &Glean,
    meta: &CommonMetricData,
    base: &str,
    label: &str,
) -> String {
    let seen = glean.metrics_db().seen_labels(meta, base);
    if seen.contains(label) {
        return format!("{base}/{label}");
    }
    if seen.len() >= MAX_LABELS {
        return format!("{base}/{OTHER_LABEL}");
    }
    if label.len() > MAX_LABEL_LENGTH || !LABEL_PATTERN.is_match(label) {
        record_error(
            glean,
            meta,
            ErrorType::InvalidLabel,
            format!("Label '{label}' is invalid"),
            None,
        );
        return format!("{base}/{OTHER_LABEL}");
    }
    format!("{base}/{label}")
}
