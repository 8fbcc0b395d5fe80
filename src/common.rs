use crate::constants::RESERVED_METRIC_IDENTIFIER_PREFIX;
use crate::core::Glean;
use crate::metrics::labeled;

/// Whether a storage identifier belongs to the SDK's internal metrics.
/// Reserved identifiers never appear in external ping payloads.
pub(crate) fn is_reserved_identifier(identifier: &str) -> bool {
    identifier.starts_with(RESERVED_METRIC_IDENTIFIER_PREFIX)
}

/// The recording lifetime of a metric: how long its recorded value is kept
/// around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Cleared when the owning ping is submitted.
    Ping,
    /// Persisted indefinitely; cleared only on explicit reset or when
    /// upload is disabled.
    User,
    /// Cleared at process restart.
    Application,
}

impl Default for Lifetime {
    fn default() -> Self {
        Lifetime::Ping
    }
}

/// The data shared by every metric: identity, destination pings, lifetime
/// and the disabled bit.
#[derive(Clone, Debug, Default)]
pub struct CommonMetricData {
    /// The metric's name.
    pub name: String,
    /// The metric's category. May be empty.
    pub category: String,
    /// The pings this metric is recorded into.
    pub send_in_pings: Vec<String>,
    /// How long recorded values are kept.
    pub lifetime: Lifetime,
    /// A disabled metric is inert: it never records, never validates and
    /// never produces errors.
    pub disabled: bool,
    /// The label, for an instance obtained from a labeled metric.
    pub dynamic_label: Option<String>,
}

impl CommonMetricData {
    /// The identifier without any label: `category.name`, or just `name`
    /// when the category is empty.
    pub fn base_identifier(&self) -> String {
        if self.category.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.category, self.name)
        }
    }

    /// The storage identifier, resolving the dynamic label against the
    /// label contract. Resolution may record an `invalid_label` error and
    /// fold the value into the overflow label.
    pub fn identifier(&self, glean: &Glean) -> String {
        let base = self.base_identifier();
        match &self.dynamic_label {
            Some(label) => labeled::dynamic_label(glean, self, &base, label),
            None => base,
        }
    }

    /// Whether a recording on this metric should proceed.
    pub fn should_record(&self, glean: &Glean) -> bool {
        !self.disabled && glean.is_upload_enabled()
    }

    /// Whether this metric is internal to the SDK and hidden from
    /// payloads.
    pub fn is_reserved(&self) -> bool {
        is_reserved_identifier(&self.base_identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_identifier_elides_an_empty_category() {
        let meta = CommonMetricData {
            name: "first_open".into(),
            category: "ui".into(),
            ..Default::default()
        };
        assert_eq!("ui.first_open", meta.base_identifier());

        let meta = CommonMetricData {
            name: "client_id".into(),
            ..Default::default()
        };
        assert_eq!("client_id", meta.base_identifier());
    }
}
