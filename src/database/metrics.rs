use std::collections::HashSet;
use std::sync::Mutex;

use serde_json::{json, Map, Value as JsonValue};

use crate::common::{is_reserved_identifier, CommonMetricData, Lifetime};
use crate::core::Glean;
use crate::metrics::Metric;
use crate::storage::Store;

/// The lifetime-partitioned metrics store.
///
/// Three sub-stores, one per [`Lifetime`], each holding
/// `<ping> / <kind> / <identifier> → value`. All writes go through
/// dispatcher-serialized code; the inner locks only guard against the
/// upload worker's reads.
pub struct MetricsDatabase {
    user: Mutex<Box<dyn Store>>,
    ping: Mutex<Box<dyn Store>>,
    app: Mutex<Box<dyn Store>>,
}

impl MetricsDatabase {
    /// Creates the database over the three lifetime sub-stores.
    pub fn new(
        user: Box<dyn Store>,
        ping: Box<dyn Store>,
        app: Box<dyn Store>,
    ) -> Self {
        Self {
            user: Mutex::new(user),
            ping: Mutex::new(ping),
            app: Mutex::new(app),
        }
    }

    fn store(&self, lifetime: Lifetime) -> &Mutex<Box<dyn Store>> {
        match lifetime {
            Lifetime::User => &self.user,
            Lifetime::Ping => &self.ping,
            Lifetime::Application => &self.app,
        }
    }

    /// Overwrites the metric's value in every destination ping. Skipped
    /// for disabled metrics.
    pub fn record(&self, glean: &Glean, meta: &CommonMetricData, value: &Metric) {
        if meta.disabled {
            return;
        }
        let identifier = meta.identifier(glean);
        let kind = value.ping_section();
        let stored = value.as_json();
        let mut store = self.store(meta.lifetime).lock().unwrap();
        for ping in &meta.send_in_pings {
            let result = store.update(&[ping.as_str(), kind, identifier.as_str()], &mut |_| {
                stored.clone()
            });
            if let Err(err) = result {
                log::error!(
                    "Failed to record metric {identifier} into {}: {err}",
                    store.name()
                );
            }
        }
    }

    /// Applies `transform` to the metric's current value in every
    /// destination ping. Skipped for disabled metrics.
    ///
    /// The transform sees `None` when nothing is stored yet or the stored
    /// value does not decode for `kind`.
    pub fn transform(
        &self,
        glean: &Glean,
        meta: &CommonMetricData,
        kind: &'static str,
        transform: &mut dyn FnMut(Option<Metric>) -> Metric,
    ) {
        if meta.disabled {
            return;
        }
        let identifier = meta.identifier(glean);
        let mut store = self.store(meta.lifetime).lock().unwrap();
        for ping in &meta.send_in_pings {
            let result = store.update(&[ping.as_str(), kind, identifier.as_str()], &mut |old| {
                let decoded = old.and_then(|value| Metric::from_json(kind, value));
                transform(decoded).as_json()
            });
            if let Err(err) = result {
                log::error!(
                    "Failed to transform metric {identifier} in {}: {err}",
                    store.name()
                );
            }
        }
    }

    /// Reads a stored metric back. A stored value that fails the kind's
    /// validation is deleted and `None` returned, so out-of-band storage
    /// corruption stays contained.
    pub fn get_metric(
        &self,
        lifetime: Lifetime,
        ping: &str,
        kind: &str,
        identifier: &str,
    ) -> Option<Metric> {
        let mut store = self.store(lifetime).lock().unwrap();
        let stored = store.get(&[ping, kind, identifier])?;
        match Metric::from_json(kind, &stored) {
            Some(metric) => Some(metric),
            None => {
                log::warn!(
                    "Stored value for {identifier} in ping {ping} is not a valid {kind}, deleting"
                );
                let _ = store.delete(&[ping, kind, identifier]);
                None
            }
        }
    }

    /// The labels already recorded for the labeled metric with the given
    /// base identifier, looked up in its first destination ping.
    pub fn seen_labels(&self, meta: &CommonMetricData, base: &str) -> HashSet<String> {
        let mut labels = HashSet::new();
        let ping = match meta.send_in_pings.first() {
            Some(ping) => ping,
            None => return labels,
        };
        let prefix = format!("{base}/");
        let store = self.store(meta.lifetime).lock().unwrap();
        if let Some(JsonValue::Object(sections)) = store.get(&[ping.as_str()]) {
            for ids in sections.values() {
                if let JsonValue::Object(ids) = ids {
                    for identifier in ids.keys() {
                        if let Some(label) = identifier.strip_prefix(&prefix) {
                            labels.insert(label.to_string());
                        }
                    }
                }
            }
        }
        labels
    }

    /// Collects every metric recorded for `ping` across the three
    /// lifetimes, as the `metrics` section of a ping payload:
    /// reserved identifiers are skipped, `<id>/<label>` entries unfold
    /// into `labeled_<kind>` objects and values are payload projections.
    ///
    /// With `clear_ping_lifetime`, the ping-lifetime data for `ping` is
    /// erased in the same pass.
    pub fn get_ping_metrics(&self, ping: &str, clear_ping_lifetime: bool) -> Option<JsonValue> {
        let mut result: Map<String, JsonValue> = Map::new();

        for lifetime in [Lifetime::User, Lifetime::Ping, Lifetime::Application] {
            let mut store = self.store(lifetime).lock().unwrap();
            if let Some(JsonValue::Object(sections)) = store.get(&[ping]) {
                for (kind, ids) in sections {
                    let ids = match ids {
                        JsonValue::Object(ids) => ids,
                        _ => {
                            log::warn!("Malformed section {kind} for ping {ping}, deleting");
                            let _ = store.delete(&[ping, kind.as_str()]);
                            continue;
                        }
                    };
                    for (identifier, value) in ids {
                        if is_reserved_identifier(&identifier) {
                            continue;
                        }
                        let metric = match Metric::from_json(&kind, &value) {
                            Some(metric) => metric,
                            None => {
                                log::warn!(
                                    "Stored value for {identifier} in ping {ping} is not a valid {kind}, deleting"
                                );
                                let _ = store.delete(&[ping, kind.as_str(), identifier.as_str()]);
                                continue;
                            }
                        };
                        let payload = metric.payload();
                        match identifier.split_once('/') {
                            Some((base, label)) => {
                                let section = result
                                    .entry(format!("labeled_{kind}"))
                                    .or_insert_with(|| json!({}));
                                if let Some(section) = section.as_object_mut() {
                                    let entry = section
                                        .entry(base.to_string())
                                        .or_insert_with(|| json!({}));
                                    if let Some(entry) = entry.as_object_mut() {
                                        entry.insert(label.to_string(), payload);
                                    }
                                }
                            }
                            None => {
                                let section =
                                    result.entry(kind.clone()).or_insert_with(|| json!({}));
                                if let Some(section) = section.as_object_mut() {
                                    section.insert(identifier, payload);
                                }
                            }
                        }
                    }
                }
            }
            if clear_ping_lifetime && lifetime == Lifetime::Ping {
                let _ = store.delete(&[ping]);
            }
        }

        if result.is_empty() {
            None
        } else {
            Some(JsonValue::Object(result))
        }
    }

    /// Erases one lifetime's data, for one ping or entirely.
    pub fn clear(&self, lifetime: Lifetime, ping: Option<&str>) {
        let mut store = self.store(lifetime).lock().unwrap();
        let result = match ping {
            Some(ping) => store.delete(&[ping]),
            None => store.delete(&[]),
        };
        if let Err(err) = result {
            log::error!("Failed to clear {}: {err}", store.name());
        }
    }

    /// Erases all three lifetimes.
    pub fn clear_all(&self) {
        for lifetime in [Lifetime::User, Lifetime::Ping, Lifetime::Application] {
            self.clear(lifetime, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::new_glean;

    fn meta(name: &str, lifetime: Lifetime) -> CommonMetricData {
        CommonMetricData {
            name: name.into(),
            category: "test".into(),
            send_in_pings: vec!["store1".into(), "store2".into()],
            lifetime,
            disabled: false,
            dynamic_label: None,
        }
    }

    #[test]
    fn recorded_values_land_in_every_destination_ping() {
        let glean = new_glean(true);
        let db = glean.metrics_db();
        db.record(&glean, &meta("flag", Lifetime::Ping), &Metric::Boolean(true));

        for ping in ["store1", "store2"] {
            assert_eq!(
                Some(Metric::Boolean(true)),
                db.get_metric(Lifetime::Ping, ping, "boolean", "test.flag")
            );
        }
        // Nothing leaked into the other lifetimes.
        assert_eq!(
            None,
            db.get_metric(Lifetime::User, "store1", "boolean", "test.flag")
        );
    }

    #[test]
    fn disabled_metrics_do_not_touch_storage() {
        let glean = new_glean(true);
        let db = glean.metrics_db();
        let mut disabled = meta("flag", Lifetime::Ping);
        disabled.disabled = true;
        db.record(&glean, &disabled, &Metric::Boolean(true));
        assert_eq!(
            None,
            db.get_metric(Lifetime::Ping, "store1", "boolean", "test.flag")
        );
    }

    #[test]
    fn transform_sees_the_decoded_previous_value() {
        let glean = new_glean(true);
        let db = glean.metrics_db();
        let meta = meta("count", Lifetime::Ping);
        for _ in 0..3 {
            db.transform(&glean, &meta, "counter", &mut |old| match old {
                Some(Metric::Counter(count)) => Metric::Counter(count + 2),
                _ => Metric::Counter(2),
            });
        }
        assert_eq!(
            Some(Metric::Counter(6)),
            db.get_metric(Lifetime::Ping, "store1", "counter", "test.count")
        );
    }

    #[test]
    fn schema_invalid_values_are_deleted_on_read() {
        let glean = new_glean(true);
        let db = glean.metrics_db();
        // Wedge a counter into a boolean slot.
        db.transform(&glean, &meta("flag", Lifetime::User), "boolean", &mut |_| {
            Metric::Counter(42)
        });
        assert_eq!(
            None,
            db.get_metric(Lifetime::User, "store1", "boolean", "test.flag")
        );
        // The offending value is gone, not just skipped.
        let snapshot = db.get_ping_metrics("store1", false);
        assert!(snapshot.is_none());
    }

    #[test]
    fn ping_collection_merges_lifetimes_and_skips_reserved_identifiers() {
        let glean = new_glean(true);
        let db = glean.metrics_db();
        db.record(&glean, &meta("flag", Lifetime::Ping), &Metric::Boolean(true));
        db.record(&glean, &meta("count", Lifetime::User), &Metric::Counter(4));
        db.record(
            &glean,
            &CommonMetricData {
                name: "store1#sequence".into(),
                category: "glean.internal.metrics".into(),
                send_in_pings: vec!["store1".into()],
                lifetime: Lifetime::User,
                ..Default::default()
            },
            &Metric::Counter(7),
        );

        let snapshot = db.get_ping_metrics("store1", true).unwrap();
        assert_eq!(
            serde_json::json!({
                "boolean": {"test.flag": true},
                "counter": {"test.count": 4},
            }),
            snapshot
        );

        // Ping-lifetime data was cleared by the collection, user data
        // survives.
        assert_eq!(
            None,
            db.get_metric(Lifetime::Ping, "store1", "boolean", "test.flag")
        );
        assert_eq!(
            Some(Metric::Counter(4)),
            db.get_metric(Lifetime::User, "store1", "counter", "test.count")
        );
    }

    #[test]
    fn labeled_entries_unfold_on_collection() {
        let glean = new_glean(true);
        let db = glean.metrics_db();
        for (label, value) in [("net", 1), ("fs", 2)] {
            db.record(
                &glean,
                &CommonMetricData {
                    name: format!("errors/{label}"),
                    category: "".into(),
                    send_in_pings: vec!["store1".into()],
                    lifetime: Lifetime::Ping,
                    ..Default::default()
                },
                &Metric::Counter(value),
            );
        }

        let snapshot = db.get_ping_metrics("store1", false).unwrap();
        assert_eq!(
            serde_json::json!({"labeled_counter": {"errors": {"net": 1, "fs": 2}}}),
            snapshot
        );
    }

    #[test]
    fn seen_labels_are_collected_across_sections() {
        let glean = new_glean(true);
        let db = glean.metrics_db();
        let meta = meta("errors", Lifetime::Ping);
        for label in ["net", "fs"] {
            db.record(
                &glean,
                &CommonMetricData {
                    name: format!("errors/{label}"),
                    ..meta.clone()
                },
                &Metric::Counter(1),
            );
        }
        let seen = db.seen_labels(&meta, "test.errors");
        assert_eq!(2, seen.len());
        assert!(seen.contains("net") && seen.contains("fs"));
    }
}
