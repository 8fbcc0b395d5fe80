//! Recording invariants and boundaries: disabled metrics, pre-init
//! buffering, validation errors, debug headers, event ordering across
//! restarts.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value as JsonValue};

use telemetry_core::metrics::{CounterMetric, EventMetric, PingType, QuantityMetric, StringMetric, UuidMetric};
use telemetry_core::storage::{MemoryStore, Store, StorageError};
use telemetry_core::testing::{self, TestUploader};
use telemetry_core::{CommonMetricData, ErrorType, Platform, KNOWN_CLIENT_ID};

const TIMEOUT: Duration = Duration::from_secs(5);

fn counter(name: &str, ping: &str) -> CounterMetric {
    CounterMetric::new(CommonMetricData {
        name: name.into(),
        category: "test".into(),
        send_in_pings: vec![ping.into()],
        ..Default::default()
    })
}

#[test]
fn disabled_metrics_are_inert() {
    let _lock = testing::test_lock();
    common::setup(common::config("demo-app", true));

    let metric = CounterMetric::new(CommonMetricData {
        name: "disabled".into(),
        category: "test".into(),
        send_in_pings: vec!["baseline".into()],
        disabled: true,
        ..Default::default()
    });
    metric.add(1);
    metric.add(-1);

    assert_eq!(None, metric.test_get_value(None));
    // Disabled means disabled: not even errors are produced.
    assert_eq!(
        0,
        testing::test_get_num_recorded_errors(&metric, ErrorType::InvalidValue, None)
    );
}

#[test]
fn pre_init_api_calls_are_buffered_and_applied_in_order() {
    let _lock = testing::test_lock();
    testing::destroy();

    let metric = counter("buffered", "baseline");
    metric.add(2);
    metric.add(3);

    let uploader = TestUploader::new();
    telemetry_core::initialize(
        common::config("demo-app", true),
        Platform::with_uploader(uploader),
    );

    assert_eq!(Some(5), metric.test_get_value(None));
}

#[test]
fn first_run_with_upload_disabled_stays_silent() {
    let _lock = testing::test_lock();
    let uploader = common::setup(common::config("demo-app", false));

    let metric = counter("clicks", "baseline");
    metric.add(1);
    assert_eq!(None, metric.test_get_value(None));

    PingType::new("baseline", true, false, vec![]).submit(None);
    std::thread::sleep(Duration::from_millis(100));

    // No deletion-request, no data, just the parked sentinel.
    assert!(uploader.captured().is_empty());
    assert_eq!(0, testing::pending_ping_count());
    assert_eq!(Some(KNOWN_CLIENT_ID), testing::current_client_id());
}

#[test]
fn invalid_values_are_counted_per_metric_and_reason() {
    let _lock = testing::test_lock();
    let uploader = common::setup(common::config("demo-app", true));

    let session_id = UuidMetric::new(CommonMetricData {
        name: "session_id".into(),
        category: "boot".into(),
        send_in_pings: vec!["baseline".into()],
        ..Default::default()
    });
    session_id.set("not-a-uuid");
    session_id.set("also wrong");
    assert_eq!(None, session_id.test_get_value(None));
    assert_eq!(
        2,
        testing::test_get_num_recorded_errors(&session_id, ErrorType::InvalidValue, None)
    );

    let clicks = counter("clicks", "baseline");
    clicks.add(-4);
    assert_eq!(None, clicks.test_get_value(None));
    assert_eq!(
        1,
        testing::test_get_num_recorded_errors(&clicks, ErrorType::InvalidValue, None)
    );

    let long_value = "x".repeat(150);
    let label = StringMetric::new(CommonMetricData {
        name: "label".into(),
        category: "test".into(),
        send_in_pings: vec!["baseline".into()],
        ..Default::default()
    });
    label.set(long_value);
    assert_eq!(100, label.test_get_value(None).unwrap().len());
    assert_eq!(
        1,
        testing::test_get_num_recorded_errors(&label, ErrorType::InvalidOverflow, None)
    );

    // Error counters travel in the pings the metric was bound to.
    PingType::new("baseline", true, false, vec![]).submit(None);
    let pings = uploader.wait_for_pings(1, TIMEOUT);
    let errors = &pings[0].payload["metrics"]["labeled_counter"];
    assert_eq!(json!(2), errors["glean.error.invalid_value"]["boot.session_id"]);
    assert_eq!(json!(1), errors["glean.error.invalid_value"]["test.clicks"]);
    assert_eq!(json!(1), errors["glean.error.invalid_overflow"]["test.label"]);
}

#[test]
fn counters_saturate_and_quantities_reject_negatives() {
    let _lock = testing::test_lock();
    common::setup(common::config("demo-app", true));

    let big = counter("big", "baseline");
    big.add(i32::MAX);
    big.add(100);
    assert_eq!(Some(i32::MAX), big.test_get_value(None));

    let width = QuantityMetric::new(CommonMetricData {
        name: "width".into(),
        category: "display".into(),
        send_in_pings: vec!["baseline".into()],
        ..Default::default()
    });
    width.set(-1);
    assert_eq!(None, width.test_get_value(None));
    assert_eq!(
        1,
        testing::test_get_num_recorded_errors(&width, ErrorType::InvalidValue, None)
    );
    width.set(1920);
    assert_eq!(Some(1920), width.test_get_value(None));
}

#[test]
fn debug_options_shape_the_headers() {
    let _lock = testing::test_lock();
    let mut config = common::config("demo-app", true);
    config.debug_view_tag = Some("test-tag".into());
    config.source_tags = Some(vec!["automation".into(), "perf".into()]);
    let uploader = common::setup(config);

    counter("clicks", "baseline").add(1);
    PingType::new("baseline", true, false, vec![]).submit(None);

    let pings = uploader.wait_for_pings(1, TIMEOUT);
    let headers = &pings[0].headers;
    assert!(headers.contains(&("X-Debug-ID".into(), "test-tag".into())));
    assert!(headers.contains(&("X-Source-Tags".into(), "automation,perf".into())));
}

#[test]
fn empty_submissions_are_dropped() {
    let _lock = testing::test_lock();
    let uploader = common::setup(common::config("demo-app", true));

    PingType::new("baseline", true, false, vec![]).submit(None);
    std::thread::sleep(Duration::from_millis(100));

    assert!(uploader.captured().is_empty());
    assert_eq!(0, testing::pending_ping_count());
}

#[test]
fn event_extras_are_validated_and_truncated() {
    let _lock = testing::test_lock();
    common::setup(common::config("demo-app", true));

    let long_key = "k".repeat(41);
    let event = EventMetric::new(
        CommonMetricData {
            name: "search".into(),
            category: "ui".into(),
            send_in_pings: vec!["events".into()],
            ..Default::default()
        },
        vec!["engine".into(), long_key.clone()],
    );

    event.record(HashMap::from([
        ("engine".into(), "e".repeat(150)),
        ("unknown".into(), "nope".into()),
        (long_key, "v".into()),
    ]));

    let recorded = event.test_get_value(None).unwrap();
    let extra = recorded[0].extra.as_ref().unwrap();
    assert_eq!(2, extra.len());
    // The oversized value and key were truncated, not dropped.
    assert_eq!(100, extra["engine"].len());
    assert_eq!("v", extra[&"k".repeat(40)]);
    assert!(!extra.contains_key("unknown"));

    assert_eq!(
        1,
        testing::test_get_num_recorded_errors(&event, ErrorType::InvalidValue, None)
    );
    assert_eq!(
        2,
        testing::test_get_num_recorded_errors(&event, ErrorType::InvalidOverflow, None)
    );
}

#[test]
fn overfull_event_lists_submit_eagerly() {
    let _lock = testing::test_lock();
    let mut config = common::config("demo-app", true);
    config.max_events = Some(3);
    let uploader = common::setup(config);

    let event = EventMetric::new(
        CommonMetricData {
            name: "click".into(),
            category: "ui".into(),
            send_in_pings: vec!["events".into()],
            ..Default::default()
        },
        vec![],
    );
    for _ in 0..4 {
        event.record(HashMap::new());
    }

    let pings = uploader.wait_for_pings(1, TIMEOUT);
    let payload = &pings[0].payload;
    assert_eq!(json!("max_capacity"), payload["ping_info"]["reason"]);
    assert_eq!(4, payload["events"].as_array().unwrap().len());
}

/// A store whose backing memory survives re-initialization, like a real
/// persistent driver.
struct SharedStore {
    name: String,
    inner: Arc<Mutex<MemoryStore>>,
}

impl Store for SharedStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, index: &[&str]) -> Option<JsonValue> {
        self.inner.lock().unwrap().get(index)
    }

    fn update(
        &mut self,
        index: &[&str],
        transform: &mut dyn FnMut(Option<&JsonValue>) -> JsonValue,
    ) -> Result<(), StorageError> {
        self.inner.lock().unwrap().update(index, transform)
    }

    fn delete(&mut self, index: &[&str]) -> Result<(), StorageError> {
        self.inner.lock().unwrap().delete(index)
    }
}

fn shared_platform(
    stores: &Arc<Mutex<HashMap<String, Arc<Mutex<MemoryStore>>>>>,
    uploader: Arc<TestUploader>,
) -> Platform {
    let stores = stores.clone();
    Platform {
        storage: Box::new(move |name| {
            let store = stores
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(MemoryStore::new(name))))
                .clone();
            Box::new(SharedStore {
                name: name.to_string(),
                inner: store,
            }) as Box<dyn Store>
        }),
        ..Platform::with_uploader(uploader)
    }
}

#[test]
fn restart_markers_keep_event_sequences_ordered() {
    let _lock = testing::test_lock();
    let stores = Arc::new(Mutex::new(HashMap::new()));

    let event = EventMetric::new(
        CommonMetricData {
            name: "click".into(),
            category: "ui".into(),
            send_in_pings: vec!["events".into()],
            ..Default::default()
        },
        vec![],
    );

    // First lifetime: one event, never submitted.
    let uploader = TestUploader::new();
    testing::reset_and_initialize(
        common::config("demo-app", true),
        shared_platform(&stores, uploader),
    );
    event.record(HashMap::new());
    assert_eq!(1, event.test_get_value(None).unwrap().len());

    // Second lifetime over the same storage: a restart marker separates
    // the sequences.
    let uploader = TestUploader::new();
    testing::reset_and_initialize(
        common::config("demo-app", true),
        shared_platform(&stores, uploader.clone()),
    );
    event.record(HashMap::new());
    telemetry_core::submit_ping_by_name("events", None);

    let pings = uploader.wait_for_pings(1, TIMEOUT);
    let events = pings[0].payload["events"].as_array().unwrap().clone();
    assert_eq!(3, events.len());

    assert_eq!(json!("ui"), events[0]["category"]);
    assert_eq!(json!("glean.internal"), events[1]["category"]);
    assert_eq!(json!("restarted"), events[1]["name"]);
    assert_eq!(json!("ui"), events[2]["category"]);

    // Monotonic, rebased to the first event.
    let timestamps: Vec<i64> = events
        .iter()
        .map(|event| event["timestamp"].as_i64().unwrap())
        .collect();
    assert_eq!(0, timestamps[0]);
    assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));
}
