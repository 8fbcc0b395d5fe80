//! This provides functionality for building tests.
//!
//! Scenario tests drive the global API; [`test_lock`] serializes them,
//! [`reset_and_initialize`] gives each one a fresh core and
//! [`TestUploader`] captures outgoing requests instead of sending them.
//! Unit tests that don't need the global machinery can work against a
//! standalone core from [`new_glean`].

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::config::Configuration;
use crate::core::{self, Glean};
use crate::error_recording::{self, ErrorType};
use crate::metrics::MetricType;
use crate::platform::{PingUploader, Platform};
use crate::upload::UploadResult;

static TEST_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serializes tests that drive the global API. Hold the returned guard
/// for the duration of the test.
pub fn test_lock() -> MutexGuard<'static, ()> {
    TEST_GUARD
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Destroys the global instance, leaving a fresh uninitialized
/// dispatcher behind. API calls made afterwards buffer until the next
/// [`initialize`](crate::initialize).
pub fn destroy() {
    core::destroy_for_testing();
}

/// Destroys any previous global instance and initializes a fresh one,
/// blocking until the initialization task settled.
pub fn reset_and_initialize(config: Configuration, platform: Platform) {
    destroy();
    crate::initialize(config, platform);
    core::block_on_dispatcher();
}

/// A standalone, fully initialized core over in-memory storage, for unit
/// tests that bypass the global API.
pub fn new_glean(upload_enabled: bool) -> Glean {
    let config = Configuration::new("test-app", upload_enabled);
    let mut glean = Glean::new(config, Platform::default()).unwrap();
    glean.apply_initialization();
    glean
}

/// One request captured by the [`TestUploader`].
#[derive(Clone, Debug)]
pub struct CapturedPing {
    /// The full submission URL.
    pub url: String,
    /// The parsed envelope.
    pub payload: JsonValue,
    /// The headers handed to the uploader.
    pub headers: Vec<(String, String)>,
}

impl CapturedPing {
    /// The ping name, parsed from the submission path.
    pub fn ping_name(&self) -> Option<&str> {
        // /submit/<app>/<ping>/<version>/<doc>
        self.url.split('/').rev().nth(2)
    }
}

#[derive(Default)]
struct TestUploaderInner {
    captured: Vec<CapturedPing>,
    scripted: VecDeque<UploadResult>,
}

/// Collects requests instead of sending them.
///
/// Results can be scripted per attempt; unscripted attempts report
/// [`UploadResult::Success`].
#[derive(Default)]
pub struct TestUploader {
    inner: Mutex<TestUploaderInner>,
    cond: Condvar,
}

impl TestUploader {
    /// Creates a new test uploader, ready to hand to
    /// [`Platform::with_uploader`].
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues the result for the next unconsumed upload attempt.
    pub fn script_result(&self, result: UploadResult) {
        self.inner.lock().unwrap().scripted.push_back(result);
    }

    /// The requests captured so far.
    pub fn captured(&self) -> Vec<CapturedPing> {
        self.inner.lock().unwrap().captured.clone()
    }

    /// Waits until at least `count` requests were captured, or panics on
    /// timeout. Returns the captured requests.
    pub fn wait_for_pings(&self, count: usize, timeout: Duration) -> Vec<CapturedPing> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        while inner.captured.len() < count {
            let now = Instant::now();
            if now >= deadline {
                panic!(
                    "timed out waiting for {count} pings, got {}",
                    inner.captured.len()
                );
            }
            let (next, _) = self.cond.wait_timeout(inner, deadline - now).unwrap();
            inner = next;
        }
        inner.captured.clone()
    }
}

impl PingUploader for TestUploader {
    fn post(&self, url: &str, body: &[u8], headers: &[(String, String)]) -> UploadResult {
        let payload = serde_json::from_slice(body).unwrap_or(JsonValue::Null);
        let mut inner = self.inner.lock().unwrap();
        inner.captured.push(CapturedPing {
            url: url.to_string(),
            payload,
            headers: headers.to_vec(),
        });
        let result = inner.scripted.pop_front().unwrap_or(UploadResult::Success);
        drop(inner);
        self.cond.notify_all();
        result
    }
}

/// How many assembled pings sit in the pending store. Blocks on the
/// dispatcher.
pub fn pending_ping_count() -> usize {
    core::block_on_dispatcher();
    core::with_glean(|glean| glean.pings_db().lock().unwrap().pending_pings().len()).unwrap_or(0)
}

/// The stored client id, if any. Blocks on the dispatcher.
pub fn current_client_id() -> Option<Uuid> {
    core::block_on_dispatcher();
    core::with_glean(|glean| glean.core_metrics().client_id.get_value(glean, None)).flatten()
}

/// The number of errors of the given type recorded against `metric`.
/// Blocks on the dispatcher.
pub fn test_get_num_recorded_errors(
    metric: &impl MetricType,
    error: ErrorType,
    ping: Option<&str>,
) -> i32 {
    core::block_on_dispatcher();
    core::with_glean(|glean| {
        error_recording::test_get_num_recorded_errors(glean, metric.meta(), error, ping)
    })
    .unwrap_or(0)
}
