//! The core of a client-side telemetry SDK.
//!
//! This crate collects strongly-typed measurements (metrics), groups them
//! into structured submissions (pings) and reliably uploads them to a
//! collection endpoint. It provides the pieces where the real engineering
//! lives:
//!
//! * a [`dispatcher`] serializing all mutations and buffering API calls
//!   made before initialization,
//! * a typed [`metrics`] store over pluggable key-value [`storage`],
//!   partitioned by recording lifetime,
//! * a ping assembler producing the canonical wire envelope with
//!   sequence numbers and timing information,
//! * an [`upload`] manager draining a persistent queue with retry,
//!   backoff and throttling,
//! * a [`platform`] abstraction letting the same core run on every host.
//!
//! The thin entry-point facades, generated metric definitions and
//! concrete storage/upload drivers live with the embedding platform.
//!
//! # Example
//!
//! ```no_run
//! use telemetry_core::{Configuration, Platform};
//! use telemetry_core::metrics::{BooleanMetric, PingType};
//! use telemetry_core::CommonMetricData;
//!
//! telemetry_core::initialize(Configuration::new("demo-app", true), Platform::default());
//!
//! let baseline = PingType::new("baseline", true, false, vec![]);
//! let first_open = BooleanMetric::new(CommonMetricData {
//!     name: "first_open".into(),
//!     category: "ui".into(),
//!     send_in_pings: vec!["baseline".into()],
//!     ..Default::default()
//! });
//!
//! first_open.set(true);
//! baseline.submit(None);
//! telemetry_core::shutdown();
//! ```

#![warn(missing_docs)]

mod common;
mod config;
mod constants;
mod core;
mod core_metrics;
mod database;
mod debug;
pub mod dispatcher;
mod error_recording;
pub mod histogram;
pub mod metrics;
mod ping_maker;
pub mod platform;
pub mod storage;
pub mod testing;
pub mod upload;
mod utils;

pub use crate::common::{CommonMetricData, Lifetime};
pub use crate::config::{Configuration, ConfigurationError, PingHook, DEFAULT_TELEMETRY_ENDPOINT};
pub use crate::constants::{DELETION_REQUEST_PING_NAME, EVENTS_PING_NAME, KNOWN_CLIENT_ID};
pub use crate::core::Glean;
pub use crate::database::events::RecordedEvent;
pub use crate::debug::DebugOptions;
pub use crate::error_recording::{test_get_num_recorded_errors, ErrorType};
pub use crate::platform::Platform;

use crate::core as glean_core;

/// Initializes the SDK. Further calls are no-ops.
///
/// API calls made before this point were buffered and run right after
/// the initialization task, in their original order. Returns whether
/// this call performed the initialization.
pub fn initialize(config: Configuration, platform: Platform) -> bool {
    glean_core::initialize(config, platform)
}

/// Drains the dispatcher and the upload manager. Irreversible; a no-op
/// before [`initialize`].
pub fn shutdown() {
    glean_core::shutdown()
}

/// Flips the upload-enabled state.
///
/// Disabling submits a deletion-request ping and clears the recorded
/// data, keeping only the first-run date and the sentinel client id.
/// Re-enabling re-derives the core metrics under a fresh client id.
/// A no-op before [`initialize`].
pub fn set_upload_enabled(enabled: bool) {
    if !glean_core::is_initialized() {
        log::error!("Changing upload-enabled before initialization is a no-op");
        return;
    }
    glean_core::launch_with_glean_mut(move |glean| {
        glean.set_upload_enabled(enabled);
    });
}

/// Turns envelope logging on or off. Buffered before initialization.
pub fn set_log_pings(value: bool) {
    glean_core::launch_with_glean_mut(move |glean| {
        glean.debug_mut().log_pings = value;
    });
}

/// Tags outgoing pings for the debug viewer. An invalid tag is ignored.
/// Buffered before initialization.
pub fn set_debug_view_tag(tag: &str) {
    let tag = tag.to_string();
    glean_core::launch_with_glean_mut(move |glean| {
        glean.debug_mut().set_debug_view_tag(&tag);
    });
}

/// Marks outgoing pings with source tags. An invalid set is ignored.
/// Buffered before initialization.
pub fn set_source_tags(tags: Vec<String>) {
    glean_core::launch_with_glean_mut(move |glean| {
        glean.debug_mut().set_source_tags(tags);
    });
}

/// Submits a registered ping by name.
pub fn submit_ping_by_name(ping_name: &str, reason: Option<&str>) {
    let ping_name = ping_name.to_string();
    let reason = reason.map(str::to_string);
    glean_core::launch_with_glean(move |glean| {
        glean.submit_ping_by_name(&ping_name, reason.as_deref());
    });
}
