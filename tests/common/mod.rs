use std::sync::Arc;

use telemetry_core::testing::{self, TestUploader};
use telemetry_core::{Configuration, Platform};

pub const SERVER: &str = "https://telemetry.example.com";

/// A configuration pointing at the fake server.
pub fn config(application_id: &str, upload_enabled: bool) -> Configuration {
    let mut config = Configuration::new(application_id, upload_enabled);
    config.server_endpoint = SERVER.into();
    config
}

/// Resets the SDK onto a fresh in-memory platform capturing uploads.
/// Callers must hold [`testing::test_lock`].
pub fn setup(config: Configuration) -> Arc<TestUploader> {
    let uploader = TestUploader::new();
    testing::reset_and_initialize(config, Platform::with_uploader(uploader.clone()));
    uploader
}
