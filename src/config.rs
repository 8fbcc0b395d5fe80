use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde_json::Value as JsonValue;
use thiserror::Error;
use url::Url;

use crate::upload::Policy;

/// The default collection endpoint, overridable through
/// [`Configuration::server_endpoint`].
pub const DEFAULT_TELEMETRY_ENDPOINT: &str = "https://incoming.telemetry.example.com";

/// A hook observing ping assembly, run after collection and before the
/// envelope is queued for upload.
pub trait PingHook: Send + Sync {
    /// May inspect or amend the assembled envelope.
    fn after_ping_collection(&self, ping_name: &str, payload: &mut JsonValue);
}

/// Errors found while validating a [`Configuration`].
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The application id was empty, or empty after sanitization.
    #[error("the application id must contain at least one alphanumeric character")]
    InvalidApplicationId,
    /// The server endpoint did not parse as an http(s) URL.
    #[error("invalid server endpoint `{0}`")]
    InvalidServerEndpoint(String),
}

/// Settings for [`initialize`](crate::initialize).
#[derive(Clone)]
pub struct Configuration {
    /// Identifies the application; sanitized into the submission path.
    pub application_id: String,
    /// The initial upload-enabled state.
    pub upload_enabled: bool,
    /// Base URL for submissions.
    pub server_endpoint: String,
    /// The release channel, reported as `app_channel` when set.
    pub channel: Option<String>,
    /// The application's build identifier.
    pub app_build: Option<String>,
    /// The application's user-visible version.
    pub app_display_version: Option<String>,
    /// When this build was produced.
    pub build_date: Option<DateTime<FixedOffset>>,
    /// Event-list size that triggers an eager events-ping submission.
    pub max_events: Option<usize>,
    /// Print each outgoing envelope before submission.
    pub log_pings: bool,
    /// Tags outgoing pings for the debug viewer via `X-Debug-ID`.
    /// Validated; an invalid tag is ignored.
    pub debug_view_tag: Option<String>,
    /// Marks outgoing pings via `X-Source-Tags`. Validated; invalid tags
    /// are ignored.
    pub source_tags: Option<Vec<String>>,
    /// Recognized for configuration round-tripping; the automatic
    /// page-load event source lives with the embedding platform.
    pub enable_auto_page_load_events: bool,
    /// Recognized for configuration round-tripping; the automatic click
    /// event source lives with the embedding platform.
    pub enable_auto_element_click_events: bool,
    /// Hooks observing ping assembly.
    pub plugins: Vec<Arc<dyn PingHook>>,
    /// Retry, backoff and throttling knobs of the upload manager.
    pub upload_policy: Policy,
}

impl Configuration {
    /// A configuration with the defaults for everything but identity and
    /// consent.
    pub fn new(application_id: impl Into<String>, upload_enabled: bool) -> Self {
        Self {
            application_id: application_id.into(),
            upload_enabled,
            server_endpoint: DEFAULT_TELEMETRY_ENDPOINT.into(),
            channel: None,
            app_build: None,
            app_display_version: None,
            build_date: None,
            max_events: None,
            log_pings: false,
            debug_view_tag: None,
            source_tags: None,
            enable_auto_page_load_events: false,
            enable_auto_element_click_events: false,
            plugins: Vec::new(),
            upload_policy: Policy::default(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        if crate::utils::sanitize_application_id(&self.application_id).is_empty() {
            return Err(ConfigurationError::InvalidApplicationId);
        }
        let url = Url::parse(&self.server_endpoint)
            .map_err(|_| ConfigurationError::InvalidServerEndpoint(self.server_endpoint.clone()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigurationError::InvalidServerEndpoint(
                self.server_endpoint.clone(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("application_id", &self.application_id)
            .field("upload_enabled", &self.upload_enabled)
            .field("server_endpoint", &self.server_endpoint)
            .field("channel", &self.channel)
            .field("app_build", &self.app_build)
            .field("app_display_version", &self.app_display_version)
            .field("build_date", &self.build_date)
            .field("max_events", &self.max_events)
            .field("log_pings", &self.log_pings)
            .field("debug_view_tag", &self.debug_view_tag)
            .field("source_tags", &self.source_tags)
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_validated() {
        let mut config = Configuration::new("demo-app", true);
        assert!(config.validate().is_ok());

        config.server_endpoint = "http://localhost:8080".into();
        assert!(config.validate().is_ok());

        config.server_endpoint = "ftp://example.com".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidServerEndpoint(_))
        ));

        config.server_endpoint = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn application_ids_must_survive_sanitization() {
        let config = Configuration::new("///", true);
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidApplicationId)
        ));
    }
}
