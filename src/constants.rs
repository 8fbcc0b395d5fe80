use uuid::Uuid;

/// The version of the SDK, reported as `telemetry_sdk_build` in every ping.
pub(crate) const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// First half of the `X-Telemetry-Agent` header; the platform name is
/// appended at request-assembly time.
pub(crate) const TELEMETRY_AGENT: &str = concat!("telemetry.rust-", env!("CARGO_PKG_VERSION"));

/// Version of the submission payload schema, the second-to-last segment of
/// the upload path.
pub(crate) const SCHEMA_VERSION: u32 = 1;

/// The client id stored while upload is disabled.
///
/// Stored so that a re-enable is distinguishable from a first run, without
/// retaining the real identifier.
pub const KNOWN_CLIENT_ID: Uuid = Uuid::nil();

/// Metric identifiers starting with this prefix never appear in ping
/// payloads. Note that `glean.error` is deliberately *not* covered: error
/// counters are part of the payload contract.
pub(crate) const RESERVED_METRIC_IDENTIFIER_PREFIX: &str = "glean.internal";

/// The ping name under which client-info metrics are recorded. Never
/// submitted; the ping assembler reads it to build the `client_info`
/// section.
pub(crate) const CLIENT_INFO_STORAGE: &str = "glean_client_info";

/// The ping name under which per-ping bookkeeping metrics (sequence
/// numbers, start times) are recorded. Never submitted.
pub(crate) const INTERNAL_STORAGE: &str = "glean_internal_info";

/// Name of the ping submitted when the user disables upload.
pub const DELETION_REQUEST_PING_NAME: &str = "deletion-request";

/// Name of the built-in events ping.
pub const EVENTS_PING_NAME: &str = "events";

/// How many events may accumulate for a single ping before that ping is
/// submitted eagerly. Overridable through the configuration.
pub(crate) const DEFAULT_MAX_EVENTS: usize = 500;

/// Longest accepted application id, after sanitization.
pub(crate) const MAX_APPLICATION_ID_LENGTH: usize = 100;

/// Longest accepted value for a string metric. Longer values are truncated
/// and an `invalid_overflow` error is recorded.
pub(crate) const MAX_STRING_LENGTH: usize = 100;

/// Maximum number of distinct dynamic labels per labeled metric. Further
/// labels fold into [`OTHER_LABEL`].
pub(crate) const MAX_LABELS: usize = 16;

/// The label a labeled metric records under once the label contract is
/// violated.
pub(crate) const OTHER_LABEL: &str = "__other__";

/// Maximum number of extra keys on an event metric.
pub(crate) const MAX_EXTRA_KEYS: usize = 10;

/// Longest accepted extra key on an event. Longer keys are truncated and
/// an `invalid_overflow` error is recorded.
pub(crate) const MAX_EXTRA_KEY_LENGTH: usize = 40;

/// Longest accepted extra value on an event. Longer values are truncated
/// and an `invalid_overflow` error is recorded.
pub(crate) const MAX_EXTRA_VALUE_LENGTH: usize = 100;
