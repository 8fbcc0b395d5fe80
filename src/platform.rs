//! The platform abstraction.
//!
//! Everything host-specific is bundled in [`Platform`]: a factory for
//! named stores, the HTTP uploader, static platform information and the
//! monotonic timer. The core runs identically on every host that
//! satisfies these contracts.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use once_cell::sync::Lazy;

use crate::storage::{MemoryStore, Store};
use crate::upload::UploadResult;

/// Builds the store for a given root key. Each database gets its own
/// instance.
pub type StoreFactory = Box<dyn Fn(&str) -> Box<dyn Store> + Send + Sync>;

/// The HTTP uploader contract.
///
/// Implementations perform one POST and map the outcome onto
/// [`UploadResult`]; they must not retry on their own. Called from the
/// upload worker thread only, one request at a time.
pub trait PingUploader: Send + Sync {
    /// Posts `body` to `url` with the given headers.
    fn post(&self, url: &str, body: &[u8], headers: &[(String, String)]) -> UploadResult;
}

/// Static information about the host.
pub trait PlatformInfo: Send + Sync {
    /// The platform's name, reported in `X-Telemetry-Agent`.
    fn name(&self) -> &'static str;
    /// The operating system.
    fn os(&self) -> String;
    /// The operating system version, or `"unknown"`.
    fn os_version(&self) -> String;
    /// The CPU architecture.
    fn architecture(&self) -> String;
    /// The host locale, or `"und"`.
    fn locale(&self) -> String;
}

/// A monotonic clock. Event and timing measurements are taken on this
/// clock so recorded sequences survive wall-clock adjustments.
pub trait Timer: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin.
    fn now_ns(&self) -> u64;
}

/// The bundle of host services handed to [`initialize`](crate::initialize).
pub struct Platform {
    /// Builds one store per root key.
    pub storage: StoreFactory,
    /// Uploads assembled pings.
    pub uploader: Arc<dyn PingUploader>,
    /// Static host information.
    pub info: Box<dyn PlatformInfo>,
    /// The monotonic clock.
    pub timer: Arc<dyn Timer>,
}

impl Platform {
    /// A platform over in-memory storage and the host defaults, with the
    /// given uploader.
    pub fn with_uploader(uploader: Arc<dyn PingUploader>) -> Self {
        Self {
            storage: Box::new(|name| Box::new(MemoryStore::new(name)) as Box<dyn Store>),
            uploader,
            info: Box::new(SystemPlatformInfo),
            timer: Arc::new(MonotonicTimer),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::with_uploader(Arc::new(DiscardingUploader))
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("info", &self.info.name())
            .finish()
    }
}

/// Platform information from the standard library and environment.
pub struct SystemPlatformInfo;

impl PlatformInfo for SystemPlatformInfo {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn os(&self) -> String {
        std::env::consts::OS.to_string()
    }

    fn os_version(&self) -> String {
        "unknown".to_string()
    }

    fn architecture(&self) -> String {
        std::env::consts::ARCH.to_string()
    }

    fn locale(&self) -> String {
        std::env::var("LANG")
            .ok()
            .and_then(|lang| lang.split('.').next().map(str::to_string))
            .filter(|lang| !lang.is_empty())
            .unwrap_or_else(|| "und".to_string())
    }
}

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// The default timer: the process-wide monotonic clock.
pub struct MonotonicTimer;

impl Timer for MonotonicTimer {
    fn now_ns(&self) -> u64 {
        PROCESS_START.elapsed().as_nanos() as u64
    }
}

/// An uploader for platforms without a transport: accepts and discards
/// every ping.
struct DiscardingUploader;

impl PingUploader for DiscardingUploader {
    fn post(&self, url: &str, _body: &[u8], _headers: &[(String, String)]) -> UploadResult {
        log::debug!("No uploader configured, discarding ping for {url}");
        UploadResult::Success
    }
}

/// The timer used for call-site timestamp capture. Swapped for the
/// platform's timer at initialization, so hosts and tests control the
/// clock even for work dispatched before init completes.
static TIMER: Lazy<RwLock<Arc<dyn Timer>>> =
    Lazy::new(|| RwLock::new(Arc::new(MonotonicTimer)));

pub(crate) fn set_timer(timer: Arc<dyn Timer>) {
    *TIMER.write().unwrap() = timer;
}

/// Monotonic nanoseconds, for timing distributions.
pub(crate) fn now_ns() -> u64 {
    TIMER.read().unwrap().now_ns()
}

/// Monotonic milliseconds, for event timestamps.
pub(crate) fn now_ms() -> u64 {
    now_ns() / 1_000_000
}
