//! The orchestrator.
//!
//! [`Glean`] is the context struct owning every subsystem: databases,
//! upload manager, core metrics and the debug switches. One instance
//! lives behind a global mutex and is only touched from
//! dispatcher-serialized tasks, plus the two documented undispatched
//! paths (test accessors after a queue flush, and the deletion-request
//! submission inside the upload-disable transition).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use uuid::Uuid;

use crate::common::Lifetime;
use crate::config::{Configuration, ConfigurationError};
use crate::constants::{
    CLIENT_INFO_STORAGE, DEFAULT_MAX_EVENTS, DELETION_REQUEST_PING_NAME, EVENTS_PING_NAME,
    KNOWN_CLIENT_ID,
};
use crate::core_metrics::CoreMetrics;
use crate::database::events::EventDatabase;
use crate::database::metrics::MetricsDatabase;
use crate::database::pings::PingsDatabase;
use crate::debug::DebugOptions;
use crate::dispatcher::{Dispatcher, ExecutionMode, TaskResult, DEFAULT_MAX_PRE_INIT_QUEUE_SIZE};
use crate::metrics::{Metric, MetricType, PingType, TimeUnit};
use crate::ping_maker::PingMaker;
use crate::platform::{self, Platform, PlatformInfo};
use crate::upload::PingUploadManager;
use crate::utils::{local_now_with_offset, sanitize_application_id};

static GLEAN: Lazy<Mutex<Option<Glean>>> = Lazy::new(|| Mutex::new(None));

static DISPATCHER: Lazy<RwLock<Arc<Dispatcher>>> = Lazy::new(|| {
    RwLock::new(Arc::new(Dispatcher::new(
        ExecutionMode::Background,
        DEFAULT_MAX_PRE_INIT_QUEUE_SIZE,
    )))
});

static INITIALIZED: AtomicBool = AtomicBool::new(false);

pub(crate) fn dispatcher() -> Arc<Dispatcher> {
    DISPATCHER.read().unwrap().clone()
}

/// Queues a task running against the core. Buffered before init.
pub(crate) fn launch_with_glean(task: impl FnOnce(&Glean) + Send + 'static) {
    dispatcher().launch(move || match GLEAN.lock().unwrap().as_ref() {
        Some(glean) => {
            task(glean);
            Ok(())
        }
        None => Err("the telemetry core is not initialized".into()),
    });
}

/// Queues a task mutating the core. Buffered before init.
pub(crate) fn launch_with_glean_mut(task: impl FnOnce(&mut Glean) + Send + 'static) {
    dispatcher().launch(move || match GLEAN.lock().unwrap().as_mut() {
        Some(glean) => {
            task(glean);
            Ok(())
        }
        None => Err("the telemetry core is not initialized".into()),
    });
}

/// Runs `f` against the core right now, outside the dispatcher. Reserved
/// for test accessors (after a queue flush) and teardown.
pub(crate) fn with_glean<R>(f: impl FnOnce(&Glean) -> R) -> Option<R> {
    GLEAN.lock().unwrap().as_ref().map(f)
}

/// Blocks until every task queued so far has settled.
pub(crate) fn block_on_dispatcher() {
    dispatcher().block_on_queue();
}

pub(crate) fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

/// Flushes the dispatcher with the task that builds and installs the
/// core. Idempotent after the first call.
pub(crate) fn initialize(config: Configuration, platform: Platform) -> bool {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        log::error!("The telemetry core was already initialized, ignoring");
        return false;
    }
    dispatcher().flush_init_with(move || init_task(config, platform));
    true
}

fn init_task(config: Configuration, platform: Platform) -> TaskResult {
    let mut glean = Glean::new(config, platform)?;
    glean.apply_initialization();
    *GLEAN.lock().unwrap() = Some(glean);
    Ok(())
}

/// Drains the dispatcher and the upload manager. Irreversible.
pub(crate) fn shutdown() {
    if !is_initialized() {
        log::error!("Cannot shut down: the telemetry core was never initialized");
        return;
    }
    dispatcher().shutdown();
    with_glean(|glean| {
        glean.upload_manager().block_on_ongoing_uploads();
        glean.upload_manager().shutdown();
    });
}

/// Tears the global instance down and installs a fresh dispatcher, so a
/// following [`initialize`] starts from scratch. Test-only.
pub(crate) fn destroy_for_testing() {
    dispatcher().shutdown();
    *DISPATCHER.write().unwrap() = Arc::new(Dispatcher::new(
        ExecutionMode::Background,
        DEFAULT_MAX_PRE_INIT_QUEUE_SIZE,
    ));
    drop(GLEAN.lock().unwrap().take());
    INITIALIZED.store(false, Ordering::SeqCst);
}

/// The assembled telemetry core.
pub struct Glean {
    config: Configuration,
    application_id: String,
    upload_enabled: bool,
    metrics_db: MetricsDatabase,
    events_db: EventDatabase,
    pings_db: Arc<Mutex<PingsDatabase>>,
    upload_manager: PingUploadManager,
    ping_maker: PingMaker,
    core_metrics: CoreMetrics,
    ping_registry: HashMap<String, PingType>,
    platform_info: Box<dyn PlatformInfo>,
    start_time: DateTime<FixedOffset>,
    max_events: usize,
    debug: DebugOptions,
}

impl Glean {
    /// Builds the core over the given platform. Storage is opened here;
    /// the state reconciliation happens in
    /// [`apply_initialization`](Self::apply_initialization).
    pub fn new(config: Configuration, platform: Platform) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let application_id = sanitize_application_id(&config.application_id);

        platform::set_timer(platform.timer.clone());

        let metrics_db = MetricsDatabase::new(
            (platform.storage)("userLifetimeMetrics"),
            (platform.storage)("pingLifetimeMetrics"),
            (platform.storage)("appLifetimeMetrics"),
        );
        let events_db = EventDatabase::new((platform.storage)("events"));
        let pings_db = Arc::new(Mutex::new(PingsDatabase::new((platform.storage)(
            "pendingPings",
        ))));

        let upload_manager = PingUploadManager::new(
            platform.uploader,
            pings_db.clone(),
            config.server_endpoint.clone(),
            config.upload_policy.clone(),
        );
        pings_db.lock().unwrap().attach_observer(upload_manager.enqueuer());

        let mut debug = DebugOptions {
            log_pings: config.log_pings,
            ..Default::default()
        };
        if let Some(tag) = &config.debug_view_tag {
            debug.set_debug_view_tag(tag);
        }
        if let Some(tags) = &config.source_tags {
            debug.set_source_tags(tags.clone());
        }

        let max_events = config.max_events.unwrap_or(DEFAULT_MAX_EVENTS);
        let upload_enabled = config.upload_enabled;

        Ok(Self {
            config,
            application_id,
            upload_enabled,
            metrics_db,
            events_db,
            pings_db,
            upload_manager,
            ping_maker: PingMaker::new(),
            core_metrics: CoreMetrics::new(),
            ping_registry: HashMap::new(),
            platform_info: platform.info,
            start_time: local_now_with_offset(),
            max_events,
            debug,
        })
    }

    /// The initialization sequence. Ordering matters: upload-enabled
    /// reconciliation first, the events database afterwards (it may
    /// record a restart event), the pending-pings scan last so pings
    /// deleted by the reconciliation are not re-enqueued.
    pub fn apply_initialization(&mut self) {
        let deletion_request =
            PingType::unregistered(DELETION_REQUEST_PING_NAME, true, true, Vec::new());
        let events_ping = PingType::unregistered(
            EVENTS_PING_NAME,
            true,
            false,
            vec!["startup".into(), "max_capacity".into()],
        );
        self.register_ping_type(&deletion_request);
        self.register_ping_type(&events_ping);

        let first_run = self
            .metrics_db
            .get_metric(Lifetime::User, CLIENT_INFO_STORAGE, "datetime", "first_run_date")
            .is_none();

        if self.config.upload_enabled {
            self.upload_enabled = true;
            // Application-lifetime data is only cleared while upload is
            // enabled, and before the client metrics are re-derived.
            self.metrics_db.clear(Lifetime::Application, None);
            self.init_client_metrics(first_run);
        } else {
            let previously_enabled = !first_run
                && match self.metrics_db.get_metric(
                    Lifetime::User,
                    CLIENT_INFO_STORAGE,
                    "uuid",
                    "client_id",
                ) {
                    Some(Metric::Uuid(id)) => id != KNOWN_CLIENT_ID.to_string(),
                    _ => false,
                };
            if previously_enabled {
                // Disabled while we were not running: say goodbye like a
                // live toggle would.
                self.upload_enabled = true;
                self.submit_ping_by_name(DELETION_REQUEST_PING_NAME, None);
            }
            self.clear_metrics();
            self.upload_enabled = false;
        }

        let overflowing = self.events_db.initialize(self.max_events);
        if self.upload_enabled {
            for ping_name in overflowing {
                self.submit_ping_by_name(&ping_name, Some("startup"));
            }
        }

        self.pings_db.lock().unwrap().scan_pending_pings();
    }

    /// Whether metrics are currently recorded and pings uploaded.
    pub fn is_upload_enabled(&self) -> bool {
        self.upload_enabled
    }

    /// Flips the upload-enabled state. Returns whether anything changed.
    pub fn set_upload_enabled(&mut self, flag: bool) -> bool {
        if self.upload_enabled == flag {
            return false;
        }
        if flag {
            self.upload_enabled = true;
            self.metrics_db.clear(Lifetime::Application, None);
            self.init_client_metrics(false);
        } else {
            // The deletion-request goes out while upload is still
            // asserted, carrying the real client id one last time.
            self.submit_ping_by_name(DELETION_REQUEST_PING_NAME, None);
            self.clear_metrics();
            self.upload_enabled = false;
        }
        true
    }

    /// Derives the client metrics: a client id (regenerated when missing
    /// or parked at the sentinel), the first-run date, host information
    /// and the application metadata from the configuration.
    fn init_client_metrics(&self, is_first_run: bool) {
        let needs_new_id = match self.metrics_db.get_metric(
            Lifetime::User,
            CLIENT_INFO_STORAGE,
            "uuid",
            "client_id",
        ) {
            Some(Metric::Uuid(id)) => id == KNOWN_CLIENT_ID.to_string(),
            _ => true,
        };
        if needs_new_id {
            self.core_metrics
                .client_id
                .set_from_uuid_sync(self, Uuid::new_v4());
        }
        if is_first_run {
            self.core_metrics.first_run_date.set_sync(self, None);
        }

        self.core_metrics.os.set_sync(self, &self.platform_info.os());
        self.core_metrics
            .os_version
            .set_sync(self, &self.platform_info.os_version());
        self.core_metrics
            .architecture
            .set_sync(self, &self.platform_info.architecture());
        self.core_metrics
            .locale
            .set_sync(self, &self.platform_info.locale());

        if let Some(app_build) = &self.config.app_build {
            self.core_metrics.app_build.set_sync(self, app_build);
        }
        if let Some(version) = &self.config.app_display_version {
            self.core_metrics.app_display_version.set_sync(self, version);
        }
        if let Some(channel) = &self.config.channel {
            self.core_metrics.app_channel.set_sync(self, channel);
        }
        if let Some(build_date) = self.config.build_date {
            self.core_metrics.build_date.set_sync(self, Some(build_date));
        }
    }

    /// Clears every database, keeping the first-run date and parking the
    /// client id at the sentinel. Pending deletion-requests survive.
    fn clear_metrics(&self) {
        self.upload_manager.clear_pending_pings_queue();
        self.pings_db.lock().unwrap().clear_except_deletion_requests();
        self.events_db.clear_all();

        let first_run_date = self.metrics_db.get_metric(
            Lifetime::User,
            CLIENT_INFO_STORAGE,
            "datetime",
            "first_run_date",
        );
        self.metrics_db.clear_all();

        // These two record regardless of the upload state, through the
        // database directly.
        let restored = first_run_date
            .unwrap_or_else(|| Metric::Datetime(local_now_with_offset(), TimeUnit::Day));
        self.metrics_db
            .record(self, self.core_metrics.first_run_date.meta(), &restored);
        self.metrics_db.record(
            self,
            self.core_metrics.client_id.meta(),
            &Metric::Uuid(KNOWN_CLIENT_ID.to_string()),
        );
    }

    /// Registers a ping type for submission by name.
    pub fn register_ping_type(&mut self, ping: &PingType) {
        self.ping_registry.insert(ping.name.clone(), ping.clone());
    }

    /// Assembles and queues one submission of `ping`. Returns whether an
    /// envelope was produced.
    pub fn submit_ping(&self, ping: &PingType, reason: Option<&str>) -> bool {
        if !self.upload_enabled && ping.name != DELETION_REQUEST_PING_NAME {
            log::info!("Upload is disabled, not submitting ping {}", ping.name);
            return false;
        }

        let reason = reason.filter(|reason| ping.accepts_reason(reason));
        let mut request = match self.ping_maker.collect(self, ping, reason) {
            Some(request) => request,
            None => return false,
        };

        for hook in &self.config.plugins {
            hook.after_ping_collection(&ping.name, &mut request.payload);
        }

        if self.debug.log_pings {
            log::info!(
                "Submitting ping to {}:\n{}",
                request.path,
                serde_json::to_string_pretty(&request.payload).unwrap_or_default()
            );
        }

        self.pings_db.lock().unwrap().record_ping(&request);
        true
    }

    /// [`submit_ping`](Self::submit_ping) through the registry.
    pub fn submit_ping_by_name(&self, ping_name: &str, reason: Option<&str>) -> bool {
        match self.ping_registry.get(ping_name) {
            Some(ping) => self.submit_ping(ping, reason),
            None => {
                log::error!("No ping type named {ping_name} is registered");
                false
            }
        }
    }

    pub(crate) fn metrics_db(&self) -> &MetricsDatabase {
        &self.metrics_db
    }

    pub(crate) fn events_db(&self) -> &EventDatabase {
        &self.events_db
    }

    pub(crate) fn upload_manager(&self) -> &PingUploadManager {
        &self.upload_manager
    }

    pub(crate) fn pings_db(&self) -> &Arc<Mutex<PingsDatabase>> {
        &self.pings_db
    }

    pub(crate) fn core_metrics(&self) -> &CoreMetrics {
        &self.core_metrics
    }

    pub(crate) fn platform_info(&self) -> &dyn PlatformInfo {
        self.platform_info.as_ref()
    }

    /// The sanitized application id, as used in submission paths.
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// The wall-clock time this instance was created, the fallback
    /// start time for first submissions.
    pub fn start_time(&self) -> DateTime<FixedOffset> {
        self.start_time
    }

    /// The event-list capacity triggering eager submission.
    pub fn max_events(&self) -> usize {
        self.max_events
    }

    pub(crate) fn debug(&self) -> &DebugOptions {
        &self.debug
    }

    pub(crate) fn debug_mut(&mut self) -> &mut DebugOptions {
        &mut self.debug
    }
}
