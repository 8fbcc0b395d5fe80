//! The ping upload manager.
//!
//! Drains the queue of assembled pings on a dedicated worker thread: one
//! request in flight at a time, retries with exponential backoff on
//! recoverable failures, a sliding-window rate limit across pings. The
//! actual HTTP work is delegated to the platform's
//! [`PingUploader`](crate::platform::PingUploader).

pub mod policy;
pub mod rate_limiter;
mod request;
mod result;

pub use policy::{NextAction, Policy};
pub use request::PingRequest;
pub use result::UploadResult;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::database::pings::{PingObserver, PingsDatabase};
use crate::platform::PingUploader;
use rate_limiter::{RateLimiter, RateLimiterState};

struct QueuedPing {
    request: PingRequest,
    /// Recoverable failures so far.
    failures: u32,
    last_result: Option<UploadResult>,
}

#[derive(Default)]
struct QueueInner {
    queue: VecDeque<QueuedPing>,
    /// Document id of the request currently on the wire.
    in_flight: Option<String>,
}

struct QueueState {
    inner: Mutex<QueueInner>,
    work: Condvar,
    /// Parked backoff/throttle sleeps wait here so enqueues stay cheap.
    sleep_lock: Mutex<()>,
    sleep_cond: Condvar,
    shutdown: AtomicBool,
}

impl QueueState {
    /// Sleeps up to `duration`; cut short by shutdown. Returns whether a
    /// shutdown was seen.
    fn sleep_interruptible(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.sleep_lock.lock().unwrap();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self.sleep_cond.wait_timeout(guard, deadline - now).unwrap();
            guard = next;
        }
    }
}

/// The handle handed to the pings database; pushes new pings onto the
/// upload queue.
pub struct UploadEnqueuer {
    state: Arc<QueueState>,
}

impl PingObserver for UploadEnqueuer {
    fn on_new_ping(&self, request: &PingRequest) {
        let mut inner = self.state.inner.lock().unwrap();
        let already_queued = inner
            .queue
            .iter()
            .any(|queued| queued.request.document_id == request.document_id)
            || inner.in_flight.as_deref() == Some(request.document_id.as_str());
        if already_queued {
            return;
        }
        inner.queue.push_back(QueuedPing {
            request: request.clone(),
            failures: 0,
            last_result: None,
        });
        drop(inner);
        self.state.work.notify_all();
    }
}

/// Owns the upload worker and its queue.
pub struct PingUploadManager {
    state: Arc<QueueState>,
    policy: Policy,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PingUploadManager {
    /// Creates the manager and starts its worker thread.
    pub fn new(
        uploader: Arc<dyn PingUploader>,
        pings_db: Arc<Mutex<PingsDatabase>>,
        server_endpoint: String,
        policy: Policy,
    ) -> Self {
        let state = Arc::new(QueueState {
            inner: Mutex::new(QueueInner::default()),
            work: Condvar::new(),
            sleep_lock: Mutex::new(()),
            sleep_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let worker = {
            let state = state.clone();
            let policy = policy.clone();
            thread::Builder::new()
                .name("telemetry-uploader".into())
                .spawn(move || worker_loop(state, uploader, pings_db, server_endpoint, policy))
                .ok()
        };

        Self {
            state,
            policy,
            worker: Mutex::new(worker),
        }
    }

    /// The observer to attach to the pings database.
    pub fn enqueuer(&self) -> Arc<UploadEnqueuer> {
        Arc::new(UploadEnqueuer {
            state: self.state.clone(),
        })
    }

    /// The policy this manager runs under.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Drops every queued ping except deletion-requests. An in-flight
    /// request is not cancelled.
    pub fn clear_pending_pings_queue(&self) {
        let mut inner = self.state.inner.lock().unwrap();
        inner
            .queue
            .retain(|queued| queued.request.is_deletion_request());
    }

    /// Resolves once no request is on the wire.
    pub fn block_on_ongoing_uploads(&self) {
        let mut inner = self.state.inner.lock().unwrap();
        while inner.in_flight.is_some() {
            inner = self.state.work.wait(inner).unwrap();
        }
    }

    /// Stops the worker. Queued pings stay persisted and are rescanned on
    /// the next initialization.
    pub fn shutdown(&self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        self.state.work.notify_all();
        self.state.sleep_cond.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("The upload worker panicked");
            }
        }
    }
}

impl Drop for PingUploadManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    state: Arc<QueueState>,
    uploader: Arc<dyn PingUploader>,
    pings_db: Arc<Mutex<PingsDatabase>>,
    server_endpoint: String,
    policy: Policy,
) {
    let mut rate_limiter = RateLimiter::new(
        policy.rate_limiter_interval,
        policy.max_pings_per_interval,
    );

    loop {
        let mut queued = {
            let mut inner = state.inner.lock().unwrap();
            loop {
                if state.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                match inner.queue.pop_front() {
                    Some(queued) => break queued,
                    None => inner = state.work.wait(inner).unwrap(),
                }
            }
        };

        let document_id = queued.request.document_id.clone();
        let url = queued.request.url(&server_endpoint);
        let body = queued.request.body();
        let mut wait_attempts = 0;

        loop {
            let action = policy.next_action(queued.failures, queued.last_result.as_ref());
            match action {
                NextAction::Done => {
                    match queued.last_result {
                        Some(result) if result.is_success() => {
                            log::debug!("Ping {document_id} delivered");
                            pings_db.lock().unwrap().delete_ping(&document_id);
                        }
                        Some(result) if result.is_unrecoverable_failure() => {
                            log::warn!(
                                "Ping {document_id} rejected by the server ({result:?}), discarding"
                            );
                            pings_db.lock().unwrap().delete_ping(&document_id);
                        }
                        _ => {
                            log::error!(
                                "Ping {document_id} failed {} times, giving up",
                                queued.failures
                            );
                            pings_db.lock().unwrap().delete_ping(&document_id);
                        }
                    }
                    break;
                }
                NextAction::Wait(duration) => {
                    wait_attempts += 1;
                    if wait_attempts > policy.max_wait_attempts {
                        log::error!("Ping {document_id} waited too many times, giving up");
                        pings_db.lock().unwrap().delete_ping(&document_id);
                        break;
                    }
                    log::debug!(
                        "Waiting {}ms before retrying ping {document_id}",
                        duration.as_millis()
                    );
                    if state.sleep_interruptible(duration) {
                        return;
                    }
                }
                NextAction::Upload => {}
            }

            // Respect the rate limiter before every attempt.
            loop {
                match rate_limiter.get_state() {
                    RateLimiterState::Incoming => break,
                    RateLimiterState::Throttled(remaining) => {
                        log::debug!(
                            "Ping budget exhausted, sleeping {}ms",
                            remaining.as_millis()
                        );
                        if state.sleep_interruptible(remaining) {
                            return;
                        }
                    }
                }
            }

            state.inner.lock().unwrap().in_flight = Some(document_id.clone());
            let result = uploader.post(&url, &body, &queued.request.headers);
            {
                let mut inner = state.inner.lock().unwrap();
                inner.in_flight = None;
            }
            state.work.notify_all();

            if !result.is_success() && !result.is_unrecoverable_failure() {
                queued.failures += 1;
            }
            queued.last_result = Some(result);
        }
    }
}
