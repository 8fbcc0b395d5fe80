use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::storage::Store;
use crate::upload::PingRequest;

/// Gets told about pings entering the pending store. The upload manager
/// registers itself here.
pub trait PingObserver: Send + Sync {
    /// A ping was recorded (or re-discovered during the startup scan).
    fn on_new_ping(&self, request: &PingRequest);
}

/// The durable FIFO of assembled pings awaiting upload, keyed by document
/// id under the `pendingPings` root key.
pub struct PingsDatabase {
    store: Box<dyn Store>,
    observers: Vec<Arc<dyn PingObserver>>,
}

impl PingsDatabase {
    /// Creates the database over its store.
    pub fn new(store: Box<dyn Store>) -> Self {
        Self {
            store,
            observers: Vec::new(),
        }
    }

    /// Registers an observer for newly recorded pings.
    pub fn attach_observer(&mut self, observer: Arc<dyn PingObserver>) {
        self.observers.push(observer);
    }

    /// Persists an assembled ping and notifies observers.
    pub fn record_ping(&mut self, request: &PingRequest) {
        let stored = match serde_json::to_value(request) {
            Ok(stored) => stored,
            Err(err) => {
                log::error!("Failed to serialize ping {}: {err}", request.document_id);
                return;
            }
        };
        if let Err(err) = self
            .store
            .update(&[request.document_id.as_str()], &mut |_| stored.clone())
        {
            log::error!("Failed to persist ping {}: {err}", request.document_id);
            return;
        }
        for observer in &self.observers {
            observer.on_new_ping(request);
        }
    }

    /// Removes a ping, typically after a successful or unrecoverable
    /// upload.
    pub fn delete_ping(&mut self, document_id: &str) {
        if let Err(err) = self.store.delete(&[document_id]) {
            log::error!("Failed to delete ping {document_id}: {err}");
        }
    }

    /// The persisted pings ordered by submission time. Malformed entries
    /// are dropped from storage.
    pub fn pending_pings(&mut self) -> Vec<PingRequest> {
        let root = match self.store.get(&[]) {
            Some(JsonValue::Object(root)) => root,
            _ => return Vec::new(),
        };
        let mut requests: Vec<PingRequest> = Vec::with_capacity(root.len());
        for (document_id, stored) in root {
            match serde_json::from_value::<PingRequest>(stored) {
                Ok(request) if request.document_id == document_id => requests.push(request),
                _ => {
                    log::warn!("Malformed pending ping {document_id}, deleting");
                    let _ = self.store.delete(&[document_id.as_str()]);
                }
            }
        }
        requests.sort_by_key(|request| request.submitted_at);
        requests
    }

    /// Presents every persisted ping to the observers, oldest first.
    /// Called once at initialization, after upload-enabled
    /// reconciliation.
    pub fn scan_pending_pings(&mut self) {
        for request in self.pending_pings() {
            for observer in &self.observers {
                observer.on_new_ping(&request);
            }
        }
    }

    /// Drops every persisted ping.
    pub fn clear_all(&mut self) {
        if let Err(err) = self.store.delete(&[]) {
            log::error!("Failed to clear the pending pings store: {err}");
        }
    }

    /// Drops persisted pings except deletion-requests, which must survive
    /// an upload-disable.
    pub fn clear_except_deletion_requests(&mut self) {
        for request in self.pending_pings() {
            if !request.is_deletion_request() {
                self.delete_ping(&request.document_id);
            }
        }
    }
}
