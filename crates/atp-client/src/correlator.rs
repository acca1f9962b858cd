//! Request/response correlation for outbound calls.
//!
//! Every outbound request that expects a reply parks a single-use slot under its
//! request id. The receive path resolves the slot when a response with that id
//! arrives; correlation is purely by id, so responses may arrive in any order.

use std::future::Future;
use std::time::Duration;

use atp_transport::OutboundMessage;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{AtpError, Result};

/// Build a request id: `{purpose}_{entity}_{uuid}`.
pub fn new_request_id(purpose: &str, entity: &str) -> String {
    format!("{purpose}_{entity}_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug)]
struct PendingRequest {
    created_at: Instant,
    deadline: Instant,
    slot: oneshot::Sender<Value>,
}

/// Map of in-flight requests awaiting a correlated response.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: DashMap<String, PendingRequest>,
}

impl RequestCorrelator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a slot for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::DuplicateRequest`] if the id is already pending.
    pub fn register(&self, request_id: &str, timeout: Duration) -> Result<oneshot::Receiver<Value>> {
        match self.pending.entry(request_id.to_string()) {
            Entry::Occupied(_) => Err(AtpError::DuplicateRequest(request_id.to_string())),
            Entry::Vacant(entry) => {
                let (slot, receiver) = oneshot::channel();
                let now = Instant::now();
                entry.insert(PendingRequest {
                    created_at: now,
                    deadline: now + timeout,
                    slot,
                });
                trace!(request_id, "Pending request registered");
                Ok(receiver)
            }
        }
    }

    /// Deliver a response. Returns `false` when nothing was waiting for the id.
    pub fn resolve(&self, request_id: &str, payload: Value) -> bool {
        let Some((_, pending)) = self.pending.remove(request_id) else {
            warn!(request_id, "Dropping response with no pending request");
            return false;
        };

        let elapsed = pending.created_at.elapsed();
        if pending.slot.send(payload).is_err() {
            // The waiter was dropped between its deadline and our removal.
            debug!(request_id, ?elapsed, "Response arrived after the caller gave up");
            return false;
        }
        if Instant::now() > pending.deadline {
            debug!(request_id, ?elapsed, "Response resolved past its deadline");
        }
        trace!(request_id, ?elapsed, "Pending request resolved");
        true
    }

    /// Remove a pending request without resolving it.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.pending.remove(request_id).is_some()
    }

    /// Whether a request is awaiting its response.
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending request; their callers observe the client stopping.
    pub fn clear(&self) {
        let count = self.pending.len();
        self.pending.clear();
        if count > 0 {
            debug!(count, "Cleared pending requests");
        }
    }

    /// Register, transmit and await the correlated response.
    ///
    /// The pending entry is removed on every exit path: resolution, timeout,
    /// transmit failure, or the calling future being dropped.
    ///
    /// # Errors
    ///
    /// - [`AtpError::CorrelationTimeout`] if no response arrives within `timeout`
    /// - the transmit error if the message could not be sent
    /// - [`AtpError::NotRunning`] if the client stopped while waiting
    pub async fn send_and_await<F, Fut>(
        &self,
        message: OutboundMessage,
        timeout: Duration,
        transmit: F,
    ) -> Result<Value>
    where
        F: FnOnce(OutboundMessage) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let request_id = message
            .request_id()
            .map(str::to_owned)
            .ok_or_else(|| AtpError::Configuration("message carries no request id".to_string()))?;

        let receiver = self.register(&request_id, timeout)?;
        let _guard = PendingGuard {
            correlator: self,
            request_id: &request_id,
        };

        transmit(message).await?;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(AtpError::NotRunning),
            Err(_) => {
                warn!(request_id = %request_id, ?timeout, "Request timed out");
                Err(AtpError::CorrelationTimeout {
                    request_id: request_id.clone(),
                    timeout,
                })
            }
        }
    }
}

struct PendingGuard<'a> {
    correlator: &'a RequestCorrelator,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.pending.remove(self.request_id);
    }
}
