//! Pending request bookkeeping.
//!
//! The registry owns every in-flight request from dispatch until its
//! terminal message (or bridge teardown): insert on dispatch, lookup on
//! progress, remove on terminal, drain on terminate. All operations run under
//! one mutex so they are linearizable with respect to each other.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::bridge::protocol::{ProgressSink, RequestId};
use crate::error::{BridgeError, BridgeResult, LockResultExt};

/// Receiver side handed back to the dispatcher.
pub(crate) type ResponseReceiver = oneshot::Receiver<BridgeResult<Value>>;

/// An in-flight request's continuation.
struct PendingRequest {
    responder: oneshot::Sender<BridgeResult<Value>>,
    progress: Option<ProgressSink>,
}

/// Outcome of a progress lookup.
#[derive(Debug)]
pub(crate) enum ProgressTarget {
    /// No pending request with this id.
    Unknown,
    /// Request is pending but the caller did not ask for progress.
    NoSink,
    Sink(ProgressSink),
}

/// Outcome of settling a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SettleResult {
    Delivered,
    /// The entry existed but the caller stopped waiting.
    ReceiverDropped,
    Unknown,
}

struct RegistryState {
    pending: HashMap<RequestId, PendingRequest>,
    /// Set on teardown; later registrations are refused so no request can
    /// slip in after the final drain.
    closed: bool,
}

pub(crate) struct PendingRegistry {
    state: Mutex<RegistryState>,
}

impl PendingRegistry {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                pending: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Register a pending request and return a receiver for its outcome.
    ///
    /// Must be called before the request is handed to the writer so the
    /// response can be routed whenever it arrives.
    pub(crate) fn register(
        &self,
        id: RequestId,
        progress: Option<ProgressSink>,
    ) -> BridgeResult<ResponseReceiver> {
        let mut state = self.state.lock().recover_poison("PendingRegistry::register");
        if state.closed {
            return Err(BridgeError::Terminated);
        }
        if state.pending.contains_key(&id) {
            return Err(BridgeError::DuplicateRequestId);
        }

        let (responder, rx) = oneshot::channel();
        state.pending.insert(
            id,
            PendingRequest {
                responder,
                progress,
            },
        );
        Ok(rx)
    }

    /// Look up the progress sink for a pending request without removing it.
    pub(crate) fn progress_target(&self, id: &RequestId) -> ProgressTarget {
        let state = self
            .state
            .lock()
            .recover_poison("PendingRegistry::progress_target");
        match state.pending.get(id) {
            None => ProgressTarget::Unknown,
            Some(PendingRequest { progress: None, .. }) => ProgressTarget::NoSink,
            Some(PendingRequest {
                progress: Some(sink),
                ..
            }) => ProgressTarget::Sink(sink.clone()),
        }
    }

    /// Remove a pending request and settle it with `outcome`.
    pub(crate) fn settle(&self, id: &RequestId, outcome: BridgeResult<Value>) -> SettleResult {
        let entry = {
            let mut state = self.state.lock().recover_poison("PendingRegistry::settle");
            state.pending.remove(id)
        };

        match entry {
            Some(pending) => match pending.responder.send(outcome) {
                Ok(()) => SettleResult::Delivered,
                Err(_) => SettleResult::ReceiverDropped,
            },
            None => SettleResult::Unknown,
        }
    }

    /// Remove a pending request without settling it.
    ///
    /// Used when the caller gives up (request timeout). A terminal message
    /// arriving later is then dropped as unknown.
    pub(crate) fn remove(&self, id: &RequestId) -> bool {
        let mut state = self.state.lock().recover_poison("PendingRegistry::remove");
        state.pending.remove(id).is_some()
    }

    pub(crate) fn pending_count(&self) -> usize {
        let state = self
            .state
            .lock()
            .recover_poison("PendingRegistry::pending_count");
        state.pending.len()
    }

    /// Refuse further registrations and fail everything still pending.
    ///
    /// Returns the number of requests that were failed. Idempotent.
    pub(crate) fn close(&self, error: BridgeError) -> usize {
        let entries: Vec<_> = {
            let mut state = self.state.lock().recover_poison("PendingRegistry::close");
            state.closed = true;
            state.pending.drain().collect()
        };

        // Lock released before sending
        let count = entries.len();
        for (_, pending) in entries {
            let _ = pending.responder.send(Err(error.clone()));
        }
        count
    }
}
