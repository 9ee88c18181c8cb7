//! Response routing for pending bridge requests.
//!
//! The ResponseRouter decodes every inbound message at the channel boundary
//! and demultiplexes it:
//! - `ready` flips the lifecycle to Ready (duplicates are ignored)
//! - `progress` is forwarded to the request's sink, which stays pending
//! - `success` / `error` remove the request and settle its future
//!
//! Protocol errors (unknown id, wrong shape, duplicate ready) are logged and
//! dropped. Nothing here returns an error or panics on host input.

use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;

use super::pending_registry::{PendingRegistry, ProgressTarget, SettleResult};
use crate::bridge::lifecycle::Lifecycle;
use crate::bridge::protocol::{InboundMessage, RequestId};
use crate::error::BridgeError;

/// What the router did with one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteResult {
    /// First `ready`; lifecycle moved to Ready.
    Ready,
    /// `ready` after the first, or after termination.
    DuplicateReady,
    /// Progress forwarded to a sink.
    ProgressDelivered,
    /// Progress for a pending request registered without a sink.
    ProgressIgnored,
    /// Terminal message settled its future.
    Settled,
    /// Terminal message matched, but the caller was no longer waiting.
    ReceiverDropped,
    /// No pending request with this id.
    UnknownId,
    /// Message did not decode.
    Malformed,
}

pub(crate) struct ResponseRouter {
    registry: Arc<PendingRegistry>,
    lifecycle: Arc<Lifecycle>,
}

impl ResponseRouter {
    pub(crate) fn new(registry: Arc<PendingRegistry>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            registry,
            lifecycle,
        }
    }

    /// Decode and route one raw message from the transport.
    pub(crate) fn route(&self, raw: Value) -> RouteResult {
        match InboundMessage::from_json(raw) {
            Ok(message) => self.route_message(message),
            Err(e) => {
                warn!(
                    target: "workbridge::bridge::router",
                    "Dropping malformed inbound message: {}",
                    e
                );
                RouteResult::Malformed
            }
        }
    }

    /// Route an already decoded message.
    pub(crate) fn route_message(&self, message: InboundMessage) -> RouteResult {
        match message {
            InboundMessage::Ready { .. } => {
                if self.lifecycle.mark_ready() {
                    debug!(target: "workbridge::bridge::router", "Background host ready");
                    RouteResult::Ready
                } else {
                    debug!(
                        target: "workbridge::bridge::router",
                        "Ignoring duplicate ready (state {:?})",
                        self.lifecycle.state()
                    );
                    RouteResult::DuplicateReady
                }
            }
            InboundMessage::Progress { id, payload } => {
                match self.registry.progress_target(&id) {
                    // Sink runs outside the registry lock so it may dispatch
                    ProgressTarget::Sink(sink) => {
                        sink.report(payload);
                        RouteResult::ProgressDelivered
                    }
                    ProgressTarget::NoSink => RouteResult::ProgressIgnored,
                    ProgressTarget::Unknown => {
                        debug!(
                            target: "workbridge::bridge::router",
                            "Progress for unknown request {}, dropping",
                            id
                        );
                        RouteResult::UnknownId
                    }
                }
            }
            InboundMessage::Success { id, payload } => self.settle(id, Ok(payload)),
            InboundMessage::Error { id, error } => {
                self.settle(id, Err(BridgeError::operation(error.message)))
            }
        }
    }

    fn settle(&self, id: RequestId, outcome: Result<Value, BridgeError>) -> RouteResult {
        match self.registry.settle(&id, outcome) {
            SettleResult::Delivered => RouteResult::Settled,
            SettleResult::ReceiverDropped => {
                debug!(
                    target: "workbridge::bridge::router",
                    "Caller for request {} stopped waiting, dropping result",
                    id
                );
                RouteResult::ReceiverDropped
            }
            SettleResult::Unknown => {
                debug!(
                    target: "workbridge::bridge::router",
                    "Response for unknown request {}, dropping",
                    id
                );
                RouteResult::UnknownId
            }
        }
    }

    /// Handle a transport failure: terminate and fail everything pending.
    pub(crate) fn fail_transport(&self, reason: &str) {
        if self.lifecycle.terminate() {
            warn!(
                target: "workbridge::bridge::router",
                "Transport failed ({}), terminating bridge",
                reason
            );
        }
        let failed = self.registry.close(BridgeError::Terminated);
        if failed > 0 {
            debug!(
                target: "workbridge::bridge::router",
                "Failed {} pending request(s) after transport failure",
                failed
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::lifecycle::BridgeState;
    use crate::bridge::protocol::ProgressSink;
    use serde_json::json;
    use std::sync::Mutex;

    fn router() -> (ResponseRouter, Arc<PendingRegistry>, Arc<Lifecycle>) {
        let registry = Arc::new(PendingRegistry::new());
        let lifecycle = Arc::new(Lifecycle::new());
        (
            ResponseRouter::new(registry.clone(), lifecycle.clone()),
            registry,
            lifecycle,
        )
    }

    #[test]
    fn ready_transitions_once() {
        let (router, _, lifecycle) = router();
        lifecycle.begin_initializing();

        assert_eq!(router.route(json!({"kind": "ready"})), RouteResult::Ready);
        assert_eq!(lifecycle.state(), BridgeState::Ready);
        assert_eq!(
            router.route(json!({"kind": "ready"})),
            RouteResult::DuplicateReady
        );
        assert_eq!(lifecycle.state(), BridgeState::Ready);
    }

    #[tokio::test]
    async fn success_routes_to_matching_request_only() {
        let (router, registry, _) = router();
        let rx_a = registry.register(RequestId::new("a"), None).unwrap();
        let rx_b = registry.register(RequestId::new("b"), None).unwrap();

        let result = router.route(json!({"id": "b", "kind": "success", "payload": 2}));
        assert_eq!(result, RouteResult::Settled);
        let result = router.route(json!({"id": "a", "kind": "success", "payload": 1}));
        assert_eq!(result, RouteResult::Settled);

        assert_eq!(rx_a.await.unwrap(), Ok(json!(1)));
        assert_eq!(rx_b.await.unwrap(), Ok(json!(2)));
    }

    #[tokio::test]
    async fn error_settles_with_operation_error() {
        let (router, registry, _) = router();
        let rx = registry.register(RequestId::new("a"), None).unwrap();

        router.route(json!({"id": "a", "kind": "error", "error": {"message": "boom"}}));

        assert_eq!(rx.await.unwrap(), Err(BridgeError::operation("boom")));
    }

    #[test]
    fn progress_is_forwarded_without_removing() {
        let (router, registry, _) = router();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = ProgressSink::new(move |u| seen_clone.lock().unwrap().push(u.percentage));
        let _rx = registry.register(RequestId::new("a"), Some(sink)).unwrap();

        let message = json!({"id": "a", "kind": "progress", "payload": {"percentage": 30}});
        assert_eq!(router.route(message), RouteResult::ProgressDelivered);
        assert_eq!(registry.pending_count(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![30.0]);
    }

    #[test]
    fn progress_after_terminal_is_dropped() {
        let (router, registry, _) = router();
        let sink = ProgressSink::new(|_| panic!("sink must not run after terminal"));
        let _rx = registry.register(RequestId::new("a"), Some(sink)).unwrap();

        router.route(json!({"id": "a", "kind": "success", "payload": null}));
        let late = json!({"id": "a", "kind": "progress", "payload": {"percentage": 99}});
        assert_eq!(router.route(late), RouteResult::UnknownId);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn unknown_id_is_dropped() {
        let (router, registry, _) = router();
        let _rx = registry.register(RequestId::new("a"), None).unwrap();

        let stray = json!({"id": "never-sent", "kind": "success", "payload": {}});
        assert_eq!(router.route(stray), RouteResult::UnknownId);
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn malformed_messages_are_dropped() {
        let (router, registry, _) = router();
        let _rx = registry.register(RequestId::new("a"), None).unwrap();

        assert_eq!(router.route(json!({"nope": true})), RouteResult::Malformed);
        assert_eq!(
            router.route(json!({"id": "a", "kind": "progress", "payload": "half"})),
            RouteResult::Malformed
        );
        assert_eq!(registry.pending_count(), 1);
    }

    #[tokio::test]
    async fn fail_transport_terminates_and_drains() {
        let (router, registry, lifecycle) = router();
        let rx = registry.register(RequestId::new("a"), None).unwrap();

        router.fail_transport("reader error");

        assert_eq!(lifecycle.state(), BridgeState::Terminated);
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(rx.await.unwrap(), Err(BridgeError::Terminated));
        assert_eq!(
            router.route(json!({"kind": "ready"})),
            RouteResult::DuplicateReady,
            "ready after termination is ignored"
        );
    }
}
