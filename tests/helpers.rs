//! Shared helpers for bridge integration tests.
//!
//! Tests drive the bridge against a scripted host: the test body holds the
//! host side of an in-process channel and answers requests by hand.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use workbridge::bridge::protocol::{InboundMessage, OperationRequest, OutboundEnvelope};
use workbridge::bridge::{HostEndpoint, ProgressSink, ProgressUpdate, channel_pair};
use workbridge::{Bridge, BridgeSettings};

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub fn bridge_with_host() -> (Bridge, HostEndpoint) {
    bridge_with_settings(&BridgeSettings::default())
}

pub fn bridge_with_settings(settings: &BridgeSettings) -> (Bridge, HostEndpoint) {
    let (transport, host) = channel_pair();
    (Bridge::new(transport, settings), host)
}

/// Next request the bridge sent to the host.
pub async fn next_request(host: &mut HostEndpoint) -> OutboundEnvelope {
    tokio::time::timeout(TEST_TIMEOUT, host.recv())
        .await
        .expect("timed out waiting for a request")
        .expect("bridge closed the channel")
}

/// Receive the initialize request and complete startup.
pub async fn answer_startup(host: &mut HostEndpoint) {
    let init = next_request(host).await;
    assert_eq!(init.request, OperationRequest::Initialize);
    host.send(InboundMessage::ready()).unwrap();
    host.send(InboundMessage::success(init.id, Value::Null)).unwrap();
}

/// Bound a future by [`TEST_TIMEOUT`].
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("test timed out")
}

/// Progress sink that records every update.
pub fn recording_sink() -> (ProgressSink, Arc<Mutex<Vec<ProgressUpdate>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let sink = ProgressSink::new(move |update| seen_clone.lock().unwrap().push(update));
    (sink, seen)
}
