//! In-process channel transport.
//!
//! Connects the bridge to a host running on another thread of the same
//! process. Envelopes cross as Rust values, so transferable buffers are moved
//! to the host without a copy.

use std::io;

use serde_json::Value;
use tokio::sync::mpsc;

use super::{MessageSink, MessageSource, Transport};
use crate::bridge::protocol::{InboundMessage, OutboundEnvelope};

/// Bridge side of an in-process channel pair.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<OutboundEnvelope>,
    inbound: mpsc::UnboundedReceiver<Value>,
}

/// Host side of an in-process channel pair.
///
/// Offers both async and blocking receive so it works from a tokio task or
/// from a dedicated OS thread.
pub struct HostEndpoint {
    requests: mpsc::UnboundedReceiver<OutboundEnvelope>,
    replies: mpsc::UnboundedSender<Value>,
}

/// Why a host reply did not reach the bridge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostSendError {
    /// The bridge side of the channel has gone away.
    #[error("bridge side of the channel is closed")]
    Closed,
    /// The message could not be turned into JSON.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Create a connected transport / host endpoint pair.
pub fn channel_pair() -> (ChannelTransport, HostEndpoint) {
    let (outbound, requests) = mpsc::unbounded_channel();
    let (replies, inbound) = mpsc::unbounded_channel();
    (
        ChannelTransport { outbound, inbound },
        HostEndpoint { requests, replies },
    )
}

impl HostEndpoint {
    /// Next request, or `None` once the bridge closed the transport.
    pub async fn recv(&mut self) -> Option<OutboundEnvelope> {
        self.requests.recv().await
    }

    /// Blocking variant of [`recv`](Self::recv) for host threads.
    ///
    /// Panics if called from within an async execution context.
    pub fn blocking_recv(&mut self) -> Option<OutboundEnvelope> {
        self.requests.blocking_recv()
    }

    /// Non-blocking receive; `None` if nothing is queued right now.
    pub fn try_recv(&mut self) -> Option<OutboundEnvelope> {
        self.requests.try_recv().ok()
    }

    /// Send a typed message to the bridge.
    pub fn send(&self, message: InboundMessage) -> Result<(), HostSendError> {
        let value = serde_json::to_value(&message)
            .map_err(|e| HostSendError::Encode(e.to_string()))?;
        self.send_raw(value)
    }

    /// Send an arbitrary JSON value, bypassing typing. The bridge decodes it
    /// at its boundary like any other inbound message.
    pub fn send_raw(&self, value: Value) -> Result<(), HostSendError> {
        self.replies.send(value).map_err(|_| HostSendError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.replies.is_closed()
    }
}

/// Write half of a [`ChannelTransport`].
pub struct ChannelSink {
    outbound: Option<mpsc::UnboundedSender<OutboundEnvelope>>,
}

/// Read half of a [`ChannelTransport`].
pub struct ChannelSource {
    inbound: mpsc::UnboundedReceiver<Value>,
}

impl Transport for ChannelTransport {
    type Sink = ChannelSink;
    type Source = ChannelSource;

    fn split(self) -> (ChannelSink, ChannelSource) {
        (
            ChannelSink {
                outbound: Some(self.outbound),
            },
            ChannelSource {
                inbound: self.inbound,
            },
        )
    }
}

impl MessageSink for ChannelSink {
    async fn send(&mut self, envelope: OutboundEnvelope) -> io::Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "channel closed"))?;
        outbound
            .send(envelope)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "host endpoint dropped"))
    }

    async fn close(&mut self) -> io::Result<()> {
        // Dropping the sender ends the host's receive loop
        self.outbound.take();
        Ok(())
    }
}

impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> io::Result<Option<Value>> {
        Ok(self.inbound.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{
        AnalyzeFilesParams, FileEntry, OperationRequest, RequestId, TransferBuffer,
    };
    use serde_json::json;

    #[tokio::test]
    async fn envelopes_cross_without_copy() {
        let (transport, mut host) = channel_pair();
        let (mut sink, _source) = transport.split();

        let bytes = vec![7u8; 1024];
        let ptr = bytes.as_ptr();
        let envelope = OutboundEnvelope::new(
            RequestId::new("s-1"),
            OperationRequest::AnalyzeFiles(AnalyzeFilesParams {
                files: vec![FileEntry::new("a.dcm", bytes)],
            }),
        );
        sink.send(envelope).await.unwrap();

        let received = host.recv().await.unwrap();
        let OperationRequest::AnalyzeFiles(mut params) = received.request else {
            panic!("expected analyzeFiles");
        };
        let data: TransferBuffer = std::mem::take(&mut params.files[0].data);
        assert_eq!(data.as_slice().as_ptr(), ptr, "same allocation on host side");
    }

    #[tokio::test]
    async fn host_replies_arrive_in_order() {
        let (transport, host) = channel_pair();
        let (_sink, mut source) = transport.split();

        host.send(InboundMessage::ready()).unwrap();
        host.send_raw(json!({"kind": "weird"})).unwrap();

        assert_eq!(source.recv().await.unwrap(), Some(json!({"kind": "ready", "payload": null})));
        assert_eq!(source.recv().await.unwrap(), Some(json!({"kind": "weird"})));
    }

    #[tokio::test]
    async fn closing_sink_ends_host_loop() {
        let (transport, mut host) = channel_pair();
        let (mut sink, _source) = transport.split();

        sink.close().await.unwrap();
        assert!(host.recv().await.is_none());
        assert!(
            sink.send(OutboundEnvelope::new(RequestId::new("x"), OperationRequest::ClearCache))
                .await
                .is_err()
        );
    }

    #[test]
    fn send_after_bridge_dropped_reports_closed() {
        let (transport, host) = channel_pair();
        drop(transport);

        assert!(host.is_closed());
        assert_eq!(host.send(InboundMessage::ready()), Err(HostSendError::Closed));
        assert_eq!(host.send_raw(json!({})), Err(HostSendError::Closed));
    }

    #[test]
    fn encode_failure_is_not_a_closed_bridge() {
        let error = HostSendError::Encode("key must be a string".to_string());
        assert_ne!(error, HostSendError::Closed);
        assert!(error.to_string().contains("key must be a string"));
    }

    #[tokio::test]
    async fn dropping_host_ends_source() {
        let (transport, host) = channel_pair();
        let (_sink, mut source) = transport.split();

        drop(host);
        assert_eq!(source.recv().await.unwrap(), None);
    }
}
