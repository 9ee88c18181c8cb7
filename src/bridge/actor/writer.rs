//! Writer task for outbound requests.
//!
//! Single-writer actor: every request goes through one bounded FIFO queue,
//! so the transport sees requests in dispatch order and no two sends
//! interleave.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::PendingRegistry;
use crate::bridge::protocol::OutboundEnvelope;
use crate::bridge::transport::MessageSink;
use crate::error::BridgeError;

/// Handle to a running Writer Task. Cancels the task when dropped.
pub(crate) struct WriterTaskHandle {
    _join_handle: tokio::task::JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl WriterTaskHandle {
    /// Stop writing, fail whatever is still queued and close the transport.
    pub(crate) fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for WriterTaskHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Spawn a writer task that drains `rx` into `sink`.
///
/// `rx` is bounded: dispatchers wait for a free slot before registering
/// their request, which gives callers backpressure.
pub(crate) fn spawn_writer_task<S: MessageSink>(
    sink: S,
    rx: mpsc::Receiver<OutboundEnvelope>,
    registry: Arc<PendingRegistry>,
) -> WriterTaskHandle {
    let cancel_token = CancellationToken::new();
    let token_clone = cancel_token.clone();

    let join_handle = tokio::spawn(writer_loop(sink, rx, registry, token_clone));

    WriterTaskHandle {
        _join_handle: join_handle,
        cancel_token,
    }
}

/// The main writer loop.
///
/// Exits on:
/// 1. Cancellation: fail queued requests, close the transport
/// 2. Channel closed (all senders dropped): close the transport
async fn writer_loop<S: MessageSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<OutboundEnvelope>,
    registry: Arc<PendingRegistry>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                debug!(
                    target: "workbridge::bridge::writer",
                    "Writer task cancelled, shutting down"
                );
                rx.close();
                while let Ok(envelope) = rx.try_recv() {
                    registry.settle(&envelope.id, Err(BridgeError::Terminated));
                }
                break;
            }

            envelope = rx.recv() => {
                let Some(envelope) = envelope else {
                    debug!(
                        target: "workbridge::bridge::writer",
                        "Writer channel closed"
                    );
                    break;
                };

                let id = envelope.id.clone();
                let kind = envelope.request.name();
                if let Err(e) = sink.send(envelope).await {
                    warn!(
                        target: "workbridge::bridge::writer",
                        "Write error for {} ({}): {}, failing request",
                        id,
                        kind,
                        e
                    );
                    // The reader notices the broken transport separately
                    registry.settle(&id, Err(BridgeError::transport(e.to_string())));
                } else {
                    debug!(
                        target: "workbridge::bridge::writer",
                        "Sent {} ({})",
                        id,
                        kind
                    );
                }
            }
        }
    }

    if let Err(e) = sink.close().await {
        debug!(
            target: "workbridge::bridge::writer",
            "Error closing transport: {}",
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{OperationRequest, RequestId};
    use crate::bridge::transport::{Transport, channel_pair};

    fn envelope(id: &str) -> OutboundEnvelope {
        OutboundEnvelope::new(RequestId::new(id), OperationRequest::ClearCache)
    }

    #[tokio::test]
    async fn writer_preserves_queue_order() {
        let registry = Arc::new(PendingRegistry::new());
        let (transport, mut host) = channel_pair();
        let (sink, _source) = transport.split();
        let (tx, rx) = mpsc::channel(16);
        let _handle = spawn_writer_task(sink, rx, registry);

        for n in 0..10 {
            tx.send(envelope(&format!("s-{}", n))).await.unwrap();
        }

        for n in 0..10 {
            let received = host.recv().await.unwrap();
            assert_eq!(received.id.as_str(), format!("s-{}", n));
        }
    }

    #[tokio::test]
    async fn write_failure_fails_only_that_request() {
        let registry = Arc::new(PendingRegistry::new());
        let (transport, host) = channel_pair();
        let (sink, _source) = transport.split();
        drop(host);

        let rx_a = registry.register(RequestId::new("a"), None).unwrap();
        let (tx, rx) = mpsc::channel(4);
        let _handle = spawn_writer_task(sink, rx, registry.clone());
        tx.send(envelope("a")).await.unwrap();

        let outcome = rx_a.await.unwrap();
        assert!(matches!(outcome, Err(BridgeError::Transport { .. })), "{:?}", outcome);
    }

    #[tokio::test]
    async fn dropping_senders_closes_transport() {
        let registry = Arc::new(PendingRegistry::new());
        let (transport, mut host) = channel_pair();
        let (sink, _source) = transport.split();
        let (tx, rx) = mpsc::channel(4);
        let _handle = spawn_writer_task(sink, rx, registry);

        drop(tx);
        assert!(host.recv().await.is_none(), "host sees the channel close");
    }

    #[tokio::test]
    async fn cancel_closes_transport() {
        let registry = Arc::new(PendingRegistry::new());
        let (transport, mut host) = channel_pair();
        let (sink, _source) = transport.split();
        let (_tx, rx) = mpsc::channel(4);

        let handle = spawn_writer_task(sink, rx, registry);
        handle.cancel();

        assert!(host.recv().await.is_none());
    }
}
