//! Harness for the background side of the bridge.
//!
//! A [`HostRuntime`] owns the embedded interpreter and whatever it caches.
//! The harness runs it on a dedicated OS thread and speaks the channel
//! contract for it: `ready` once after the first successful startup, then
//! per request any number of `progress` messages followed by exactly one
//! `success` or `error`.
//!
//! [`serve_stdio`] puts the same thread behind the stdio frame codec so the
//! runtime can live in a separate process.

use std::io;
use std::thread::JoinHandle;

use log::{debug, warn};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite};

use super::protocol::{
    InboundMessage, OperationRequest, OutboundEnvelope, ProgressUpdate, RequestId,
};
use super::transport::{
    ChannelTransport, HostEndpoint, HostSendError, MessageSink, MessageSource, Transport,
    channel_pair, read_frame, write_frame,
};

/// The runtime a host executes requests against.
///
/// Methods run on the host thread and may block for as long as they need.
/// Errors are plain messages; they reach the caller as
/// `BridgeError::Operation` (or `InitializationFailed` for `startup`).
pub trait HostRuntime: Send + 'static {
    /// One-time startup, run for the first `initialize` request. The
    /// returned value becomes the `ready` payload.
    ///
    /// After a failure the next `initialize` calls it again.
    fn startup(&mut self) -> Result<Value, String>;

    /// Run one operation. Never called with `Initialize` or `ClearCache`.
    fn handle(
        &mut self,
        request: OperationRequest,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<Value, String>;

    /// Drop anything cached between calls.
    fn clear_cache(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Sends `progress` messages for the request being handled.
pub struct ProgressReporter<'a> {
    id: &'a RequestId,
    endpoint: &'a HostEndpoint,
}

impl ProgressReporter<'_> {
    pub fn report(&mut self, update: ProgressUpdate) {
        // A closed bridge is noticed by the receive loop
        let _ = self
            .endpoint
            .send(InboundMessage::progress(self.id.clone(), update));
    }
}

/// Serve requests from `endpoint` until the bridge closes its side.
///
/// Blocks the calling thread.
pub fn run_host<R: HostRuntime>(mut runtime: R, mut endpoint: HostEndpoint) {
    let mut started = false;

    while let Some(OutboundEnvelope { id, request }) = endpoint.blocking_recv() {
        debug!(target: "workbridge::host", "Handling {} ({})", id, request.name());

        let outcome = match request {
            OperationRequest::Initialize if started => Ok(Value::Null),
            OperationRequest::Initialize => runtime.startup().map(|payload| {
                started = true;
                let _ = endpoint.send(InboundMessage::Ready {
                    payload: payload.clone(),
                });
                payload
            }),
            OperationRequest::ClearCache => runtime.clear_cache().map(|()| Value::Null),
            request => {
                let mut reporter = ProgressReporter {
                    id: &id,
                    endpoint: &endpoint,
                };
                runtime.handle(request, &mut reporter)
            }
        };

        let message = match outcome {
            Ok(payload) => InboundMessage::success(id.clone(), payload),
            Err(message) => {
                warn!(target: "workbridge::host", "Request {} failed: {}", id, message);
                InboundMessage::error(id.clone(), message)
            }
        };
        match endpoint.send(message) {
            Ok(()) => {}
            Err(HostSendError::Closed) => break,
            Err(e) => {
                warn!(target: "workbridge::host", "Reply to {} not sent: {}", id, e);
                if endpoint.send(InboundMessage::error(id, e.to_string())).is_err() {
                    break;
                }
            }
        }
    }

    debug!(target: "workbridge::host", "Bridge closed, host loop exiting");
}

/// Run `runtime` on its own thread behind an in-process channel.
pub fn spawn_host_thread<R: HostRuntime>(
    runtime: R,
) -> io::Result<(ChannelTransport, JoinHandle<()>)> {
    let (transport, endpoint) = channel_pair();
    let handle = std::thread::Builder::new()
        .name("workbridge-host".to_string())
        .spawn(move || run_host(runtime, endpoint))?;
    Ok((transport, handle))
}

/// Serve `runtime` over framed stdio: requests are read from `reader`,
/// replies written to `writer`.
///
/// Returns when the bridge closes `reader` or the runtime thread exits.
pub async fn serve_stdio<R, In, Out>(runtime: R, mut reader: In, mut writer: Out) -> io::Result<()>
where
    R: HostRuntime,
    In: AsyncBufRead + Unpin + Send + 'static,
    Out: AsyncWrite + Unpin,
{
    let (transport, host_thread) = spawn_host_thread(runtime)?;
    let (mut sink, mut source) = transport.split();

    // Requests are pumped on their own task: a frame read must never be
    // interrupted halfway by an outgoing reply
    let inbound = tokio::spawn(async move {
        while let Some(frame) = read_frame(&mut reader).await? {
            let envelope = OutboundEnvelope::from_wire(frame.body, frame.attachments)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            sink.send(envelope).await?;
        }
        sink.close().await
    });

    while let Some(message) = source.recv().await? {
        write_frame(&mut writer, &message, &[]).await?;
    }

    if !inbound.is_finished() {
        inbound.abort();
    }
    let pumped = match inbound.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(io::Error::other(e)),
    };

    tokio::task::spawn_blocking(move || host_thread.join())
        .await
        .map_err(io::Error::other)?
        .map_err(|_| io::Error::other("host runtime panicked"))?;

    pumped
}

/// Reference runtime that echoes every request payload back.
///
/// File entries come back with a `length` field holding the byte count
/// received, and one progress message is sent per file.
#[derive(Debug, Default)]
pub struct EchoRuntime {
    handled: usize,
}

impl HostRuntime for EchoRuntime {
    fn startup(&mut self) -> Result<Value, String> {
        Ok(serde_json::json!({ "runtime": "echo" }))
    }

    fn handle(
        &mut self,
        mut request: OperationRequest,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<Value, String> {
        self.handled += 1;

        let lengths: Vec<usize> = request.buffers_mut().iter().map(|b| b.len()).collect();
        let total = lengths.len();
        for done in 1..=total {
            progress.report(
                ProgressUpdate::new(done as f64 / total as f64 * 100.0)
                    .with_message(format!("Processed file {} of {}", done, total)),
            );
        }

        let mut body = serde_json::to_value(&request).map_err(|e| e.to_string())?;
        let mut payload = body
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or(Value::Null);
        if let Some(files) = payload.get_mut("files").and_then(Value::as_array_mut) {
            for (file, length) in files.iter_mut().zip(lengths) {
                if let Some(file) = file.as_object_mut() {
                    file.insert("length".to_string(), length.into());
                }
            }
        }
        Ok(payload)
    }

    fn clear_cache(&mut self) -> Result<(), String> {
        debug!(
            target: "workbridge::host",
            "Echo runtime cache cleared after {} request(s)",
            self.handled
        );
        self.handled = 0;
        Ok(())
    }
}
