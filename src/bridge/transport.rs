//! Channel transports between the bridge and its background host.
//!
//! A transport is one bidirectional, message-oriented pipe to one background
//! execution unit. It preserves send order in each direction and has no
//! notion of requests or responses; correlation is the router's job.
//!
//! # Implementations
//!
//! - `channel` - in-process tokio channels to a host thread (envelopes are moved)
//! - `process` - a child process speaking framed JSON over stdio
//! - `framing` - the `Content-Length` + attachments codec used by `process`

pub(crate) mod channel;
pub(crate) mod framing;
pub(crate) mod process;

use std::future::Future;
use std::io;

use serde_json::Value;

use super::protocol::OutboundEnvelope;

pub use channel::{
    ChannelSink, ChannelSource, ChannelTransport, HostEndpoint, HostSendError, channel_pair,
};
pub use framing::{Frame, RawFrame, read_frame, read_raw_frame, write_frame};
pub use process::{ProcessSink, ProcessSource, ProcessTransport};

/// Write half of a transport, owned by the writer task.
pub trait MessageSink: Send + 'static {
    /// Send one envelope. Buffers inside it are consumed.
    fn send(&mut self, envelope: OutboundEnvelope)
    -> impl Future<Output = io::Result<()>> + Send;

    /// Close the transport. The host gets no notification beyond the pipe
    /// closing.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Read half of a transport, owned by the reader task.
pub trait MessageSource: Send + 'static {
    /// Receive the next raw message. `Ok(None)` means the host side closed.
    ///
    /// Must be cancel-safe: the reader races it against shutdown.
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<Value>>> + Send;
}

/// A transport that can be split into its two halves.
pub trait Transport: Send + 'static {
    type Sink: MessageSink;
    type Source: MessageSource;

    fn split(self) -> (Self::Sink, Self::Source);
}
