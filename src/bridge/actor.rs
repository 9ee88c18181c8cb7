//! Actor components for the bridge.
//!
//! # Components
//!
//! - `PendingRegistry`: in-flight requests keyed by RequestId
//! - `ResponseRouter`: decodes inbound messages and settles pending requests
//! - `Reader`: background task that reads from the transport and routes
//! - `Writer`: background task that writes the outbound queue to the transport

mod pending_registry;
mod reader;
mod response_router;
mod writer;

pub(crate) use pending_registry::{PendingRegistry, ResponseReceiver};
pub(crate) use reader::{ReaderTaskHandle, spawn_reader_task};
pub(crate) use response_router::ResponseRouter;
pub(crate) use writer::{WriterTaskHandle, spawn_writer_task};
