//! Message-passing bridge to a background host.
//!
//! A [`Bridge`] lets any number of callers issue long-running operations to
//! one isolated host (a thread or a child process running an embedded
//! interpreter) over a single bidirectional channel. Each call is correlated
//! by its RequestId and settles exactly once, with progress delivered to an
//! optional sink along the way.
//!
//! # Architecture
//!
//! ```text
//! Bridge::request
//!   -> InitGate (single-flight startup)
//!   -> PendingRegistry::register
//!   -> writer task -> Transport -> host
//!                     Transport <- host
//!   <- reader task <- ResponseRouter -> PendingRegistry::settle
//! ```
//!
//! # Module Structure
//!
//! - `protocol` - ids, envelopes, operations and transfer buffers
//! - `transport` - in-process channel and child-process (stdio) transports
//! - `actor` - pending registry, response router, reader and writer tasks
//! - `init_gate` - single-flight host startup
//! - `lifecycle` - bridge state machine
//! - `dispatcher` - the public `Bridge` type
//! - `host` - harness for running a runtime on the background side

mod actor;
mod dispatcher;
pub mod host;
mod init_gate;
mod lifecycle;
pub mod protocol;
pub mod transport;

pub use dispatcher::Bridge;
pub use host::{EchoRuntime, HostRuntime, ProgressReporter, serve_stdio, spawn_host_thread};
pub use lifecycle::BridgeState;
pub use protocol::{
    AcquisitionMapping, AnalysisResult, ComplianceReport, ComplianceResult, FileEntry,
    GenerateTemplateParams, MapAcquisitionsParams, OperationRequest, ProgressSink,
    ProgressUpdate, ReferenceSource, Template, TransferBuffer, ValidateComplianceParams,
};
pub use transport::{ChannelTransport, HostEndpoint, ProcessTransport, channel_pair};
