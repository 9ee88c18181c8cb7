//! Wire protocol types for bridge communication.
//!
//! This module provides the typed messages exchanged with the background
//! host and the decoding done at the channel boundary.
//!
//! ## Module Structure
//!
//! - `request_id` - RequestId type and the per-bridge id generator
//! - `transfer` - TransferBuffer, binary payloads whose ownership moves to the host
//! - `operation` - OperationRequest, the closed set of operations and their payloads
//! - `message` - OutboundEnvelope / InboundMessage envelopes
//! - `progress` - ProgressUpdate and the caller-supplied ProgressSink

mod message;
mod operation;
mod progress;
mod request_id;
mod transfer;

pub use message::{ErrorBody, InboundMessage, OutboundEnvelope, WireFrame};
pub use operation::{
    AcquisitionMapping, AnalysisResult, AnalyzeFilesParams, ComplianceReport, ComplianceResult,
    FileEntry, GenerateTemplateParams, MapAcquisitionsParams, OperationRequest, ReferenceSource,
    Template, ValidateComplianceParams,
};
pub use progress::{ProgressSink, ProgressUpdate};
pub use request_id::RequestId;
pub(crate) use request_id::RequestIdGenerator;
pub use transfer::TransferBuffer;
