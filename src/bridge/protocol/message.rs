//! Message envelopes exchanged with the background host.
//!
//! Outbound: `{ "id", "kind", "payload" }`.
//! Inbound: `ready` (no id), then per request `progress*` and exactly one of
//! `success` / `error`.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{OperationRequest, ProgressUpdate, RequestId, TransferBuffer};

/// A request on its way to the background host.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub id: RequestId,
    #[serde(flatten)]
    pub request: OperationRequest,
}

/// An outbound envelope split for byte-oriented transports: the JSON body
/// plus the transferable buffers it references by index.
#[derive(Debug)]
pub struct WireFrame {
    pub body: Value,
    pub attachments: Vec<TransferBuffer>,
}

impl OutboundEnvelope {
    pub fn new(id: RequestId, request: OperationRequest) -> Self {
        Self { id, request }
    }

    /// Move the transferable buffers out and describe them in the body.
    ///
    /// Each file's `data` becomes `{"attachment": index, "length": bytes}`.
    pub fn into_wire(mut self) -> serde_json::Result<WireFrame> {
        let attachments: Vec<TransferBuffer> = self
            .request
            .buffers_mut()
            .into_iter()
            .map(std::mem::take)
            .collect();

        let mut body = serde_json::to_value(&self)?;
        if let Some(files) = body
            .pointer_mut("/payload/files")
            .and_then(Value::as_array_mut)
        {
            for (index, (file, buffer)) in files.iter_mut().zip(&attachments).enumerate() {
                file["data"] = json!({ "attachment": index, "length": buffer.len() });
            }
        }

        Ok(WireFrame { body, attachments })
    }

    /// Rebuild an envelope from a frame body and its attachments (host side).
    pub fn from_wire(body: Value, attachments: Vec<Vec<u8>>) -> serde_json::Result<Self> {
        let mut envelope: OutboundEnvelope = serde_json::from_value(body)?;
        let mut slots = envelope.request.buffers_mut();
        if slots.len() != attachments.len() {
            return Err(serde_json::Error::custom(format!(
                "expected {} attachments, got {}",
                slots.len(),
                attachments.len()
            )));
        }
        for (slot, bytes) in slots.iter_mut().zip(attachments) {
            **slot = TransferBuffer::from(bytes);
        }
        Ok(envelope)
    }
}

/// Error details carried by an `error` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// A message from the background host, decoded at the channel boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InboundMessage {
    /// One-time startup finished. Valid once per host lifetime.
    Ready {
        #[serde(default)]
        payload: Value,
    },
    /// Intermediate progress for a pending request.
    Progress { id: RequestId, payload: ProgressUpdate },
    /// Terminal: the request succeeded.
    Success {
        id: RequestId,
        #[serde(default)]
        payload: Value,
    },
    /// Terminal: the request failed.
    Error { id: RequestId, error: ErrorBody },
}

impl InboundMessage {
    pub fn ready() -> Self {
        InboundMessage::Ready {
            payload: Value::Null,
        }
    }

    pub fn progress(id: RequestId, payload: ProgressUpdate) -> Self {
        InboundMessage::Progress { id, payload }
    }

    pub fn success(id: RequestId, payload: Value) -> Self {
        InboundMessage::Success { id, payload }
    }

    pub fn error(id: RequestId, message: impl Into<String>) -> Self {
        InboundMessage::Error {
            id,
            error: ErrorBody {
                message: message.into(),
            },
        }
    }

    /// Decode a raw message. Fails on unknown kinds and wrong shapes.
    pub fn from_json(message: Value) -> serde_json::Result<Self> {
        serde_json::from_value(message)
    }

    /// Correlation id, `None` for `ready`.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            InboundMessage::Ready { .. } => None,
            InboundMessage::Progress { id, .. }
            | InboundMessage::Success { id, .. }
            | InboundMessage::Error { id, .. } => Some(id),
        }
    }

    /// Whether this message ends its request's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InboundMessage::Success { .. } | InboundMessage::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{AnalyzeFilesParams, FileEntry};

    fn analyze_envelope() -> OutboundEnvelope {
        OutboundEnvelope::new(
            RequestId::new("s-1"),
            OperationRequest::AnalyzeFiles(AnalyzeFilesParams {
                files: vec![
                    FileEntry::new("a.dcm", vec![1, 2, 3]),
                    FileEntry::new("b.dcm", vec![4]),
                ],
            }),
        )
    }

    #[test]
    fn outbound_envelope_flattens_operation() {
        let envelope = OutboundEnvelope::new(RequestId::new("s-7"), OperationRequest::ClearCache);
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"id": "s-7", "kind": "clearCache"})
        );
    }

    #[test]
    fn outbound_envelope_decodes_flattened_operation() {
        let envelope: OutboundEnvelope =
            serde_json::from_value(json!({"id": "s-1", "kind": "initialize"})).unwrap();
        assert_eq!(envelope.request, OperationRequest::Initialize);
        assert_eq!(envelope.id.as_str(), "s-1");
    }

    #[test]
    fn into_wire_moves_buffers_into_attachments() {
        let frame = analyze_envelope().into_wire().unwrap();

        assert_eq!(frame.attachments.len(), 2);
        assert_eq!(frame.attachments[0].as_slice(), &[1, 2, 3]);
        assert_eq!(
            frame.body["payload"]["files"][0]["data"],
            json!({"attachment": 0, "length": 3})
        );
        assert_eq!(
            frame.body["payload"]["files"][1]["data"],
            json!({"attachment": 1, "length": 1})
        );
    }

    #[test]
    fn from_wire_reattaches_buffers() {
        let frame = analyze_envelope().into_wire().unwrap();
        let attachments = frame
            .attachments
            .into_iter()
            .map(TransferBuffer::into_vec)
            .collect();

        let envelope = OutboundEnvelope::from_wire(frame.body, attachments).unwrap();
        assert_eq!(envelope, analyze_envelope());
    }

    #[test]
    fn from_wire_rejects_attachment_count_mismatch() {
        let frame = analyze_envelope().into_wire().unwrap();
        let result = OutboundEnvelope::from_wire(frame.body, vec![vec![1, 2, 3]]);
        assert!(result.is_err());
    }

    #[test]
    fn inbound_ready_decodes_without_payload() {
        let message = InboundMessage::from_json(json!({"kind": "ready"})).unwrap();
        assert_eq!(message, InboundMessage::ready());
        assert_eq!(message.id(), None);
    }

    #[test]
    fn inbound_error_decodes_message() {
        let message = InboundMessage::from_json(json!({
            "id": "s-3",
            "kind": "error",
            "error": {"message": "No DICOM files found"}
        }))
        .unwrap();

        assert!(message.is_terminal());
        assert_eq!(
            message,
            InboundMessage::error(RequestId::new("s-3"), "No DICOM files found")
        );
    }

    #[test]
    fn inbound_rejects_wrong_shapes() {
        // unknown kind
        assert!(InboundMessage::from_json(json!({"kind": "bogus", "id": "x"})).is_err());
        // progress without id
        assert!(
            InboundMessage::from_json(json!({"kind": "progress", "payload": {"percentage": 1}}))
                .is_err()
        );
        // error without message
        assert!(
            InboundMessage::from_json(json!({"kind": "error", "id": "x", "error": {}})).is_err()
        );
        // not an object
        assert!(InboundMessage::from_json(json!("ready")).is_err());
    }

    #[test]
    fn progress_is_not_terminal() {
        let message = InboundMessage::progress(RequestId::new("s-1"), ProgressUpdate::new(5.0));
        assert!(!message.is_terminal());
        assert_eq!(message.id(), Some(&RequestId::new("s-1")));
    }
}
