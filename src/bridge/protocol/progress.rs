//! Progress notices and the sink callers receive them through.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Payload of a `progress` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Completion in the range 0..=100.
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_operation: Option<String>,
}

impl ProgressUpdate {
    pub fn new(percentage: f64) -> Self {
        Self {
            percentage,
            message: None,
            current_operation: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Caller-supplied progress callback.
///
/// Invoked synchronously on the reader task for every progress message of
/// the request it was registered with. It must return quickly: while it
/// runs, no other inbound message is routed.
#[derive(Clone)]
pub struct ProgressSink(Arc<dyn Fn(ProgressUpdate) + Send + Sync>);

impl ProgressSink {
    pub fn new(f: impl Fn(ProgressUpdate) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub(crate) fn report(&self, update: ProgressUpdate) {
        (self.0)(update)
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressSink(..)")
    }
}
