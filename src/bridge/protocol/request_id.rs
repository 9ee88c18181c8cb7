//! Request ID type for bridge communication.
//!
//! This module provides a type-safe wrapper for request IDs and the
//! generator that mints them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Correlation token for one in-flight operation.
///
/// Wraps a string so the host can echo it back verbatim. Ids minted by
/// [`RequestIdGenerator`] have the form `{session}-{seq}`, but the bridge
/// never parses them: equality is the only operation that matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Create a RequestId from an arbitrary string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Mints unique request ids for one bridge instance.
///
/// The session component is a ULID taken when the bridge is constructed
/// (millisecond timestamp plus 80 random bits), so ids stay unique across
/// bridge restarts even though the sequence restarts at 1.
pub(crate) struct RequestIdGenerator {
    session: Ulid,
    next: AtomicU64,
}

impl RequestIdGenerator {
    pub(crate) fn new() -> Self {
        Self {
            session: Ulid::new(),
            next: AtomicU64::new(1),
        }
    }

    /// Session component shared by every id from this generator.
    pub(crate) fn session(&self) -> Ulid {
        self.session
    }

    /// Return the next id in the sequence.
    pub(crate) fn next_id(&self) -> RequestId {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        RequestId(format!("{}-{}", self.session, seq))
    }
}
