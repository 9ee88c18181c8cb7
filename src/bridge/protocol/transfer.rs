//! Transferable binary buffers.

use std::fmt;

/// A binary payload whose ownership moves to the background host.
///
/// Building one consumes the caller's `Vec<u8>`; putting it in a request
/// consumes the buffer itself. After dispatch the sender holds no handle to
/// the allocation, and the in-process transport hands the same allocation
/// to the host without copying.
#[derive(Default, PartialEq, Eq)]
pub struct TransferBuffer {
    bytes: Vec<u8>,
}

impl TransferBuffer {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Give the allocation back, e.g. to the host runtime that received it.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for TransferBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl AsRef<[u8]> for TransferBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

// Payloads can be hundreds of megabytes of DICOM data; never dump them.
impl fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("len", &self.bytes.len())
            .finish()
    }
}
