//! Single-slot store for the most recently received packet.

use crate::transceiver::RxInfo;

/// Capacity of the receive slot in bytes.
pub const RX_BUFFER_CAPACITY: usize = 64;

/// Last received packet plus its bookkeeping.
///
/// A new packet replaces the old one entirely, read or not. The unread
/// flag is set by every non-empty packet and never cleared by reading.
/// An empty packet still replaces the message with zero bytes.
#[derive(Debug, Clone)]
pub struct ReceiveBuffer {
    data: [u8; RX_BUFFER_CAPACITY],
    len: usize,
    stored: bool,
    unread: bool,
    info: Option<RxInfo>,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        ReceiveBuffer {
            data: [0; RX_BUFFER_CAPACITY],
            len: 0,
            stored: false,
            unread: false,
            info: None,
        }
    }

    pub fn capacity(&self) -> usize {
        RX_BUFFER_CAPACITY
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn has_unread(&self) -> bool {
        self.unread
    }

    /// Whether the stored packet was cut to fit.
    pub fn is_truncated(&self) -> bool {
        self.info.map_or(false, |i| i.truncated())
    }

    pub fn info(&self) -> Option<RxInfo> {
        self.info
    }

    /// Stored bytes, `None` until the first packet arrived.
    pub fn message(&self) -> Option<&[u8]> {
        if self.stored {
            Some(&self.data[..self.len])
        } else {
            None
        }
    }

    /// Replace the slot contents with `bytes`, keeping at most
    /// [`RX_BUFFER_CAPACITY`] of them.
    pub fn store(&mut self, bytes: &[u8], info: Option<RxInfo>) {
        let len = bytes.len().min(RX_BUFFER_CAPACITY);
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.len = len;
        self.stored = true;
        self.unread = len > 0;
        self.info = info;
    }
}
