//! Bounded scrollback buffer for recent PTY output.
//!
//! One [`ScrollbackBuffer`] exists per session relay. It keeps the last
//! `max_size` bytes of output so that late-attaching viewers can be caught up
//! before live streaming begins. The buffer is byte-oriented — it has no
//! notion of lines or records.

use std::sync::Mutex;

/// Default cap: 1 MiB per session.
pub const DEFAULT_SCROLLBACK_SIZE: usize = 1024 * 1024;

/// Thread-safe byte window holding the most recent terminal output.
pub struct ScrollbackBuffer {
    buf: Mutex<Vec<u8>>,
    max_size: usize,
}

impl ScrollbackBuffer {
    /// Create a buffer capped at `max_size` bytes. A cap of 0 falls back to
    /// [`DEFAULT_SCROLLBACK_SIZE`].
    pub fn new(max_size: usize) -> Self {
        let max_size = if max_size == 0 {
            DEFAULT_SCROLLBACK_SIZE
        } else {
            max_size
        };
        Self {
            buf: Mutex::new(Vec::with_capacity(max_size.min(64 * 1024))),
            max_size,
        }
    }

    /// Append `data`, discarding the oldest bytes so the total stays within
    /// the cap. Empty writes are no-ops.
    pub fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut buf = self.buf.lock().expect("scrollback lock poisoned");
        buf.extend_from_slice(data);
        if buf.len() > self.max_size {
            let excess = buf.len() - self.max_size;
            buf.drain(..excess);
        }
    }

    /// Return an independent copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.lock().expect("scrollback lock poisoned").clone()
    }

    /// Current length in bytes.
    pub fn len(&self) -> usize {
        self.buf.lock().expect("scrollback lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
