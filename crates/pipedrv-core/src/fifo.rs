//! Fixed-capacity byte FIFO backing the device node.
//!
//! Data is always stored left-aligned: there is no head pointer, only a fill
//! cursor counting valid bytes from index 0. Reads that leave data behind shift
//! the remainder down to index 0 and zero the vacated tail.

/// Capacity of the device buffer in bytes.
pub const BUF_SIZE: usize = 1024;

/// Bounded byte FIFO with an append cursor and compaction on read.
///
/// Not synchronized; callers sharing it across threads wrap it in a mutex.
pub struct ByteFifo {
    data: Box<[u8]>,
    fill: usize,
}

impl ByteFifo {
    /// Creates an empty FIFO with the device capacity.
    pub fn new() -> Self {
        Self::with_capacity(BUF_SIZE)
    }

    /// Creates an empty FIFO with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        tracing::debug!("Initializing byte fifo: capacity={}", capacity);
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            fill: 0,
        }
    }

    /// Appends as much of `bytes` as fits and returns the accepted length.
    ///
    /// When `bytes` is longer than the remaining room, only the room is copied
    /// and the buffer becomes full (a short write).
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }

        let room = self.remaining();
        let accepted = bytes.len().min(room);
        self.data[self.fill..self.fill + accepted].copy_from_slice(&bytes[..accepted]);
        self.fill += accepted;

        if accepted < bytes.len() {
            tracing::debug!(
                "Short write: requested={}, accepted={}, fill={}",
                bytes.len(),
                accepted,
                self.fill
            );
        }

        accepted
    }

    /// Moves up to `out.len()` of the oldest bytes into `out`, returning the count.
    ///
    /// Requesting more than is buffered drains everything (a short read).
    pub fn extract_into(&mut self, out: &mut [u8]) -> usize {
        let requested = out.len();
        if requested == 0 {
            return 0;
        }

        if self.fill < requested {
            let taken = self.fill;
            out[..taken].copy_from_slice(&self.data[..taken]);
            self.fill = 0;
            tracing::debug!("Short read: requested={}, returned={}", requested, taken);
            return taken;
        }

        out.copy_from_slice(&self.data[..requested]);
        let rest = self.fill - requested;
        self.data.copy_within(requested..self.fill, 0);
        self.data[rest..].fill(0);
        self.fill = rest;
        requested
    }

    /// Extracts up to `requested` bytes into a freshly allocated vector.
    pub fn extract(&mut self, requested: usize) -> Vec<u8> {
        if requested > self.fill {
            tracing::debug!("Short read: requested={}, returned={}", requested, self.fill);
        }
        // Sized to what is available, so the drain case goes through the exact path.
        let mut out = vec![0u8; requested.min(self.fill)];
        let n = self.extract_into(&mut out);
        out.truncate(n);
        out
    }

    /// Number of valid bytes currently buffered.
    pub fn len(&self) -> usize {
        self.fill
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    /// Whether appends will accept nothing.
    pub fn is_full(&self) -> bool {
        self.fill == self.data.len()
    }

    /// Total storage in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Free space left before appends start truncating.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.fill
    }

    /// The valid pending bytes, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.fill]
    }

    /// Drops all pending data and zeroes the storage.
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.fill = 0;
    }
}

impl Default for ByteFifo {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ByteFifo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteFifo")
            .field("capacity", &self.data.len())
            .field("fill", &self.fill)
            .finish()
    }
}
