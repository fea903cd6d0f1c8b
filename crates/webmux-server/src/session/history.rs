//! Bounded scrollback for replay on reconnect.
//!
//! Keeps the most recent `capacity` bytes of a session's output so a
//! reconnecting client can be brought up to date without the server holding
//! unbounded history. Oldest bytes are dropped first.

/// Default history capacity per session (100 kB).
pub const DEFAULT_HISTORY_CAPACITY: usize = 100_000;

/// A drop-oldest byte buffer with a fixed capacity.
///
/// Storage grows lazily up to `capacity`, then behaves as a ring with
/// `head` marking the oldest byte.
#[derive(Debug)]
pub struct HistoryBuffer {
    buf: Vec<u8>,
    capacity: usize,
    head: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity,
            head: 0,
        }
    }

    /// Append output, discarding the oldest bytes once over capacity.
    pub fn append(&mut self, data: &[u8]) {
        if self.capacity == 0 || data.is_empty() {
            return;
        }

        let mut data = if data.len() >= self.capacity {
            // Only the newest `capacity` bytes can survive; restart flat.
            self.buf.clear();
            self.head = 0;
            &data[data.len() - self.capacity..]
        } else {
            data
        };

        if self.buf.len() < self.capacity {
            let take = (self.capacity - self.buf.len()).min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            if data.is_empty() {
                return;
            }
            self.head = 0;
        }

        // Buffer is full: overwrite from `head`, wrapping at most once.
        let first = (self.capacity - self.head).min(data.len());
        self.buf[self.head..self.head + first].copy_from_slice(&data[..first]);
        let rest = &data[first..];
        if rest.is_empty() {
            self.head = (self.head + first) % self.capacity;
        } else {
            self.buf[..rest.len()].copy_from_slice(rest);
            self.head = rest.len();
        }
    }

    /// The retained suffix of everything appended, in chronological order.
    pub fn snapshot(&self) -> Vec<u8> {
        if self.buf.len() < self.capacity || self.head == 0 {
            return self.buf.clone();
        }
        let mut out = Vec::with_capacity(self.buf.len());
        out.extend_from_slice(&self.buf[self.head..]);
        out.extend_from_slice(&self.buf[..self.head]);
        out
    }

    /// Number of bytes currently retained.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
