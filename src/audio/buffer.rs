//! Bounded recent-history buffer for captured samples.
//!
//! [`RingBuffer`] keeps at most `capacity` samples.  Every
//! [`append`](RingBuffer::append) adds a chunk at the tail and, when the
//! result would exceed the cap, drops the oldest samples in the same call, so
//! the contents are always the suffix of everything ever appended.
//!
//! The capture thread is the only writer.  Readers go through
//! [`SharedRingBuffer`] and take a [`snapshot`](RingBuffer::snapshot), which is
//! a copy made under the lock: a reader sees the state before or after an
//! append, never half of one.
//!
//! # Example
//!
//! ```rust
//! use diy_ecg::audio::RingBuffer;
//!
//! let mut buf = RingBuffer::new(4);
//! buf.append(&[1_i16, 2, 3, 4, 5]); // 5 items → capacity 4 → oldest dropped
//! assert_eq!(buf.snapshot(), vec![2, 3, 4, 5]);
//! assert_eq!(buf.first_sample_index(), 1);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// A fixed-capacity circular buffer.
///
/// Generic over `T: Copy + Default`; the capture pipeline stores `i16`.
///
/// ## Overflow behaviour
///
/// When [`append`](Self::append) would exceed `capacity`, exactly
/// `len - capacity` of the oldest samples are discarded.  The buffer never
/// allocates beyond its initial capacity.
#[derive(Debug)]
pub struct RingBuffer<T> {
    buf: Vec<T>,
    capacity: usize,
    /// Index of the *next* write position (wraps around `capacity`).
    write_pos: usize,
    /// Number of valid samples currently stored (≤ `capacity`).
    len: usize,
    /// Samples appended since construction, including trimmed ones.
    total_appended: u64,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a new ring buffer with the given `capacity`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            buf: vec![T::default(); capacity],
            capacity,
            write_pos: 0,
            len: 0,
            total_appended: 0,
        }
    }

    /// Append `data` at the tail, trimming the head if the cap is exceeded.
    ///
    /// Returns the number of samples dropped from the head.
    pub fn append(&mut self, data: &[T]) -> usize {
        let trimmed = (self.len + data.len()).saturating_sub(self.capacity);
        self.total_appended += data.len() as u64;

        // Anything older than the last `capacity` items would be overwritten
        // anyway.
        let tail = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };

        for &item in tail {
            self.buf[self.write_pos] = item;
            self.write_pos = (self.write_pos + 1) % self.capacity;
        }
        self.len = (self.len + tail.len()).min(self.capacity);

        trimmed
    }

    /// Copy the stored samples in arrival order (oldest first).
    ///
    /// The buffer is left untouched.
    pub fn snapshot(&self) -> Vec<T> {
        if self.len == 0 {
            return Vec::new();
        }

        // While the buffer has never wrapped, valid data starts at 0.  Once
        // full, the oldest sample sits at `write_pos`.
        let read_pos = if self.len < self.capacity {
            0
        } else {
            self.write_pos
        };

        let mut result = Vec::with_capacity(self.len);
        if read_pos + self.len <= self.capacity {
            result.extend_from_slice(&self.buf[read_pos..read_pos + self.len]);
        } else {
            result.extend_from_slice(&self.buf[read_pos..]);
            result.extend_from_slice(&self.buf[..self.write_pos]);
        }
        result
    }

    /// Number of valid samples currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when the buffer contains no samples.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of samples the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` once the cap has been reached; every further append
    /// trims the head.
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Samples appended since construction, trimmed ones included.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    /// Stream position of the oldest retained sample.
    pub fn first_sample_index(&self) -> u64 {
        self.total_appended - self.len as u64
    }

    /// Duration of the retained history in seconds, assuming mono at
    /// `sample_rate` Hz.
    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.len as f64 / sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// SharedRingBuffer
// ---------------------------------------------------------------------------

/// Ring buffer shared between the capture thread (writer) and consumers.
///
/// Lock for the duration of one `append` or one `snapshot` only.
pub type SharedRingBuffer = Arc<Mutex<RingBuffer<i16>>>;

/// Construct an empty [`SharedRingBuffer`] holding at most `capacity` samples.
pub fn new_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(Mutex::new(RingBuffer::new(capacity)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
