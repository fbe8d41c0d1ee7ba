//! Bounded sliding window of smoothed samples.
//!
//! A fixed-capacity ring: appending to a full window overwrites the oldest
//! sample. Analysis never reads the ring directly; it takes a
//! [`WindowSnapshot`], an immutable ordered copy that can be handed to the
//! analyzer, the detector, or a subscriber without the producer ever
//! mutating it afterwards.
//!
//! The window is owned by a single consumer (the pipeline), so `append` and
//! `snapshot` are serialized by `&mut`/`&` borrowing rather than a lock.

use std::ops::Deref;
use std::sync::Arc;

use crate::types::Sample;

/// Fixed-capacity ring buffer of samples.
#[derive(Debug, Clone)]
pub struct SignalWindow {
    buffer: Vec<Sample>,
    capacity: usize,
    /// Next slot to write once the buffer is full.
    head: usize,
}

impl SignalWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    /// Append a sample, overwriting the oldest one when full. O(1).
    pub fn append(&mut self, sample: Sample) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() < self.capacity {
            self.buffer.push(sample);
        } else {
            self.buffer[self.head] = sample;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Immutable copy of the current contents, oldest first.
    pub fn snapshot(&self) -> WindowSnapshot {
        let mut ordered = Vec::with_capacity(self.buffer.len());
        ordered.extend_from_slice(&self.buffer[self.head..]);
        ordered.extend_from_slice(&self.buffer[..self.head]);
        WindowSnapshot {
            samples: ordered.into(),
            capacity: self.capacity,
        }
    }

    /// Clear to empty. Capacity is kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.head = 0;
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.buffer.len() == self.capacity
    }

    /// Most recently appended sample.
    pub fn latest(&self) -> Option<&Sample> {
        if self.capacity == 0 {
            return None;
        }
        if self.buffer.len() < self.capacity {
            self.buffer.last()
        } else {
            let idx = (self.head + self.capacity - 1) % self.capacity;
            self.buffer.get(idx)
        }
    }
}

/// Immutable, ordered view of the window taken at one instant.
///
/// Cheap to clone; the samples are shared.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    samples: Arc<[Sample]>,
    capacity: usize,
}

impl WindowSnapshot {
    /// Capacity of the window the snapshot came from.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the source window was full when the snapshot was taken.
    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.samples.len() == self.capacity
    }

    /// Magnitudes only, oldest first.
    pub fn magnitudes(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.magnitude).collect()
    }
}

impl Deref for WindowSnapshot {
    type Target = [Sample];

    fn deref(&self) -> &Self::Target {
        &self.samples
    }
}
