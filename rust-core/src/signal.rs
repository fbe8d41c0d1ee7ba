//! Sample ingestion and magnitude smoothing.
//!
//! This module turns raw accelerometer vectors into the scalar samples the
//! window stores:
//! - Magnitude extraction (Euclidean norm of the gravity-compensated vector)
//! - Single-pole exponential smoothing to knock down sensor noise
//! - Rejection of non-finite readings before they can poison filter state
//! - Rejection of readings whose timestamp does not advance
//!
//! Design note: All filters use incremental updates (O(1) per sample).
//! No batch processing, no allocations in hot paths.

use crate::types::{AccelReading, Sample};

/// Single-pole exponential smoother.
///
/// s_new = α·x + (1-α)·s_old. The first value seeds the filter directly so a
/// session does not start with a ramp up from zero.
#[derive(Debug, Clone)]
pub struct MagnitudeSmoother {
    /// Smoothing coefficient. 1.0 passes input through unchanged.
    alpha: f64,
    /// Last smoothed value, `None` until the first sample.
    state: Option<f64>,
}

impl MagnitudeSmoother {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, state: None }
    }

    /// Feed one value and return the smoothed output.
    pub fn update(&mut self, value: f64) -> f64 {
        let smoothed = match self.state {
            Some(prev) => self.alpha * value + (1.0 - self.alpha) * prev,
            None => value,
        };
        self.state = Some(smoothed);
        smoothed
    }

    /// Current smoothed value, if any input has been seen.
    pub fn value(&self) -> Option<f64> {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

/// Converts raw readings into window samples.
///
/// This is the hot-path component. Must be O(1) per sample with minimal overhead.
#[derive(Debug, Clone)]
pub struct SampleIngest {
    smoother: MagnitudeSmoother,
    /// Timestamp of the last accepted reading.
    last_timestamp_ms: Option<u64>,
    /// Readings accepted this session.
    accepted: u64,
    /// Readings discarded as non-finite or out of order this session.
    rejected: u64,
}

impl SampleIngest {
    pub fn new(smoothing_factor: f64) -> Self {
        Self {
            smoother: MagnitudeSmoother::new(smoothing_factor),
            last_timestamp_ms: None,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Process one reading.
    ///
    /// Returns `None` if the magnitude is NaN or infinite, or if the timestamp is
    /// not after the previous accepted reading; the smoother state is left
    /// untouched in both cases.
    pub fn ingest(&mut self, reading: &AccelReading) -> Option<Sample> {
        // Finite axes can still overflow the squared sum
        let raw = reading.magnitude();
        if !raw.is_finite() {
            self.rejected += 1;
            return None;
        }
        if self
            .last_timestamp_ms
            .is_some_and(|last| reading.timestamp_ms <= last)
        {
            self.rejected += 1;
            return None;
        }

        let magnitude = self.smoother.update(raw);
        self.last_timestamp_ms = Some(reading.timestamp_ms);
        self.accepted += 1;
        Some(Sample::new(reading.timestamp_ms, magnitude))
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Forget all session state.
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.last_timestamp_ms = None;
        self.accepted = 0;
        self.rejected = 0;
    }
}
