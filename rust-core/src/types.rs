//! Core data types for the stroke sensing engine.
//!
//! This module defines the values that flow through the pipeline: raw
//! accelerometer readings coming in, smoothed samples in the window, and the
//! derived outputs (autocorrelation tables, stroke events, distance updates)
//! going out to the subscriber.
//!
//! Design principle: Types should make intent obvious. If a concept exists,
//! it gets a type. Output values are immutable once produced; anything handed
//! to a subscriber is either `Copy` or shared behind an `Arc`.

use std::sync::Arc;

/// A single raw accelerometer reading as delivered by the producer.
///
/// The vector is expected to be gravity-compensated already (linear
/// acceleration), so its norm is the motion signal directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelReading {
    /// Monotonic timestamp in milliseconds.
    pub timestamp_ms: u64,

    /// Linear acceleration [x, y, z] in m/s².
    pub accel: [f64; 3],
}

impl AccelReading {
    pub fn new(timestamp_ms: u64, accel: [f64; 3]) -> Self {
        Self { timestamp_ms, accel }
    }

    /// Euclidean norm of the acceleration vector in m/s².
    pub fn magnitude(&self) -> f64 {
        let x2 = self.accel[0] * self.accel[0];
        let y2 = self.accel[1] * self.accel[1];
        let z2 = self.accel[2] * self.accel[2];
        (x2 + y2 + z2).sqrt()
    }
}

/// A smoothed scalar sample stored in the signal window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Timestamp of the reading this sample was derived from.
    pub timestamp_ms: u64,
    /// Smoothed acceleration magnitude in m/s².
    pub magnitude: f64,
}

impl Sample {
    pub fn new(timestamp_ms: u64, magnitude: f64) -> Self {
        Self {
            timestamp_ms,
            magnitude,
        }
    }
}

/// One entry of an autocorrelation table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagCorrelation {
    /// Lag in samples.
    pub lag: usize,
    /// Normalized correlation at this lag, in [-1, 1].
    pub correlation: f64,
}

/// Normalized autocorrelation of one window snapshot over the configured lag band.
///
/// Entries are ordered by ascending lag and cover every lag in
/// `[min_lag, max_lag]`. A table is computed wholesale per analysis tick and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AutocorrelationTable {
    entries: Vec<LagCorrelation>,
}

impl AutocorrelationTable {
    pub fn new(entries: Vec<LagCorrelation>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[LagCorrelation] {
        &self.entries
    }

    /// Correlation values only, indexed from `min_lag()`.
    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.correlation).collect()
    }

    /// Correlation at a specific lag, if it is inside the table.
    pub fn correlation_at(&self, lag: usize) -> Option<f64> {
        let first = self.entries.first()?.lag;
        let idx = lag.checked_sub(first)?;
        self.entries.get(idx).map(|e| e.correlation)
    }

    pub fn min_lag(&self) -> Option<usize> {
        self.entries.first().map(|e| e.lag)
    }

    pub fn max_lag(&self) -> Option<usize> {
        self.entries.last().map(|e| e.lag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A discrete stroke detected by the event detector.
///
/// Only produced from the second accepted peak of a session onward; the first
/// peak is the baseline that the first interval is measured from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeEvent {
    /// Timestamp of the accepted peak in milliseconds.
    pub timestamp_ms: u64,
    /// Instantaneous rate from the previous accepted peak, strokes per minute.
    pub stroke_rate: f64,
    /// 1-based index within the session, strictly increasing.
    pub index: u64,
}

impl StrokeEvent {
    pub fn new(timestamp_ms: u64, stroke_rate: f64, index: u64) -> Self {
        Self {
            timestamp_ms,
            stroke_rate,
            index,
        }
    }
}

/// A position fix from the location provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    /// Fix time in milliseconds.
    pub timestamp_ms: u64,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Ground speed reported by the provider in m/s, if any.
    pub speed_mps: Option<f64>,
    /// Horizontal accuracy radius in meters (lower is better).
    pub accuracy_m: f64,
}

impl GpsFix {
    pub fn new(timestamp_ms: u64, latitude: f64, longitude: f64, accuracy_m: f64) -> Self {
        Self {
            timestamp_ms,
            latitude,
            longitude,
            speed_mps: None,
            accuracy_m,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }
}

/// Distance and speed after an accepted GPS fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceUpdate {
    /// Timestamp of the fix that produced this update.
    pub timestamp_ms: u64,
    /// Great-circle distance since the previous accepted fix, meters.
    pub delta_m: f64,
    /// Cumulative session distance, meters.
    pub total_distance_m: f64,
    /// Current speed estimate, m/s.
    pub speed_mps: f64,
}

/// A derived output of the pipeline, in the order it was produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    /// Smoothed magnitude of a freshly ingested reading.
    AccelerationReading(Sample),
    /// Full diagnostic table of a successful analysis tick.
    AutocorrelationTable(Arc<AutocorrelationTable>),
    /// Rate estimate of a successful analysis tick, strokes per minute.
    StrokeRate(f64),
    /// A detected stroke.
    Stroke(StrokeEvent),
    /// Distance/speed after an accepted GPS fix.
    Distance(DistanceUpdate),
}

impl EngineOutput {
    /// Whether this output may be dropped under dispatch backpressure.
    ///
    /// Acceleration readings and autocorrelation tables are superseded by the
    /// next one; rates, strokes and distances are not.
    pub fn is_lossy(&self) -> bool {
        matches!(
            self,
            EngineOutput::AccelerationReading(_) | EngineOutput::AutocorrelationTable(_)
        )
    }
}

/// Recording state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not recording; inputs are ignored.
    #[default]
    Idle,
    /// Recording; inputs are processed and outputs published.
    Recording,
}

/// Readable summary of the current (or last) session.
///
/// Stays readable after `stop()` until the next `start()` resets it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionMetrics {
    /// Current state.
    pub state: SessionState,
    /// Session start time in milliseconds, if a session was ever started.
    pub started_at_ms: Option<u64>,
    /// Number of stroke events emitted this session.
    pub stroke_count: u64,
    /// Cumulative GPS distance in meters.
    pub distance_m: f64,
    /// Last published periodicity rate, strokes per minute.
    pub stroke_rate: Option<f64>,
    /// Last known speed in m/s.
    pub speed_mps: Option<f64>,
}
