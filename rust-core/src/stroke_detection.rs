//! Stroke event detection.
//!
//! Implements discrete stroke timing using:
//! - Adaptive threshold: mean + k·stddev of the current window snapshot
//! - Local maximum test against the immediate neighbours
//! - Refractory period (60 / max_stroke_rate) after each accepted peak
//!
//! The detector runs on the same snapshots as the periodicity analyzer but is
//! otherwise independent of it. Consecutive snapshots overlap heavily, so the
//! detector remembers the last sample it fully examined and only looks at
//! newer ones; a peak is never reported twice.

use crate::config::EngineConfig;
use crate::types::StrokeEvent;
use crate::window::WindowSnapshot;

/// Standard deviation below which the snapshot is considered flat.
const FLAT_STDDEV: f64 = 1e-9;

/// Stroke detector with refractory debouncing.
#[derive(Debug, Clone)]
pub struct StrokeDetector {
    threshold_multiplier: f64,
    refractory_ms: u64,

    // Peak timing
    last_peak_ms: Option<u64>,

    // Timestamp of the newest sample already examined
    examined_until_ms: Option<u64>,

    // Statistics
    stroke_count: u64,
    rejected_refractory: u64,
}

impl StrokeDetector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            threshold_multiplier: config.peak_threshold_multiplier,
            refractory_ms: config.refractory_ms(),
            last_peak_ms: None,
            examined_until_ms: None,
            stroke_count: 0,
            rejected_refractory: 0,
        }
    }

    /// Scan a snapshot for new peaks and return the strokes they complete.
    ///
    /// A partial window yields nothing and examines nothing.
    pub fn detect(&mut self, snapshot: &WindowSnapshot) -> Vec<StrokeEvent> {
        let mut strokes = Vec::new();
        if !snapshot.is_full() || snapshot.len() < 3 {
            return strokes;
        }

        let (mean, std_dev) = mean_and_std(snapshot);
        let threshold = mean + self.threshold_multiplier * std_dev;
        let flat = std_dev <= FLAT_STDDEV;

        // The last sample has no right neighbour yet; it is examined next tick.
        for i in 1..snapshot.len() - 1 {
            let timestamp_ms = snapshot[i].timestamp_ms;
            if self.examined_until_ms.is_some_and(|t| timestamp_ms <= t) {
                continue;
            }
            if flat {
                continue;
            }

            let value = snapshot[i].magnitude;
            let is_peak = value > threshold
                && value > snapshot[i - 1].magnitude
                && value >= snapshot[i + 1].magnitude;
            if !is_peak {
                continue;
            }

            if let Some(event) = self.accept_peak(timestamp_ms) {
                strokes.push(event);
            }
        }

        self.examined_until_ms = Some(snapshot[snapshot.len() - 2].timestamp_ms);
        strokes
    }

    /// Total stroke events emitted since the last reset.
    pub fn stroke_count(&self) -> u64 {
        self.stroke_count
    }

    /// Timestamp of the last accepted peak (baseline included).
    pub fn last_peak_ms(&self) -> Option<u64> {
        self.last_peak_ms
    }

    /// Candidates discarded for falling inside the refractory period.
    pub fn rejected_refractory(&self) -> u64 {
        self.rejected_refractory
    }

    /// Reset all session state (call when a session starts).
    pub fn reset(&mut self) {
        self.last_peak_ms = None;
        self.examined_until_ms = None;
        self.stroke_count = 0;
        self.rejected_refractory = 0;
    }

    // =========================================================================
    // PRIVATE METHODS
    // =========================================================================

    fn accept_peak(&mut self, timestamp_ms: u64) -> Option<StrokeEvent> {
        let Some(previous_ms) = self.last_peak_ms else {
            // First peak of the session is only the baseline
            self.last_peak_ms = Some(timestamp_ms);
            return None;
        };

        if timestamp_ms <= previous_ms || timestamp_ms - previous_ms < self.refractory_ms {
            self.rejected_refractory += 1;
            tracing::trace!(
                timestamp_ms,
                previous_ms,
                refractory_ms = self.refractory_ms,
                "Peak inside refractory period discarded"
            );
            return None;
        }

        let interval_ms = timestamp_ms - previous_ms;
        let stroke_rate = 60_000.0 / interval_ms as f64;

        self.last_peak_ms = Some(timestamp_ms);
        self.stroke_count += 1;

        Some(StrokeEvent::new(timestamp_ms, stroke_rate, self.stroke_count))
    }
}

fn mean_and_std(snapshot: &WindowSnapshot) -> (f64, f64) {
    let n = snapshot.len() as f64;
    let mean = snapshot.iter().map(|s| s.magnitude).sum::<f64>() / n;
    let variance = snapshot
        .iter()
        .map(|s| (s.magnitude - mean) * (s.magnitude - mean))
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

// ============================================================================
// TESTS
// ============================================================================
