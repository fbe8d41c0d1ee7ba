//! Engine configuration.
//!
//! All thresholds are configurable; the defaults are tuned for a phone
//! strapped to a rowing shell, sampling linear acceleration at 50Hz.
//! Configuration is loaded from TOML, every field optional:
//!
//! ```toml
//! sampling_rate_hz = 50.0
//! window_seconds = 4.0
//! min_stroke_rate = 15.0
//! max_stroke_rate = 50.0
//! ```
//!
//! Validation is deferred to session start so a bad config is rejected
//! before any sample is processed, never mid-stream.

use std::ops::RangeInclusive;
use std::path::Path;

use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

/// Configuration for the whole stroke sensing engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Nominal accelerometer sample rate (Hz).
    /// Used to size the window and to convert lags to rates.
    pub sampling_rate_hz: f64,

    /// Length of the analysis window in seconds.
    /// Window capacity = sampling_rate_hz × window_seconds.
    pub window_seconds: f64,

    /// Slowest plausible stroke rate, strokes per minute. Sets the largest lag.
    pub min_stroke_rate: f64,

    /// Fastest plausible stroke rate, strokes per minute. Sets the smallest lag
    /// and the refractory period between accepted peaks.
    pub max_stroke_rate: f64,

    /// Single-pole smoothing coefficient applied to the magnitude.
    /// Range: (0.0, 1.0]. 1.0 disables smoothing.
    pub smoothing_factor: f64,

    /// Peak threshold as a multiple of the window standard deviation above the mean.
    pub peak_threshold_multiplier: f64,

    /// Minimum autocorrelation peak for a rate estimate to be published.
    pub min_correlation_confidence: f64,

    /// Worst acceptable GPS accuracy radius in meters; worse fixes are dropped.
    pub gps_accuracy_threshold_m: f64,

    /// Whether positioning is consumed at all.
    pub gps_enabled: bool,

    /// Run an analysis tick every N ingested samples once the window is full.
    pub analysis_interval_samples: usize,

    /// Minimum overlap, as a fraction of window capacity, for a lag to be scored.
    /// Lags with less overlap report zero correlation.
    pub min_overlap_fraction: f64,

    /// Bounded queue between accelerometer producer and worker.
    pub ingest_queue_capacity: usize,

    /// Bounded queue between GPS producer and worker.
    pub gps_queue_capacity: usize,

    /// Backlog above which lossy outputs are dropped instead of dispatched.
    pub dispatch_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 50.0,
            window_seconds: 4.0,
            min_stroke_rate: 15.0,
            max_stroke_rate: 50.0,
            smoothing_factor: 0.5,
            peak_threshold_multiplier: 1.5,
            min_correlation_confidence: 0.3,
            gps_accuracy_threshold_m: 25.0,
            gps_enabled: true,
            analysis_interval_samples: 10, // 5 ticks per second at 50Hz
            min_overlap_fraction: 0.25,
            ingest_queue_capacity: 512,
            gps_queue_capacity: 64,
            dispatch_queue_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML text. Missing fields take defaults.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Number of samples held by the signal window.
    pub fn window_capacity(&self) -> usize {
        let capacity = (self.sampling_rate_hz * self.window_seconds).round();
        if capacity.is_finite() && capacity > 0.0 {
            capacity as usize
        } else {
            0
        }
    }

    /// Lag band in samples derived from the stroke rate band.
    ///
    /// lag = 60 × sampling_rate_hz / rate, so the fastest rate gives the
    /// smallest lag.
    pub fn lag_range(&self) -> RangeInclusive<usize> {
        let samples_per_minute = 60.0 * self.sampling_rate_hz;
        let min_lag = (samples_per_minute / self.max_stroke_rate).ceil().max(1.0) as usize;
        let max_lag = (samples_per_minute / self.min_stroke_rate).floor().max(1.0) as usize;
        min_lag..=max_lag
    }

    /// Minimum time between accepted stroke peaks, in milliseconds.
    pub fn refractory_ms(&self) -> u64 {
        (60_000.0 / self.max_stroke_rate).round() as u64
    }

    /// Minimum number of overlapping samples for a lag to be scored.
    pub fn min_overlap_samples(&self) -> usize {
        ((self.window_capacity() as f64 * self.min_overlap_fraction).ceil() as usize).max(2)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        fn positive(name: &str, value: f64) -> EngineResult<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig(format!(
                    "{name} must be a positive finite number, got {value}"
                )))
            }
        }

        positive("sampling_rate_hz", self.sampling_rate_hz)?;
        positive("window_seconds", self.window_seconds)?;
        positive("min_stroke_rate", self.min_stroke_rate)?;
        positive("max_stroke_rate", self.max_stroke_rate)?;
        positive("gps_accuracy_threshold_m", self.gps_accuracy_threshold_m)?;

        if self.min_stroke_rate >= self.max_stroke_rate {
            return Err(EngineError::InvalidConfig(format!(
                "min_stroke_rate ({}) must be below max_stroke_rate ({})",
                self.min_stroke_rate, self.max_stroke_rate
            )));
        }

        if !(self.smoothing_factor > 0.0 && self.smoothing_factor <= 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "smoothing_factor must be in (0, 1], got {}",
                self.smoothing_factor
            )));
        }

        if !(self.peak_threshold_multiplier.is_finite() && self.peak_threshold_multiplier >= 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "peak_threshold_multiplier must be finite and non-negative, got {}",
                self.peak_threshold_multiplier
            )));
        }

        if !(0.0..=1.0).contains(&self.min_correlation_confidence) {
            return Err(EngineError::InvalidConfig(format!(
                "min_correlation_confidence must be in [0, 1], got {}",
                self.min_correlation_confidence
            )));
        }

        if !(self.min_overlap_fraction > 0.0 && self.min_overlap_fraction <= 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "min_overlap_fraction must be in (0, 1], got {}",
                self.min_overlap_fraction
            )));
        }

        if self.window_capacity() < 3 {
            return Err(EngineError::InvalidConfig(format!(
                "window holds {} samples; at least 3 are needed",
                self.window_capacity()
            )));
        }

        let lags = self.lag_range();
        if lags.start() > lags.end() {
            return Err(EngineError::InvalidConfig(format!(
                "stroke rate band {}..{} maps to an empty lag range at {} Hz",
                self.min_stroke_rate, self.max_stroke_rate, self.sampling_rate_hz
            )));
        }

        if self.analysis_interval_samples == 0 {
            return Err(EngineError::InvalidConfig(
                "analysis_interval_samples must be at least 1".into(),
            ));
        }

        // Consecutive snapshots must overlap so every sample gets examined for peaks
        let max_interval = self.window_capacity() - 2;
        if self.analysis_interval_samples > max_interval {
            return Err(EngineError::InvalidConfig(format!(
                "analysis_interval_samples {} exceeds {} for a {}-sample window",
                self.analysis_interval_samples,
                max_interval,
                self.window_capacity()
            )));
        }

        if self.ingest_queue_capacity == 0
            || self.gps_queue_capacity == 0
            || self.dispatch_queue_capacity == 0
        {
            return Err(EngineError::InvalidConfig(
                "queue capacities must be at least 1".into(),
            ));
        }

        Ok(())
    }
}
