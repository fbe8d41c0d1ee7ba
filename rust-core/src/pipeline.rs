/// Complete stroke sensing pipeline integrating all processing stages.
///
/// This module orchestrates the full data flow from raw accelerometer
/// readings through smoothing, windowing, periodicity analysis and stroke
/// detection, with GPS fusion running alongside, to produce the ordered
/// [`EngineOutput`] stream.
///
/// # Architecture
///
/// 1. **Ingestion**: magnitude + exponential smoothing, bad readings dropped
/// 2. **Windowing**: bounded ring of the last `window_capacity()` samples
/// 3. **Analysis tick**: every `analysis_interval_samples` once the window is
///    full, one immutable snapshot feeds both the periodicity analyzer and the
///    stroke detector
/// 4. **GPS fusion**: independent of 1-3, only while positioning is enabled
///
/// The pipeline is single-threaded and owns all session state. It is the
/// session controller: nothing is processed while Idle, and `start()` wipes
/// every session-scoped buffer and counter so a new session never observes
/// samples from the previous one.
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::gps::GpsFusion;
use crate::periodicity::{PeriodicityAnalyzer, PeriodicityOutcome, SkipReason};
use crate::signal::SampleIngest;
use crate::stroke_detection::StrokeDetector;
use crate::types::*;
use crate::window::SignalWindow;

/// Single-threaded stroke sensing engine.
#[derive(Debug)]
pub struct StrokePipeline {
    config: EngineConfig,
    /// Stages were built from an older configuration.
    stages_stale: bool,

    // Session
    state: SessionState,
    started_at_ms: Option<u64>,
    gps_enabled: bool,

    // Processing stages
    ingest: SampleIngest,
    window: SignalWindow,
    analyzer: PeriodicityAnalyzer,
    detector: StrokeDetector,
    gps: GpsFusion,

    // Tick cadence
    samples_since_tick: usize,
    ticks: u64,
    skipped_ticks: u64,
}

impl StrokePipeline {
    /// Create an idle pipeline.
    ///
    /// The configuration is validated when a session starts, not here.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            state: SessionState::Idle,
            started_at_ms: None,
            gps_enabled: config.gps_enabled,
            ingest: SampleIngest::new(config.smoothing_factor),
            window: SignalWindow::new(config.window_capacity()),
            analyzer: PeriodicityAnalyzer::new(&config),
            detector: StrokeDetector::new(&config),
            gps: GpsFusion::new(&config),
            samples_since_tick: 0,
            ticks: 0,
            skipped_ticks: 0,
            config,
            stages_stale: false,
        }
    }

    /// Begin a new recording session.
    ///
    /// Resets every stage, discarding all state of the previous session.
    /// Stages are rebuilt instead when the configuration changed since
    /// they were built.
    pub fn start(&mut self, start_ms: u64) -> EngineResult<()> {
        if self.is_recording() {
            return Err(EngineError::AlreadyRecording);
        }
        self.config.validate()?;

        if self.stages_stale {
            self.ingest = SampleIngest::new(self.config.smoothing_factor);
            self.window = SignalWindow::new(self.config.window_capacity());
            self.analyzer = PeriodicityAnalyzer::new(&self.config);
            self.detector = StrokeDetector::new(&self.config);
            self.gps = GpsFusion::new(&self.config);
            self.stages_stale = false;
        } else {
            self.ingest.reset();
            self.window.reset();
            self.analyzer.reset();
            self.detector.reset();
            self.gps.reset();
        }
        self.gps_enabled = self.config.gps_enabled;
        self.samples_since_tick = 0;
        self.ticks = 0;
        self.skipped_ticks = 0;

        self.started_at_ms = Some(start_ms);
        self.state = SessionState::Recording;

        tracing::info!(
            start_ms,
            window_capacity = self.window.capacity(),
            lag_min = *self.analyzer.lag_range().start(),
            lag_max = *self.analyzer.lag_range().end(),
            "Recording session started"
        );
        Ok(())
    }

    /// End the session. Metrics stay readable; calling this while Idle is a no-op.
    pub fn stop(&mut self) {
        if !self.is_recording() {
            return;
        }
        self.state = SessionState::Idle;

        tracing::info!(
            strokes = self.detector.stroke_count(),
            distance_m = self.gps.total_distance_m(),
            ticks = self.ticks,
            skipped_ticks = self.skipped_ticks,
            rejected_readings = self.ingest.rejected(),
            "Recording session stopped"
        );
    }

    pub fn is_recording(&self) -> bool {
        self.state == SessionState::Recording
    }

    /// Snapshot of the current (or last) session.
    pub fn metrics(&self) -> SessionMetrics {
        SessionMetrics {
            state: self.state,
            started_at_ms: self.started_at_ms,
            stroke_count: self.detector.stroke_count(),
            distance_m: self.gps.total_distance_m(),
            stroke_rate: self.analyzer.last_rate(),
            speed_mps: self.gps.speed_mps(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the configuration. Only allowed while Idle; takes effect at the
    /// next `start()`, which also validates it.
    pub fn reconfigure(&mut self, config: EngineConfig) -> EngineResult<()> {
        if self.is_recording() {
            return Err(EngineError::AlreadyRecording);
        }
        self.config = config;
        self.stages_stale = true;
        Ok(())
    }

    /// Toggle positioning for the current session.
    pub fn set_gps_enabled(&mut self, enabled: bool) {
        if self.gps_enabled == enabled {
            return;
        }
        self.gps_enabled = enabled;
        if !enabled {
            self.gps.break_track();
        }
        tracing::debug!(enabled, "GPS positioning toggled");
    }

    pub fn gps_enabled(&self) -> bool {
        self.gps_enabled
    }

    /// Process one accelerometer reading.
    ///
    /// Outputs are in production order: the reading itself, then on an
    /// analysis tick the autocorrelation table, the rate, and any strokes.
    pub fn process_accel(&mut self, reading: &AccelReading) -> Vec<EngineOutput> {
        let mut outputs = Vec::new();
        if !self.is_recording() {
            return outputs;
        }

        let Some(sample) = self.ingest.ingest(reading) else {
            tracing::trace!(timestamp_ms = reading.timestamp_ms, "Reading rejected");
            return outputs;
        };

        self.window.append(sample);
        outputs.push(EngineOutput::AccelerationReading(sample));

        self.samples_since_tick += 1;
        if self.window.is_full() && self.samples_since_tick >= self.config.analysis_interval_samples {
            self.samples_since_tick = 0;
            self.run_tick(&mut outputs);
        }

        outputs
    }

    /// Process one GPS fix (or its absence).
    pub fn process_gps(&mut self, fix: Option<&GpsFix>) -> Option<EngineOutput> {
        if !self.is_recording() || !self.gps_enabled {
            return None;
        }
        let fix = fix?;
        self.gps.update(fix).ok().map(EngineOutput::Distance)
    }

    /// Analysis ticks run this session.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Ticks that produced no periodicity output.
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks
    }

    /// Readings rejected this session (non-finite or out of order).
    pub fn rejected_readings(&self) -> u64 {
        self.ingest.rejected()
    }

    // =========================================================================
    // PRIVATE METHODS
    // =========================================================================

    fn run_tick(&mut self, outputs: &mut Vec<EngineOutput>) {
        let snapshot = self.window.snapshot();
        self.ticks += 1;

        match self.analyzer.analyze(&snapshot) {
            PeriodicityOutcome::Estimate(estimate) => {
                outputs.push(EngineOutput::AutocorrelationTable(estimate.table));
                outputs.push(EngineOutput::StrokeRate(estimate.stroke_rate));
            }
            PeriodicityOutcome::Skipped(reason) => {
                self.skipped_ticks += 1;
                match reason {
                    SkipReason::ZeroVariance => {
                        tracing::debug!("Tick skipped: flat signal");
                    }
                    SkipReason::LowConfidence { lag, correlation } => {
                        tracing::debug!(lag, correlation, "Tick suppressed: weak periodicity");
                    }
                    SkipReason::InsufficientHistory { have, need } => {
                        tracing::debug!(have, need, "Tick skipped: window not full");
                    }
                }
            }
        }

        outputs.extend(
            self.detector
                .detect(&snapshot)
                .into_iter()
                .map(EngineOutput::Stroke),
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
