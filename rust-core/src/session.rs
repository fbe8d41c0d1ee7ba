//! Threaded recording service.
//!
//! Producers (the accelerometer stream, the GPS stream) run on their own
//! threads and must never block. They hand readings to bounded queues; one
//! worker thread owns the [`StrokePipeline`] and consumes all of them:
//!
//! ```text
//! accel producer ──try_send──▶ [bounded] ─┐
//! gps producer   ──try_send──▶ [bounded] ─┼─▶ worker (StrokePipeline) ──▶ ResultPublisher
//! start/stop/... ──────────▶ [control] ───┘
//! ```
//!
//! Session epochs: every start bumps an epoch counter and every queued
//! message carries the epoch it was produced in. The worker drops messages
//! from older epochs and lazily restarts its pipeline when it first sees a
//! newer one, so samples never leak across sessions.
//!
//! Outputs are published while holding the session gate lock, after checking
//! that the epoch is still current and recording. `stop()` takes the same
//! lock, so once it returns nothing from that session reaches the subscriber.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TrySendError};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::pipeline::StrokePipeline;
use crate::publisher::{DispatchStats, ResultPublisher, StrokeListener, SubscriptionId};
use crate::types::{AccelReading, EngineOutput, GpsFix, SessionMetrics, SessionState};

// ============================================================================
// MESSAGES
// ============================================================================

#[derive(Debug)]
struct Tagged<T> {
    epoch: u64,
    payload: T,
}

#[derive(Debug)]
struct GpsInput {
    fix: Option<GpsFix>,
    /// First fix after positioning was re-enabled.
    resume: bool,
}

#[derive(Debug)]
enum Control {
    Stop { epoch: u64 },
    Shutdown,
}

// ============================================================================
// SESSION GATE
// ============================================================================

/// Authoritative session state, guarded by one lock.
#[derive(Debug)]
struct SessionGate {
    epoch: u64,
    recording: bool,
    shut_down: bool,
    config: EngineConfig,
    gps_enabled: bool,
    metrics: SessionMetrics,
}

#[derive(Debug)]
struct Shared {
    gate: Mutex<SessionGate>,
    // Lock-free mirrors of the gate for the producer fast path
    recording: AtomicBool,
    epoch: AtomicU64,
    gps_enabled: AtomicBool,
    gps_resume: AtomicBool,
    dropped: AtomicU64,
}

impl Shared {
    fn gate(&self) -> MutexGuard<'_, SessionGate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.recording.load(Ordering::Acquire) && self.epoch.load(Ordering::Acquire) == epoch
    }
}

// ============================================================================
// SERVICE
// ============================================================================

/// Multi-producer front end of the stroke sensing engine.
///
/// All methods take `&self`; share the service between producer threads with
/// an `Arc`. Queue capacities are fixed when the service is created.
pub struct StrokeService {
    shared: Arc<Shared>,
    publisher: Arc<ResultPublisher>,
    accel_tx: Sender<Tagged<AccelReading>>,
    gps_tx: Sender<Tagged<GpsInput>>,
    control_tx: Sender<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
    clock: Instant,
}

impl StrokeService {
    /// Create an idle service and spawn its worker thread.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let (accel_tx, accel_rx) = bounded(config.ingest_queue_capacity.max(1));
        let (gps_tx, gps_rx) = bounded(config.gps_queue_capacity.max(1));
        let (control_tx, control_rx) = unbounded();

        let publisher = Arc::new(ResultPublisher::new(config.dispatch_queue_capacity));
        let shared = Arc::new(Shared {
            gate: Mutex::new(SessionGate {
                epoch: 0,
                recording: false,
                shut_down: false,
                gps_enabled: config.gps_enabled,
                config: config.clone(),
                metrics: SessionMetrics::default(),
            }),
            recording: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            gps_enabled: AtomicBool::new(config.gps_enabled),
            gps_resume: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });

        let worker = Worker {
            pipeline: StrokePipeline::new(config),
            epoch: 0,
            shared: Arc::clone(&shared),
            publisher: Arc::clone(&publisher),
        };
        let handle = thread::Builder::new()
            .name("stroke-worker".into())
            .spawn(move || worker.run(accel_rx, gps_rx, control_rx))?;

        Ok(Self {
            shared,
            publisher,
            accel_tx,
            gps_tx,
            control_tx,
            worker: Mutex::new(Some(handle)),
            clock: Instant::now(),
        })
    }

    // =========================================================================
    // SESSION CONTROL
    // =========================================================================

    /// Begin a recording session.
    pub fn start(&self) -> EngineResult<()> {
        let mut gate = self.shared.gate();
        if gate.shut_down {
            return Err(EngineError::ServiceStopped);
        }
        if gate.recording {
            return Err(EngineError::AlreadyRecording);
        }
        gate.config.validate()?;

        let start_ms = self.now_ms();
        gate.epoch += 1;
        gate.recording = true;
        gate.metrics = SessionMetrics {
            state: SessionState::Recording,
            started_at_ms: Some(start_ms),
            ..SessionMetrics::default()
        };
        self.shared.dropped.store(0, Ordering::Relaxed);
        self.shared.epoch.store(gate.epoch, Ordering::Release);
        self.shared.recording.store(true, Ordering::Release);

        tracing::info!(epoch = gate.epoch, start_ms, "Session started");
        Ok(())
    }

    /// End the recording session. No-op while Idle.
    pub fn stop(&self) {
        let mut gate = self.shared.gate();
        self.stop_locked(&mut gate);
    }

    fn stop_locked(&self, gate: &mut SessionGate) {
        if !gate.recording {
            return;
        }
        gate.recording = false;
        gate.metrics.state = SessionState::Idle;
        self.shared.recording.store(false, Ordering::Release);

        let _ = self.control_tx.send(Control::Stop { epoch: gate.epoch });
        tracing::info!(
            epoch = gate.epoch,
            strokes = gate.metrics.stroke_count,
            distance_m = gate.metrics.distance_m,
            dropped = self.shared.dropped.load(Ordering::Relaxed),
            "Session stopped"
        );
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::Acquire)
    }

    /// Metrics of the current (or last) session.
    pub fn metrics(&self) -> SessionMetrics {
        self.shared.gate().metrics
    }

    /// Replace the engine configuration. Only allowed while Idle; validated
    /// by the next `start()`.
    pub fn reconfigure(&self, config: EngineConfig) -> EngineResult<()> {
        let mut gate = self.shared.gate();
        if gate.recording {
            return Err(EngineError::AlreadyRecording);
        }
        self.apply_gps_enabled(&mut gate, config.gps_enabled);
        gate.config = config;
        Ok(())
    }

    /// Enable or disable positioning. Persists across sessions.
    ///
    /// Fixes offered while disabled are discarded at the producer boundary.
    /// The first fix after re-enabling starts a new track segment, so the
    /// gap is never counted as distance.
    pub fn set_gps_enabled(&self, enabled: bool) {
        let mut gate = self.shared.gate();
        self.apply_gps_enabled(&mut gate, enabled);
    }

    pub fn gps_enabled(&self) -> bool {
        self.shared.gps_enabled.load(Ordering::Acquire)
    }

    // =========================================================================
    // INPUTS
    // =========================================================================

    /// Queue one accelerometer reading. Never blocks.
    ///
    /// Returns `false` if the reading was discarded: no session is running,
    /// the queue is full, or the service has shut down. A missing timestamp
    /// is taken from the service clock.
    pub fn add_accelerometer_reading(&self, accel: [f64; 3], timestamp_ms: Option<u64>) -> bool {
        if !self.is_recording() {
            return false;
        }
        let timestamp_ms = timestamp_ms.unwrap_or_else(|| self.now_ms());
        let message = Tagged {
            epoch: self.shared.epoch.load(Ordering::Acquire),
            payload: AccelReading::new(timestamp_ms, accel),
        };
        self.enqueue(&self.accel_tx, message, "accelerometer")
    }

    /// Queue one GPS fix, or report that none is available. Never blocks.
    pub fn add_gps_reading(&self, fix: Option<GpsFix>) -> bool {
        if !self.is_recording() || !self.gps_enabled() {
            return false;
        }
        let resume = self.shared.gps_resume.swap(false, Ordering::AcqRel);
        let message = Tagged {
            epoch: self.shared.epoch.load(Ordering::Acquire),
            payload: GpsInput { fix, resume },
        };
        let queued = self.enqueue(&self.gps_tx, message, "gps");
        if resume && !queued {
            // The track break must ride on a fix that actually reaches the worker
            self.shared.gps_resume.store(true, Ordering::Release);
        }
        queued
    }

    /// Readings dropped on full queues this session.
    pub fn dropped_readings(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    // =========================================================================
    // SUBSCRIPTION
    // =========================================================================

    /// Install the subscriber, replacing any previous one.
    pub fn subscribe(&self, listener: impl StrokeListener) -> EngineResult<SubscriptionId> {
        self.publisher.subscribe(listener)
    }

    pub fn unsubscribe(&self) {
        self.publisher.unsubscribe();
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.publisher.stats()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Process what is already queued, stop the session, and join all
    /// threads. Further calls are no-ops.
    pub fn shutdown(&self) {
        {
            let mut gate = self.shared.gate();
            if gate.shut_down {
                return;
            }
            gate.shut_down = true;
        }

        let _ = self.control_tx.send(Control::Shutdown);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Stroke worker thread panicked");
            }
        }

        self.stop();
        self.publisher.shutdown();
        tracing::info!("Stroke service shut down");
    }

    // =========================================================================
    // PRIVATE METHODS
    // =========================================================================

    fn apply_gps_enabled(&self, gate: &mut SessionGate, enabled: bool) {
        if gate.gps_enabled == enabled {
            return;
        }
        gate.gps_enabled = enabled;
        self.shared.gps_enabled.store(enabled, Ordering::Release);
        if enabled {
            self.shared.gps_resume.store(true, Ordering::Release);
        }
        tracing::debug!(enabled, "GPS positioning toggled");
    }

    fn now_ms(&self) -> u64 {
        self.clock.elapsed().as_millis() as u64
    }

    fn enqueue<T>(&self, tx: &Sender<T>, message: T, stream: &'static str) -> bool {
        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    tracing::warn!(stream, dropped, "Input queue full; dropping readings");
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Drop for StrokeService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// WORKER
// ============================================================================

struct Worker {
    pipeline: StrokePipeline,
    /// Epoch the pipeline is currently running.
    epoch: u64,
    shared: Arc<Shared>,
    publisher: Arc<ResultPublisher>,
}

impl Worker {
    fn run(
        mut self,
        accel_rx: Receiver<Tagged<AccelReading>>,
        gps_rx: Receiver<Tagged<GpsInput>>,
        control_rx: Receiver<Control>,
    ) {
        loop {
            select! {
                recv(control_rx) -> message => match message {
                    Ok(Control::Stop { epoch }) => {
                        if epoch == self.epoch {
                            self.pipeline.stop();
                        }
                    }
                    Ok(Control::Shutdown) | Err(_) => break,
                },
                recv(accel_rx) -> message => match message {
                    Ok(message) => self.handle_accel(message),
                    Err(_) => break,
                },
                recv(gps_rx) -> message => match message {
                    Ok(message) => self.handle_gps(message),
                    Err(_) => break,
                },
            }
        }

        // Drain whatever producers managed to queue before shutdown
        for message in accel_rx.try_iter() {
            self.handle_accel(message);
        }
        for message in gps_rx.try_iter() {
            self.handle_gps(message);
        }
        self.pipeline.stop();
    }

    fn handle_accel(&mut self, message: Tagged<AccelReading>) {
        if !self.enter_epoch(message.epoch) {
            return;
        }
        let outputs = self.pipeline.process_accel(&message.payload);
        self.publish(message.epoch, outputs);
    }

    fn handle_gps(&mut self, message: Tagged<GpsInput>) {
        if !self.enter_epoch(message.epoch) {
            return;
        }
        if message.payload.resume {
            // Toggling off and on breaks the track
            self.pipeline.set_gps_enabled(false);
            self.pipeline.set_gps_enabled(true);
        }
        let outputs = self
            .pipeline
            .process_gps(message.payload.fix.as_ref())
            .into_iter()
            .collect();
        self.publish(message.epoch, outputs);
    }

    /// Make sure the pipeline runs `epoch`. Returns `false` if the message
    /// belongs to a session that is no longer current.
    fn enter_epoch(&mut self, epoch: u64) -> bool {
        if epoch < self.epoch || !self.shared.is_current(epoch) {
            return false;
        }
        if epoch == self.epoch {
            return true;
        }

        let gate = self.shared.gate();
        if !(gate.recording && gate.epoch == epoch) {
            return false;
        }

        self.pipeline.stop();
        let result = self
            .pipeline
            .reconfigure(gate.config.clone())
            .and_then(|()| self.pipeline.start(gate.metrics.started_at_ms.unwrap_or(0)));
        if let Err(error) = result {
            tracing::error!(%error, epoch, "Failed to begin session on worker");
            return false;
        }
        // Positioning is gated at the producer boundary
        self.pipeline.set_gps_enabled(true);
        self.epoch = epoch;

        tracing::debug!(epoch, "Worker entered new session");
        true
    }

    fn publish(&self, epoch: u64, outputs: Vec<EngineOutput>) {
        if outputs.is_empty() {
            return;
        }
        let mut gate = self.shared.gate();
        if !(gate.recording && gate.epoch == epoch) {
            return;
        }

        self.publisher.publish_all(outputs);

        let started_at_ms = gate.metrics.started_at_ms;
        gate.metrics = SessionMetrics {
            started_at_ms,
            ..self.pipeline.metrics()
        };
    }
}
