//! Stroke Sensing Engine Library
//!
//! A streaming kernel that turns live accelerometer (and optionally GPS)
//! samples into rowing metrics: a smoothed acceleration signal, a
//! periodicity-based stroke rate with its autocorrelation table, discrete
//! stroke events, and GPS distance/speed.
//!
//! # Design Philosophy
//!
//! - **Nothing in the data path is fatal**: short history, flat signals, weak
//!   periodicity and bad fixes are skipped; only misconfiguration is an error,
//!   and it is rejected when a session starts.
//! - **Session-scoped state**: every buffer and counter belongs to one
//!   recording session; a new session never sees the previous one's samples.
//! - **Bounded cost**: O(1) ingestion per sample, analysis bounded by
//!   window × lag range, bounded queues between producers and the engine.
//!
//! # Layers
//!
//! - [`pipeline::StrokePipeline`]: the synchronous engine, one call per input
//! - [`session::StrokeService`]: threaded front end with non-blocking
//!   producers, session epochs and a subscriber
//! - [`replay`]: offline replay of CSV recordings
//!
//! # Example
//!
//! ```no_run
//! use stroke_sensing::{EngineConfig, StrokeEvent, StrokeListener, StrokeService};
//!
//! struct Printer;
//!
//! impl StrokeListener for Printer {
//!     fn on_stroke_taken(&mut self, event: StrokeEvent) {
//!         println!("stroke {} at {:.1} spm", event.index, event.stroke_rate);
//!     }
//! }
//!
//! let service = StrokeService::new(EngineConfig::default())?;
//! service.subscribe(Printer)?;
//! service.start()?;
//! service.add_accelerometer_reading([0.1, 0.2, 1.4], None);
//! service.stop();
//! # Ok::<(), stroke_sensing::EngineError>(())
//! ```

pub mod config;
pub mod error;
pub mod gps;
pub mod periodicity;
pub mod pipeline;
pub mod publisher;
pub mod replay;
pub mod session;
pub mod signal;
pub mod stroke_detection;
pub mod types;
pub mod window;

#[cfg(test)]
mod stress_tests;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use pipeline::StrokePipeline;
pub use publisher::{DispatchStats, StrokeListener, SubscriptionId};
pub use session::StrokeService;
pub use types::{
    AccelReading, AutocorrelationTable, DistanceUpdate, EngineOutput, GpsFix, LagCorrelation,
    Sample, SessionMetrics, SessionState, StrokeEvent,
};
