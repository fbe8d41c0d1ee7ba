//! Offline replay of recorded sessions.
//!
//! Recordings are CSV files with a header row:
//!
//! ```text
//! accelerometer: timestamp_ms,x,y,z
//! gps:           timestamp_ms,latitude,longitude,speed,accuracy   (speed may be empty)
//! ```
//!
//! Both streams are merged by timestamp and fed through a [`StrokePipeline`]
//! exactly as a live session would see them. On equal timestamps the GPS
//! fix goes first.

use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;
use serde::Deserialize;

use crate::error::EngineResult;
use crate::pipeline::StrokePipeline;
use crate::types::{AccelReading, EngineOutput, GpsFix, SessionMetrics, StrokeEvent};

/// One accelerometer row.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AccelRecord {
    pub timestamp_ms: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<AccelRecord> for AccelReading {
    fn from(record: AccelRecord) -> Self {
        AccelReading::new(record.timestamp_ms, [record.x, record.y, record.z])
    }
}

/// One GPS row.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GpsRecord {
    pub timestamp_ms: u64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    pub accuracy: f64,
}

impl From<GpsRecord> for GpsFix {
    fn from(record: GpsRecord) -> Self {
        GpsFix {
            timestamp_ms: record.timestamp_ms,
            latitude: record.latitude,
            longitude: record.longitude,
            speed_mps: record.speed,
            accuracy_m: record.accuracy,
        }
    }
}

/// Outcome of a replay.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReplaySummary {
    /// Every stroke event, in emission order.
    pub strokes: Vec<StrokeEvent>,
    /// Every rate update, with the timestamp of the reading that produced it.
    pub rate_updates: Vec<(u64, f64)>,
    /// Autocorrelation tables emitted.
    pub tables: usize,
    /// Accelerometer rows fed.
    pub readings: usize,
    /// GPS rows fed.
    pub fixes: usize,
    /// Rows the pipeline rejected (non-finite or out of order).
    pub rejected_readings: u64,
    /// Final session metrics.
    pub metrics: SessionMetrics,
}

pub fn read_accel_csv<R: Read>(reader: R) -> EngineResult<Vec<AccelReading>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut readings = Vec::new();
    for record in reader.deserialize::<AccelRecord>() {
        readings.push(record?.into());
    }
    Ok(readings)
}

pub fn read_gps_csv<R: Read>(reader: R) -> EngineResult<Vec<GpsFix>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut fixes = Vec::new();
    for record in reader.deserialize::<GpsRecord>() {
        fixes.push(record?.into());
    }
    Ok(fixes)
}

pub fn load_accel_csv(path: impl AsRef<Path>) -> EngineResult<Vec<AccelReading>> {
    read_accel_csv(std::fs::File::open(path)?)
}

pub fn load_gps_csv(path: impl AsRef<Path>) -> EngineResult<Vec<GpsFix>> {
    read_gps_csv(std::fs::File::open(path)?)
}

/// Run one complete session over recorded streams.
///
/// The session starts at the first timestamp seen and is stopped at the end,
/// so the returned metrics are in the Idle state.
pub fn replay(
    pipeline: &mut StrokePipeline,
    readings: &[AccelReading],
    fixes: &[GpsFix],
) -> EngineResult<ReplaySummary> {
    let start_ms = match (readings.first(), fixes.first()) {
        (Some(r), Some(f)) => r.timestamp_ms.min(f.timestamp_ms),
        (Some(r), None) => r.timestamp_ms,
        (None, Some(f)) => f.timestamp_ms,
        (None, None) => 0,
    };
    pipeline.start(start_ms)?;

    let mut summary = ReplaySummary {
        readings: readings.len(),
        fixes: fixes.len(),
        ..ReplaySummary::default()
    };

    let mut gps = fixes.iter().peekable();
    for reading in readings {
        while let Some(fix) = gps.next_if(|f| f.timestamp_ms <= reading.timestamp_ms) {
            pipeline.process_gps(Some(fix));
        }
        for output in pipeline.process_accel(reading) {
            match output {
                EngineOutput::Stroke(event) => summary.strokes.push(event),
                EngineOutput::StrokeRate(rate) => {
                    summary.rate_updates.push((reading.timestamp_ms, rate))
                }
                EngineOutput::AutocorrelationTable(_) => summary.tables += 1,
                EngineOutput::AccelerationReading(_) | EngineOutput::Distance(_) => {}
            }
        }
    }
    for fix in gps {
        pipeline.process_gps(Some(fix));
    }

    summary.rejected_readings = pipeline.rejected_readings();
    pipeline.stop();
    summary.metrics = pipeline.metrics();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::EngineError;
    use std::io::Write;

    #[test]
    fn test_read_accel_csv() {
        let data = "timestamp_ms,x,y,z\n0,0.0,3.0,4.0\n20, 1.0, 0.0, 0.0\n";
        let readings = read_accel_csv(data.as_bytes()).unwrap();

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].accel, [0.0, 3.0, 4.0]);
        assert_eq!(readings[1].timestamp_ms, 20);
    }

    #[test]
    fn test_read_gps_csv_optional_speed() {
        let data = "timestamp_ms,latitude,longitude,speed,accuracy\n\
                    0,51.5,-0.12,,5.0\n\
                    1000,51.5001,-0.12,3.5,4.0\n";
        let fixes = read_gps_csv(data.as_bytes()).unwrap();

        assert_eq!(fixes[0].speed_mps, None);
        assert_eq!(fixes[1].speed_mps, Some(3.5));
        assert_eq!(fixes[1].accuracy_m, 4.0);
    }

    #[test]
    fn test_malformed_row_is_csv_error() {
        let data = "timestamp_ms,x,y,z\n0,abc,0,0\n";
        assert!(matches!(read_accel_csv(data.as_bytes()), Err(EngineError::Csv(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            load_accel_csv("/nonexistent/recording.csv"),
            Err(EngineError::Io(_))
        ));
    }

    #[test]
    fn test_replay_recording_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp_ms,x,y,z").unwrap();
        for i in 0..1500u64 {
            let phase = (i % 100) as f64 - 20.0;
            let m = 0.2 + 3.0 * (-(phase * phase) / 32.0).exp();
            writeln!(file, "{},{},0,0", i * 20, m).unwrap();
        }
        file.flush().unwrap();

        let readings = load_accel_csv(file.path()).unwrap();
        let mut pipeline = StrokePipeline::new(EngineConfig::default());
        let summary = replay(&mut pipeline, &readings, &[]).unwrap();

        assert_eq!(summary.readings, 1500);
        assert!(!summary.strokes.is_empty());
        assert!(summary.tables > 0);
        for (_, rate) in &summary.rate_updates {
            assert!((rate - 30.0).abs() < 1.0, "rate {rate}");
        }
        assert!(!pipeline.is_recording());
        assert_eq!(summary.metrics.stroke_count, summary.strokes.len() as u64);
    }

    #[test]
    fn test_replay_merges_gps() {
        let readings: Vec<AccelReading> = (0..100u64)
            .map(|i| AccelReading::new(i * 20, [1.0, 0.0, 0.0]))
            .collect();
        let fixes = vec![
            GpsFix::new(0, 0.0, 0.0, 5.0),
            GpsFix::new(1000, 0.0001, 0.0, 5.0),
            // After the last reading; still applied
            GpsFix::new(5000, 0.0002, 0.0, 5.0),
        ];

        let mut pipeline = StrokePipeline::new(EngineConfig::default());
        let summary = replay(&mut pipeline, &readings, &fixes).unwrap();

        assert_eq!(summary.fixes, 3);
        assert!((summary.metrics.distance_m - 22.239).abs() < 0.01);
    }
}
