//! GPS distance and speed fusion.
//!
//! Accumulates great-circle distance between consecutive accepted fixes.
//! Fixes are gated on reported accuracy and on strictly increasing
//! timestamps; rejected fixes are dropped without affecting state, so the
//! distance simply stalls until good fixes return.
//!
//! Loosely coupled by construction: nothing here reads or writes stroke state.

use crate::config::EngineConfig;
use crate::types::{DistanceUpdate, GpsFix};

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates in meters (haversine).
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Why a fix was not used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GpsRejection {
    /// Accuracy radius worse than the configured threshold.
    PoorAccuracy { accuracy_m: f64 },
    /// Timestamp not after the last accepted fix.
    StaleTimestamp { timestamp_ms: u64, last_ms: u64 },
    /// Coordinates out of range or non-finite.
    InvalidCoordinates,
}

/// Incremental distance/speed estimator.
#[derive(Debug, Clone)]
pub struct GpsFusion {
    accuracy_threshold_m: f64,
    last_fix: Option<GpsFix>,
    /// Timestamp of the last accepted fix. Survives `break_track`.
    last_timestamp_ms: Option<u64>,
    total_distance_m: f64,
    speed_mps: Option<f64>,
    accepted: u64,
    rejected: u64,
}

impl GpsFusion {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            accuracy_threshold_m: config.gps_accuracy_threshold_m,
            last_fix: None,
            last_timestamp_ms: None,
            total_distance_m: 0.0,
            speed_mps: None,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Consume one fix.
    ///
    /// Returns the distance update for an accepted fix. The first accepted
    /// fix of a session anchors the track and reports a zero delta.
    pub fn update(&mut self, fix: &GpsFix) -> Result<DistanceUpdate, GpsRejection> {
        if let Err(rejection) = self.check(fix) {
            self.rejected += 1;
            tracing::debug!(?rejection, timestamp_ms = fix.timestamp_ms, "GPS fix dropped");
            return Err(rejection);
        }

        let reported_speed = fix.speed_mps.filter(|s| s.is_finite() && *s >= 0.0);

        let (delta_m, speed_mps) = match self.last_fix {
            Some(prev) => {
                let delta = haversine_distance_m(
                    prev.latitude,
                    prev.longitude,
                    fix.latitude,
                    fix.longitude,
                );
                let dt_s = (fix.timestamp_ms - prev.timestamp_ms) as f64 / 1000.0;
                (delta, reported_speed.unwrap_or(delta / dt_s))
            }
            None => (0.0, reported_speed.unwrap_or(0.0)),
        };

        self.total_distance_m += delta_m;
        self.speed_mps = Some(speed_mps);
        self.last_fix = Some(*fix);
        self.last_timestamp_ms = Some(fix.timestamp_ms);
        self.accepted += 1;

        Ok(DistanceUpdate {
            timestamp_ms: fix.timestamp_ms,
            delta_m,
            total_distance_m: self.total_distance_m,
            speed_mps,
        })
    }

    /// Forget the last fix so the next one re-anchors the track.
    ///
    /// Used when positioning is paused; distance and the timestamp ordering
    /// guard are kept.
    pub fn break_track(&mut self) {
        self.last_fix = None;
    }

    pub fn total_distance_m(&self) -> f64 {
        self.total_distance_m
    }

    pub fn speed_mps(&self) -> Option<f64> {
        self.speed_mps
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn reset(&mut self) {
        self.last_fix = None;
        self.last_timestamp_ms = None;
        self.total_distance_m = 0.0;
        self.speed_mps = None;
        self.accepted = 0;
        self.rejected = 0;
    }

    fn check(&self, fix: &GpsFix) -> Result<(), GpsRejection> {
        let coords_ok = fix.latitude.is_finite()
            && fix.longitude.is_finite()
            && (-90.0..=90.0).contains(&fix.latitude)
            && (-180.0..=180.0).contains(&fix.longitude);
        if !coords_ok {
            return Err(GpsRejection::InvalidCoordinates);
        }

        // NaN accuracy fails this comparison too
        if !(fix.accuracy_m <= self.accuracy_threshold_m) {
            return Err(GpsRejection::PoorAccuracy {
                accuracy_m: fix.accuracy_m,
            });
        }

        if let Some(last_ms) = self.last_timestamp_ms {
            if fix.timestamp_ms <= last_ms {
                return Err(GpsRejection::StaleTimestamp {
                    timestamp_ms: fix.timestamp_ms,
                    last_ms,
                });
            }
        }

        Ok(())
    }
}
