//! Autocorrelation-based stroke rate estimation.
//!
//! Each analysis tick takes a window snapshot and correlates it against
//! lagged copies of itself over the lag band implied by the plausible stroke
//! rate band:
//!
//! ```text
//! lag = 60 × sampling_rate_hz / rate          (samples)
//! R(lag) = Σ c[i]·c[i+lag] / sqrt(Σ c[i]² · Σ c[i+lag]²),   c = x - mean
//! ```
//!
//! Sums run over the overlapping part of the window only, so a perfectly
//! periodic signal scores 1.0 exactly at its period instead of being pulled
//! toward shorter lags by the shrinking overlap. Lags whose overlap is too
//! short to be meaningful score 0.
//!
//! Tie-break policy: when several lags share the maximum, the smallest lag
//! wins. Harmonics of the true period (2P, 3P...) correlate as well as P
//! itself; picking the fastest qualifying periodicity avoids reporting half
//! the real stroke rate.

use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::types::{AutocorrelationTable, LagCorrelation};
use crate::window::WindowSnapshot;

/// Energy per sample below which the window is treated as flat.
const ZERO_VARIANCE_EPSILON: f64 = 1e-12;

/// A later lag must beat the current best by more than this to replace it.
const TIE_EPSILON: f64 = 1e-9;

/// Why a tick produced no output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    /// Window not yet full.
    InsufficientHistory { have: usize, need: usize },
    /// Flat (or non-finite) signal; correlation is undefined.
    ZeroVariance,
    /// Best correlation below the confidence threshold.
    LowConfidence { lag: usize, correlation: f64 },
}

/// A successful periodicity estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicityEstimate {
    /// Full diagnostic table for this tick.
    pub table: Arc<AutocorrelationTable>,
    /// Selected lag in samples.
    pub lag: usize,
    /// Correlation at the selected lag.
    pub correlation: f64,
    /// Rate implied by the selected lag, strokes per minute.
    pub stroke_rate: f64,
}

/// Result of one analysis tick.
#[derive(Debug, Clone, PartialEq)]
pub enum PeriodicityOutcome {
    Estimate(PeriodicityEstimate),
    Skipped(SkipReason),
}

/// Periodicity analyzer.
///
/// Stateless per tick apart from the last published rate, which is held
/// across skipped ticks.
#[derive(Debug, Clone)]
pub struct PeriodicityAnalyzer {
    sampling_rate_hz: f64,
    lag_range: RangeInclusive<usize>,
    min_overlap: usize,
    min_confidence: f64,
    last_rate: Option<f64>,
}

impl PeriodicityAnalyzer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            sampling_rate_hz: config.sampling_rate_hz,
            lag_range: config.lag_range(),
            min_overlap: config.min_overlap_samples(),
            min_confidence: config.min_correlation_confidence,
            last_rate: None,
        }
    }

    /// Analyze one snapshot.
    pub fn analyze(&mut self, snapshot: &WindowSnapshot) -> PeriodicityOutcome {
        if !snapshot.is_full() {
            return PeriodicityOutcome::Skipped(SkipReason::InsufficientHistory {
                have: snapshot.len(),
                need: snapshot.capacity(),
            });
        }

        let values = snapshot.magnitudes();
        let Some(table) = self.correlate(&values) else {
            return PeriodicityOutcome::Skipped(SkipReason::ZeroVariance);
        };

        let (lag, correlation) = select_peak(&table);
        if correlation < self.min_confidence {
            return PeriodicityOutcome::Skipped(SkipReason::LowConfidence { lag, correlation });
        }

        let stroke_rate = 60.0 * self.sampling_rate_hz / lag as f64;
        self.last_rate = Some(stroke_rate);

        PeriodicityOutcome::Estimate(PeriodicityEstimate {
            table: Arc::new(table),
            lag,
            correlation,
            stroke_rate,
        })
    }

    /// Last successfully estimated rate, held across skipped ticks.
    pub fn last_rate(&self) -> Option<f64> {
        self.last_rate
    }

    pub fn lag_range(&self) -> RangeInclusive<usize> {
        self.lag_range.clone()
    }

    pub fn reset(&mut self) {
        self.last_rate = None;
    }

    /// Compute the normalized autocorrelation table.
    ///
    /// Returns `None` for a flat or non-finite signal.
    fn correlate(&self, values: &[f64]) -> Option<AutocorrelationTable> {
        let n = values.len();
        if n == 0 {
            return None;
        }

        // Mean removal
        let mean = values.iter().sum::<f64>() / n as f64;
        let centered: Vec<f64> = values.iter().map(|x| x - mean).collect();

        // prefix[k] = Σ c[i]² for i < k
        let mut prefix = Vec::with_capacity(n + 1);
        prefix.push(0.0);
        let mut acc = 0.0;
        for c in &centered {
            acc += c * c;
            prefix.push(acc);
        }

        let energy = prefix[n];
        if !energy.is_finite() || energy <= ZERO_VARIANCE_EPSILON * n as f64 {
            return None;
        }

        let entries = self
            .lag_range
            .clone()
            .map(|lag| {
                let overlap = n.saturating_sub(lag);
                let correlation = if overlap < self.min_overlap {
                    0.0
                } else {
                    let head_energy = prefix[overlap];
                    let tail_energy = prefix[n] - prefix[lag];
                    let denom = (head_energy * tail_energy).sqrt();
                    if denom <= ZERO_VARIANCE_EPSILON {
                        0.0
                    } else {
                        let num: f64 = centered[..overlap]
                            .iter()
                            .zip(&centered[lag..])
                            .map(|(a, b)| a * b)
                            .sum();
                        (num / denom).clamp(-1.0, 1.0)
                    }
                };
                LagCorrelation { lag, correlation }
            })
            .collect();

        Some(AutocorrelationTable::new(entries))
    }
}

/// Pick the lag with the highest correlation, preferring the smallest on ties.
fn select_peak(table: &AutocorrelationTable) -> (usize, f64) {
    let mut best: Option<LagCorrelation> = None;
    for entry in table.entries() {
        match best {
            Some(b) if entry.correlation <= b.correlation + TIE_EPSILON => {}
            _ => best = Some(*entry),
        }
    }
    best.map(|b| (b.lag, b.correlation))
        .unwrap_or((0, f64::NEG_INFINITY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;
    use crate::window::SignalWindow;

    fn snapshot_of(values: impl IntoIterator<Item = f64>, capacity: usize) -> WindowSnapshot {
        let mut window = SignalWindow::new(capacity);
        for (i, v) in values.into_iter().enumerate() {
            window.append(Sample::new(i as u64 * 20, v));
        }
        window.snapshot()
    }

    fn sinusoid(period: f64, count: usize) -> impl Iterator<Item = f64> {
        (0..count).map(move |i| 2.0 + (2.0 * std::f64::consts::PI * i as f64 / period).sin())
    }

    #[test]
    fn test_partial_window_skipped() {
        let mut analyzer = PeriodicityAnalyzer::new(&EngineConfig::default());
        let snap = snapshot_of(sinusoid(100.0, 199), 200);

        assert_eq!(
            analyzer.analyze(&snap),
            PeriodicityOutcome::Skipped(SkipReason::InsufficientHistory {
                have: 199,
                need: 200
            })
        );
        assert_eq!(analyzer.last_rate(), None);
    }

    #[test]
    fn test_constant_signal_skipped() {
        let mut analyzer = PeriodicityAnalyzer::new(&EngineConfig::default());
        let snap = snapshot_of(std::iter::repeat(9.81).take(200), 200);

        assert_eq!(
            analyzer.analyze(&snap),
            PeriodicityOutcome::Skipped(SkipReason::ZeroVariance)
        );
    }

    #[test]
    fn test_thirty_spm_selects_lag_100() {
        // 50 Hz, 4 s window, 15-50 spm band, 30 spm signal = period 100 samples
        let mut analyzer = PeriodicityAnalyzer::new(&EngineConfig::default());
        let snap = snapshot_of(sinusoid(100.0, 200), 200);

        let PeriodicityOutcome::Estimate(estimate) = analyzer.analyze(&snap) else {
            panic!("expected an estimate");
        };

        assert_eq!(estimate.lag, 100);
        assert!((estimate.stroke_rate - 30.0).abs() < 1e-9);
        assert!(estimate.correlation > 0.999);
        assert_eq!(estimate.table.min_lag(), Some(60));
        assert_eq!(estimate.table.max_lag(), Some(200));
        assert_eq!(estimate.table.len(), 141);
        assert_eq!(analyzer.last_rate(), Some(estimate.stroke_rate));
    }

    #[test]
    fn test_rate_accuracy_across_band() {
        let config = EngineConfig::default();
        for period in [64.0, 75.0, 88.0, 100.0, 120.0, 140.0] {
            let mut analyzer = PeriodicityAnalyzer::new(&config);
            let snap = snapshot_of(sinusoid(period, 200), 200);

            let PeriodicityOutcome::Estimate(estimate) = analyzer.analyze(&snap) else {
                panic!("expected an estimate for period {period}");
            };

            assert!(
                (estimate.lag as f64 - period).abs() <= 1.0,
                "period {period}: selected lag {}",
                estimate.lag
            );
            let expected = 60.0 * 50.0 / period;
            assert!(
                (estimate.stroke_rate - expected).abs() / expected <= 0.02,
                "period {period}: rate {} vs {expected}",
                estimate.stroke_rate
            );
        }
    }

    #[test]
    fn test_harmonic_tie_prefers_smallest_lag() {
        // Period 60 also correlates perfectly at lag 120
        let mut analyzer = PeriodicityAnalyzer::new(&EngineConfig::default());
        let snap = snapshot_of(sinusoid(60.0, 200), 200);

        let PeriodicityOutcome::Estimate(estimate) = analyzer.analyze(&snap) else {
            panic!("expected an estimate");
        };

        let at_120 = estimate.table.correlation_at(120).unwrap();
        assert!((at_120 - estimate.correlation).abs() < 1e-6);
        assert_eq!(estimate.lag, 60);
        assert!((estimate.stroke_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_suppressed_and_rate_held() {
        let mut analyzer = PeriodicityAnalyzer::new(&EngineConfig::default());
        let periodic = snapshot_of(sinusoid(100.0, 200), 200);
        assert!(matches!(
            analyzer.analyze(&periodic),
            PeriodicityOutcome::Estimate(_)
        ));

        // A single spike has no periodic structure in the band
        let spike = snapshot_of((0..200).map(|i| if i == 20 { 10.0 } else { 0.0 }), 200);
        let outcome = analyzer.analyze(&spike);

        assert!(matches!(
            outcome,
            PeriodicityOutcome::Skipped(SkipReason::LowConfidence { .. })
        ));
        assert_eq!(analyzer.last_rate(), Some(30.0));
    }

    #[test]
    fn test_short_overlap_lags_report_zero() {
        let config = EngineConfig::default();
        let mut analyzer = PeriodicityAnalyzer::new(&config);
        let snap = snapshot_of(sinusoid(100.0, 200), 200);

        let PeriodicityOutcome::Estimate(estimate) = analyzer.analyze(&snap) else {
            panic!("expected an estimate");
        };

        // min overlap = 25% of 200 = 50 samples, so lags above 150 are unscored
        assert_eq!(estimate.table.correlation_at(151), Some(0.0));
        assert_eq!(estimate.table.correlation_at(200), Some(0.0));
        assert!(estimate.table.correlation_at(150).unwrap().abs() > 0.0);
    }

    #[test]
    fn test_table_values_bounded() {
        let mut analyzer = PeriodicityAnalyzer::new(&EngineConfig::default());
        let snap = snapshot_of(
            (0..200).map(|i| ((i * 7919) % 113) as f64 / 10.0),
            200,
        );

        if let PeriodicityOutcome::Estimate(estimate) = analyzer.analyze(&snap) {
            assert!(estimate
                .table
                .entries()
                .iter()
                .all(|e| (-1.0..=1.0).contains(&e.correlation)));
        }
    }

    #[test]
    fn test_reset_forgets_rate() {
        let mut analyzer = PeriodicityAnalyzer::new(&EngineConfig::default());
        analyzer.analyze(&snapshot_of(sinusoid(100.0, 200), 200));
        assert!(analyzer.last_rate().is_some());

        analyzer.reset();
        assert_eq!(analyzer.last_rate(), None);
    }
}
