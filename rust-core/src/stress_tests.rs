/// Production-level stress testing for the stroke sensing engine.
///
/// These tests are designed to expose real-world failure modes that would only
/// appear under extreme, sustained, or pathological conditions.

#[cfg(test)]
mod stress_tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::config::EngineConfig;
    use crate::pipeline::StrokePipeline;
    use crate::publisher::testing::{ChannelListener, Received};
    use crate::session::StrokeService;
    use crate::types::*;

    fn pulse_magnitude(i: u64, period: u64) -> f64 {
        let phase = (i % period) as f64 - (period / 5) as f64;
        0.2 + 3.0 * (-(phase * phase) / 32.0).exp()
    }

    /// Minimal deterministic generator so failures reproduce.
    struct Lcg(u64);

    impl Lcg {
        fn next_f64(&mut self) -> f64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    fn assert_outputs_sane(outputs: &[EngineOutput]) {
        let mut last_stroke: Option<StrokeEvent> = None;
        for output in outputs {
            match output {
                EngineOutput::AccelerationReading(sample) => assert!(sample.magnitude.is_finite()),
                EngineOutput::AutocorrelationTable(table) => {
                    assert!(table.values().iter().all(|v| v.is_finite() && v.abs() <= 1.0 + 1e-9))
                }
                EngineOutput::StrokeRate(rate) => assert!((15.0..=50.0).contains(rate)),
                EngineOutput::Stroke(event) => {
                    if let Some(prev) = last_stroke {
                        assert_eq!(event.index, prev.index + 1);
                        assert!(event.timestamp_ms > prev.timestamp_ms);
                    }
                    assert!(event.stroke_rate.is_finite() && event.stroke_rate <= 50.0 + 1e-9);
                    last_stroke = Some(*event);
                }
                EngineOutput::Distance(update) => assert!(update.total_distance_m.is_finite()),
            }
        }
    }

    // ============================================================================
    // CATEGORY 1: EXTREME DURATION & THROUGHPUT
    // ============================================================================

    /// 10 minutes of continuous rowing at 50Hz (30,000 samples)
    #[test]
    fn stress_ten_minutes_continuous_50hz() {
        let mut pipeline = StrokePipeline::new(EngineConfig::default());
        pipeline.start(0).unwrap();

        let mut outputs = Vec::new();
        let mut rate_at_block_end = Vec::new();
        for i in 0..30_000u64 {
            // Two-minute blocks: 30, 24, 30, 24, 30 spm
            let period = if (i / 6_000) % 2 == 0 { 100 } else { 125 };
            let reading = AccelReading::new(i * 20, [pulse_magnitude(i, period), 0.0, 0.0]);
            outputs.extend(pipeline.process_accel(&reading));
            if i % 6_000 == 5_999 {
                rate_at_block_end.push(pipeline.metrics().stroke_rate.unwrap());
            }
        }

        assert_outputs_sane(&outputs);
        let metrics = pipeline.metrics();
        assert!(metrics.stroke_count > 200, "only {} strokes", metrics.stroke_count);
        // The estimate follows every rate change
        let expected = [30.0, 24.0, 30.0, 24.0, 30.0];
        assert_eq!(rate_at_block_end.len(), expected.len());
        for (rate, want) in rate_at_block_end.iter().zip(expected) {
            assert!((rate - want).abs() < 0.5, "rate {rate}, expected {want}");
        }
    }

    /// Many short sessions back to back must not leak state or counters
    #[test]
    fn stress_rapid_restart_cycles() {
        let mut pipeline = StrokePipeline::new(EngineConfig::default());

        for cycle in 0..50u64 {
            pipeline.start(cycle * 100_000).unwrap();
            let mut outputs = Vec::new();
            for i in 0..((cycle % 5) * 150 + 50) {
                let reading = AccelReading::new(i * 20, [pulse_magnitude(i, 100), 0.0, 0.0]);
                outputs.extend(pipeline.process_accel(&reading));
            }
            assert_outputs_sane(&outputs);

            let first_stroke = outputs.iter().find_map(|o| match o {
                EngineOutput::Stroke(event) => Some(event.index),
                _ => None,
            });
            assert!(first_stroke.is_none() || first_stroke == Some(1));
            pipeline.stop();
        }
    }

    // ============================================================================
    // CATEGORY 2: PATHOLOGICAL INPUT
    // ============================================================================

    /// NaN and infinite readings interleaved with valid data
    #[test]
    fn stress_non_finite_readings() {
        let mut pipeline = StrokePipeline::new(EngineConfig::default());
        pipeline.start(0).unwrap();

        let mut outputs = Vec::new();
        let mut bad = 0;
        for i in 0..5_000u64 {
            let accel = match i % 17 {
                3 => [f64::NAN, 0.0, 0.0],
                11 => [0.0, f64::INFINITY, 0.0],
                13 => [0.0, 0.0, f64::NEG_INFINITY],
                _ => [pulse_magnitude(i, 100), 0.0, 0.0],
            };
            if !accel.iter().all(|v| v.is_finite()) {
                bad += 1;
            }
            outputs.extend(pipeline.process_accel(&AccelReading::new(i * 20, accel)));
        }

        assert_outputs_sane(&outputs);
        assert_eq!(pipeline.rejected_readings(), bad);
        assert!(pipeline.metrics().stroke_count > 0);
    }

    /// Jittered and occasionally backwards timestamps
    #[test]
    fn stress_non_monotonic_timestamps() {
        let mut pipeline = StrokePipeline::new(EngineConfig::default());
        pipeline.start(0).unwrap();
        let mut rng = Lcg(7);

        let mut outputs = Vec::new();
        for i in 0..5_000u64 {
            let jitter = (rng.next_f64() * 8.0) as u64;
            let mut timestamp = i * 20 + jitter;
            if i % 97 == 0 && i > 0 {
                timestamp -= 500;
            }
            let reading = AccelReading::new(timestamp, [pulse_magnitude(i, 100), 0.0, 0.0]);
            outputs.extend(pipeline.process_accel(&reading));
        }

        assert_outputs_sane(&outputs);
        assert!(pipeline.rejected_readings() > 0);
    }

    /// Random noise with no rowing rhythm must stay quiet or at least sane
    #[test]
    fn stress_pure_noise() {
        let mut pipeline = StrokePipeline::new(EngineConfig::default());
        pipeline.start(0).unwrap();
        let mut rng = Lcg(1234);

        let mut outputs = Vec::new();
        for i in 0..10_000u64 {
            let accel = [rng.next_f64() - 0.5, rng.next_f64() - 0.5, rng.next_f64() - 0.5];
            outputs.extend(pipeline.process_accel(&AccelReading::new(i * 20, accel)));
        }

        assert_outputs_sane(&outputs);
    }

    /// Huge offsets and amplitudes
    #[test]
    fn stress_extreme_magnitudes() {
        let mut pipeline = StrokePipeline::new(EngineConfig::default());
        pipeline.start(0).unwrap();

        let mut outputs = Vec::new();
        for i in 0..2_000u64 {
            let m = 1e6 + 1e4 * pulse_magnitude(i, 100);
            outputs.extend(pipeline.process_accel(&AccelReading::new(i * 20, [m, 0.0, 0.0])));
        }

        assert_outputs_sane(&outputs);
        assert!((pipeline.metrics().stroke_rate.unwrap() - 30.0).abs() < 0.5);
    }

    /// GPS garbage: bad accuracy, NaN, repeated and reversed timestamps
    #[test]
    fn stress_gps_garbage() {
        let mut pipeline = StrokePipeline::new(EngineConfig::default());
        pipeline.start(0).unwrap();
        let mut rng = Lcg(99);

        let mut accepted = 0;
        for i in 0..2_000u64 {
            let fix = match i % 5 {
                0 => GpsFix::new(i * 1000, rng.next_f64() * 1e-3, 0.0, 3.0),
                1 => GpsFix::new(i * 1000, 0.0, 0.0, 500.0),
                2 => GpsFix::new(i * 1000, f64::NAN, 0.0, 3.0),
                3 => GpsFix::new(i.saturating_sub(10) * 1000, 0.0, 0.0, 3.0),
                _ => GpsFix::new(i * 1000, 0.0, 0.0, f64::NAN),
            };
            if let Some(EngineOutput::Distance(update)) = pipeline.process_gps(Some(&fix)) {
                assert!(update.total_distance_m.is_finite());
                assert!(update.speed_mps.is_finite());
                accepted += 1;
            }
        }

        assert_eq!(accepted, 400);
        assert!(pipeline.metrics().distance_m.is_finite());
    }

    // ============================================================================
    // CATEGORY 3: CONCURRENCY
    // ============================================================================

    /// Independent producers racing session control
    #[test]
    fn stress_concurrent_producers_and_restarts() {
        let service = Arc::new(
            StrokeService::new(EngineConfig {
                ingest_queue_capacity: 256,
                dispatch_queue_capacity: 64,
                ..EngineConfig::default()
            })
            .unwrap(),
        );
        let (listener, rx) = ChannelListener::pair();
        service.subscribe(listener).unwrap();
        service.start().unwrap();

        let accel = {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                for i in 0..20_000u64 {
                    service.add_accelerometer_reading([pulse_magnitude(i, 100), 0.0, 0.0], None);
                    if i % 500 == 0 {
                        thread::yield_now();
                    }
                }
            })
        };
        let gps = {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                for i in 0..2_000u64 {
                    service.add_gps_reading(Some(GpsFix::new(i * 100, i as f64 * 1e-6, 0.0, 5.0)));
                }
            })
        };

        for _ in 0..20 {
            thread::sleep(Duration::from_millis(5));
            service.stop();
            let _ = service.start();
        }

        accel.join().unwrap();
        gps.join().unwrap();
        service.stop();
        service.shutdown();

        // Within each session stroke indices run 1, 2, 3...
        let mut expected_next = 1;
        for callback in rx.try_iter() {
            if let Received::Stroke(event) = callback {
                if event.index == 1 {
                    expected_next = 1;
                }
                assert_eq!(event.index, expected_next);
                expected_next += 1;
            }
        }
        assert!(!service.is_recording());
    }

    /// A listener that is far slower than the producer
    #[test]
    fn stress_slow_subscriber_never_loses_strokes() {
        struct Slow {
            tx: crossbeam_channel::Sender<u64>,
        }

        impl crate::publisher::StrokeListener for Slow {
            fn on_new_acceleration_reading(&mut self, _magnitude: f64) {
                thread::sleep(Duration::from_micros(200));
            }

            fn on_stroke_taken(&mut self, event: StrokeEvent) {
                let _ = self.tx.send(event.index);
            }
        }

        let service = StrokeService::new(EngineConfig {
            ingest_queue_capacity: 100_000,
            dispatch_queue_capacity: 8,
            ..EngineConfig::default()
        })
        .unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        service.subscribe(Slow { tx }).unwrap();
        service.start().unwrap();

        for i in 0..3_000u64 {
            service.add_accelerometer_reading([pulse_magnitude(i, 100), 0.0, 0.0], Some(i * 20));
        }
        // Shutdown processes everything still queued before joining
        service.shutdown();
        let produced = service.metrics().stroke_count;
        assert!(produced > 20, "only {produced} strokes");

        let delivered: Vec<u64> = rx.try_iter().collect();
        assert_eq!(delivered, (1..=produced).collect::<Vec<_>>());
        assert!(service.dispatch_stats().dropped > 0);
    }
}
