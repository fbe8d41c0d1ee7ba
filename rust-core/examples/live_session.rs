/// Live session example: two producer threads feed the service, a listener
/// prints rates and strokes as they are detected.
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stroke_sensing::{DistanceUpdate, EngineConfig, StrokeEvent, StrokeListener, StrokeService};

struct ConsolePrinter;

impl StrokeListener for ConsolePrinter {
    fn on_stroke_rate_update(&mut self, stroke_rate: f64) {
        println!("  rate     {stroke_rate:5.1} spm");
    }

    fn on_stroke_taken(&mut self, event: StrokeEvent) {
        println!(
            "  stroke #{:<3} at {:>6} ms  ({:.1} spm)",
            event.index, event.timestamp_ms, event.stroke_rate
        );
    }

    fn on_distance_update(&mut self, update: DistanceUpdate) {
        println!(
            "  distance {:6.1} m   speed {:.2} m/s",
            update.total_distance_m, update.speed_mps
        );
    }
}

/// Drive-phase pulse once per stroke on top of a small baseline.
fn rowing_accel(i: u64, period: u64) -> [f64; 3] {
    let phase = (i % period) as f64 - (period / 5) as f64;
    [0.2 + 3.0 * (-(phase * phase) / 32.0).exp(), 0.05, 0.0]
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Stroke Sensing Engine: Live Session ===\n");

    let service = Arc::new(StrokeService::new(EngineConfig::default())?);
    service.subscribe(ConsolePrinter)?;
    service.start()?;

    // Accelerometer at 50Hz, ~28 spm, replayed 10x faster than real time
    let accel = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            for i in 0..1500u64 {
                service.add_accelerometer_reading(rowing_accel(i, 107), Some(i * 20));
                thread::sleep(Duration::from_micros(2000));
            }
        })
    };

    // GPS at 1Hz, heading north at ~4 m/s
    let gps = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            for s in 0..30u64 {
                let fix = stroke_sensing::GpsFix::new(s * 1000, 51.5 + s as f64 * 3.6e-5, -0.12, 4.0);
                service.add_gps_reading(Some(fix));
                thread::sleep(Duration::from_millis(100));
            }
        })
    };

    accel.join().map_err(|_| "accelerometer producer panicked")?;
    gps.join().map_err(|_| "gps producer panicked")?;

    service.stop();
    let metrics = service.metrics();
    println!("\nStrokes:  {}", metrics.stroke_count);
    println!("Distance: {:.1} m", metrics.distance_m);
    println!("Dropped:  {}", service.dropped_readings());

    service.shutdown();
    Ok(())
}
