//! Synthetic sensor traffic for local development.
//!
//! Emits an irregular-cadence temperature stream for a handful of field
//! locations through the normal ingestion path, so the gap-fill engine is
//! exercised end to end against a live database. Deterministic: the RNG is
//! seeded with a constant.

use crate::services::gapfill::FillConfig;
use crate::services::ingest::{IncomingReading, ingest_reading};
use crate::services::store::ReadingStore;
use chrono::{DateTime, Duration, Timelike, Utc};
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

const HISTORY_HOURS: i64 = 12;
const OWNER: &str = "fake-sensor";
const GROUP: &str = "demo-farm";
const LOCATIONS: [(&str, &str); 4] = [
    ("paddock-a", "0.5m"),
    ("paddock-a", "1.5m"),
    ("paddock-b", "1.5m"),
    ("greenhouse-1", "3.0m"),
];

pub fn run(store: &mut dyn ReadingStore, fill_cfg: &FillConfig) -> Result<(), String> {
    let end = Utc::now();
    let start = end - Duration::hours(HISTORY_HOURS);
    let mut rng = SmallRng::seed_from_u64(0x5EED_F1E1D_DA7A);

    info!(
        "Fake data: generating {}h of readings for {} location(s)",
        HISTORY_HOURS,
        LOCATIONS.len()
    );

    let mut stored = 0usize;
    let mut synthesized = 0usize;

    for (area, height) in LOCATIONS {
        let mut ts = start + Duration::seconds(rng.random_range(0..300));
        let mut temperature = rng.random_range(12.0..18.0);

        while ts < end {
            temperature = step_temperature(ts, temperature, &mut rng);
            let reading = IncomingReading {
                area: area.to_string(),
                height: height.to_string(),
                time: ts,
                temperature,
                humidity: Some(rng.random_range(35.0..70.0)),
                soil_temperature: Some(temperature - rng.random_range(1.0..4.0)),
                soil_humidity: Some(rng.random_range(20.0..45.0)),
                owner: Some(OWNER.to_string()),
                group_name: Some(GROUP.to_string()),
            };

            let outcome = ingest_reading(store, reading, fill_cfg)
                .map_err(|e| format!("fake data ingest for ({}, {}) failed: {}", area, height, e))?;
            if outcome.stored {
                stored += 1;
                synthesized += outcome.synthesized;
            }

            // Irregular cadence; the occasional long dropout gives the
            // gap-fill engine real work.
            let gap_minutes = if rng.random_bool(0.15) {
                rng.random_range(10..45)
            } else {
                rng.random_range(1..6)
            };
            ts += Duration::minutes(gap_minutes) + Duration::seconds(rng.random_range(0..60));
        }
    }

    info!(
        "Fake data: complete (readings={}, interpolated={})",
        stored, synthesized
    );
    Ok(())
}

fn step_temperature(ts: DateTime<Utc>, current: f64, rng: &mut SmallRng) -> f64 {
    let day_fraction = ts.time().num_seconds_from_midnight() as f64 / 86_400.0;
    let diurnal_pull = 15.0 + ((day_fraction - 0.3) * 2.0 * PI).sin() * 6.0;
    let drift = (diurnal_pull - current) * 0.2;
    let noise = rng.random_range(-0.6..=0.6);
    (current + drift + noise).clamp(-5.0, 40.0)
}
