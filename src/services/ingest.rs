//! Reading ingestion: persist an incoming reading, then run the gap-fill
//! engine for its location.
//!
//! Gap filling is best-effort enrichment. Once the real reading is stored,
//! no gap-fill outcome (including a store failure) may fail the ingestion;
//! failures are logged and swallowed.

use crate::db::models::NewReading;
use crate::services::gapfill::{self, FillConfig};
use crate::services::store::{ReadingStore, StoreError};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Deserialize;
use std::io::BufRead;

/// Wire shape of a reading as submitted by a sensor, one JSON object per line.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingReading {
    pub area: String,
    pub height: String,
    pub time: DateTime<Utc>,
    pub temperature: f64,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub soil_temperature: Option<f64>,
    #[serde(default)]
    pub soil_humidity: Option<f64>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
}

impl IncomingReading {
    fn into_row(self) -> NewReading {
        NewReading {
            area: self.area,
            height: self.height,
            time: self.time,
            temperature: self.temperature,
            humidity: self.humidity,
            soil_temperature: self.soil_temperature,
            soil_humidity: self.soil_humidity,
            owner: self.owner,
            group_name: self.group_name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Whether the real reading was written (false on duplicate timestamp).
    pub stored: bool,
    /// Synthetic readings created by the gap-fill engine.
    pub synthesized: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
    pub stored: usize,
    pub rejected: usize,
    pub synthesized: usize,
    pub malformed: usize,
}

/// Persist one reading and fill the gap behind it.
///
/// A uniqueness conflict on `(area, height, time)` rejects the reading
/// outright; nothing is interpolated for a rejected reading. An error here
/// means the real reading itself could not be stored.
pub fn ingest_reading(
    store: &mut dyn ReadingStore,
    reading: IncomingReading,
    fill_cfg: &FillConfig,
) -> Result<IngestOutcome, StoreError> {
    let area = reading.area.clone();
    let height = reading.height.clone();
    let time = reading.time;
    let temperature = reading.temperature;

    // The real reading goes in first so it becomes the anchor for whatever
    // arrives after it.
    let stored = store.insert_one(&reading.into_row())?;
    if !stored {
        warn!("Ingest: duplicate reading for ({}, {}) at {} rejected", area, height, time);
        return Ok(IngestOutcome {
            stored: false,
            synthesized: 0,
        });
    }

    let synthesized = match gapfill::fill(store, &area, &height, time, temperature, fill_cfg) {
        Ok(n) => n,
        Err(e) => {
            warn!(
                "Ingest: gap fill for ({}, {}) at {} failed (reading kept): {}",
                area, height, time, e
            );
            0
        }
    };

    Ok(IngestOutcome {
        stored: true,
        synthesized,
    })
}

/// Ingest newline-delimited JSON readings from `reader` until EOF.
///
/// Malformed lines are logged with their JSON path and skipped; only a store
/// failure on the real-reading write path aborts the run.
pub fn run_stream<R: BufRead>(
    store: &mut dyn ReadingStore,
    reader: R,
    fill_cfg: &FillConfig,
) -> Result<IngestStats, String> {
    let mut stats = IngestStats::default();

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|e| format!("reading ingest stream failed at line {}: {}", line_no, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let mut de = serde_json::Deserializer::from_str(trimmed);
        let reading: IncomingReading = match serde_path_to_error::deserialize(&mut de) {
            Ok(r) => r,
            Err(e) => {
                warn!("Ingest: skipping malformed line {} (at `{}`): {}", line_no, e.path(), e);
                stats.malformed += 1;
                continue;
            }
        };

        let outcome = ingest_reading(store, reading, fill_cfg)
            .map_err(|e| format!("ingest at line {} failed: {}", line_no, e))?;
        if outcome.stored {
            stats.stored += 1;
            stats.synthesized += outcome.synthesized;
        } else {
            stats.rejected += 1;
        }
    }

    info!(
        "Ingest: stream complete (stored={}, synthesized={}, rejected={}, malformed={})",
        stats.stored, stats.synthesized, stats.rejected, stats.malformed
    );

    Ok(stats)
}
