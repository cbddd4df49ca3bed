//! Gap-fill engine: interpolates synthetic readings between a newly ingested
//! reading and the latest prior reading for the same `(area, height)`
//! location.
//!
//! Two modes share the anchor lookup and interval validation:
//! - [`FillMode::Midpoint`]: at most one synthetic reading at the temporal
//!   midpoint of the gap.
//! - [`FillMode::FixedInterval`]: a synthetic reading at every multiple of
//!   the configured interval strictly inside the gap, skipping slots that
//!   already hold a record.
//!
//! Only temperature is interpolated (linearly). Vacuous outcomes (no prior
//! reading, non-forward time, occupied slots) are silent no-ops; only a
//! store failure propagates.

use crate::db::models::{NewReading, Reading};
use crate::services::store::{ReadingStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::num::NonZeroU32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    Midpoint,
    FixedInterval,
}

impl FillMode {
    pub fn parse(s: &str) -> Option<FillMode> {
        match s {
            "midpoint" => Some(FillMode::Midpoint),
            "fixed-interval" | "fixed_interval" => Some(FillMode::FixedInterval),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FillConfig {
    pub mode: FillMode,
    /// Spacing of synthetic readings in fixed-interval mode, in minutes.
    pub interval: NonZeroU32,
}

impl Default for FillConfig {
    fn default() -> Self {
        FillConfig {
            mode: FillMode::FixedInterval,
            interval: NonZeroU32::MIN,
        }
    }
}

/// Fill the gap between the latest reading before `new_time` and the reading
/// at `new_time` for the given location. Returns the number of synthetic
/// readings written.
///
/// Callers are expected to have persisted the reading at `new_time` already;
/// the anchor lookup is strictly-before, so the new reading never anchors
/// itself.
pub fn fill(
    store: &mut dyn ReadingStore,
    area: &str,
    height: &str,
    new_time: DateTime<Utc>,
    new_temperature: f64,
    cfg: &FillConfig,
) -> Result<usize, StoreError> {
    let Some(anchor) = store.find_latest_before(area, height, new_time)? else {
        // First reading for this location; there is no interval to fill.
        return Ok(0);
    };

    let delta = new_time - anchor.time;
    if delta <= Duration::zero() {
        // Replayed, duplicate or out-of-order insert; interpolation is
        // undefined for non-forward time.
        return Ok(0);
    }

    let written = match cfg.mode {
        FillMode::Midpoint => fill_midpoint(store, &anchor, new_temperature, delta)?,
        FillMode::FixedInterval => {
            fill_fixed_interval(store, &anchor, new_temperature, delta, i64::from(cfg.interval.get()))?
        }
    };

    if written > 0 {
        debug!(
            "Gap fill: ({}, {}) gap of {}s before {} filled with {} reading(s)",
            area,
            height,
            delta.num_seconds(),
            new_time,
            written
        );
    }
    Ok(written)
}

fn fill_midpoint(
    store: &mut dyn ReadingStore,
    anchor: &Reading,
    new_temperature: f64,
    delta: Duration,
) -> Result<usize, StoreError> {
    let midpoint = anchor.time + delta / 2;
    if store.exists_at(&anchor.area, &anchor.height, midpoint)? {
        // Interval already filled; re-deriving it must not duplicate.
        return Ok(0);
    }

    let temperature = (anchor.temperature + new_temperature) / 2.0;
    let row = NewReading::interpolated(anchor, midpoint, temperature);
    // insert_one skips on conflict, so a concurrent fill of the same
    // interval ends up as a no-op rather than a duplicate.
    let written = store.insert_one(&row)?;
    Ok(usize::from(written))
}

fn fill_fixed_interval(
    store: &mut dyn ReadingStore,
    anchor: &Reading,
    new_temperature: f64,
    delta: Duration,
    interval_minutes: i64,
) -> Result<usize, StoreError> {
    let total_minutes = delta.num_seconds() / 60;
    if total_minutes <= interval_minutes {
        // Gap too narrow to need anything beyond the endpoints.
        return Ok(0);
    }

    // Interpolate by fractional position i/total rather than accumulating a
    // per-step increment, so rounding error does not build up across the gap.
    let span = total_minutes as f64;
    let mut rows = Vec::with_capacity((total_minutes / interval_minutes) as usize);
    let mut offset = interval_minutes;
    while offset < total_minutes {
        let time = anchor.time + Duration::minutes(offset);
        let temperature = anchor.temperature + (new_temperature - anchor.temperature) * (offset as f64 / span);
        rows.push(NewReading::interpolated(anchor, time, temperature));
        offset += interval_minutes;
    }

    let candidates: Vec<DateTime<Utc>> = rows.iter().map(|r| r.time).collect();
    let occupied = store.existing_timestamps_in(&anchor.area, &anchor.height, &candidates)?;
    if !occupied.is_empty() {
        rows.retain(|r| !occupied.contains(&r.time));
    }

    store.insert_many(&rows, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;
    use chrono::TimeZone;

    fn minute(m: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(m)
    }

    fn seed(store: &mut MemoryStore, area: &str, height: &str, time: DateTime<Utc>, temperature: f64) {
        let row = NewReading {
            area: area.to_string(),
            height: height.to_string(),
            time,
            temperature,
            humidity: Some(61.0),
            soil_temperature: Some(14.2),
            soil_humidity: Some(33.0),
            owner: Some("kim".to_string()),
            group_name: Some("farm-7".to_string()),
        };
        assert!(store.insert_one(&row).unwrap());
    }

    fn midpoint_cfg() -> FillConfig {
        FillConfig {
            mode: FillMode::Midpoint,
            interval: NonZeroU32::MIN,
        }
    }

    fn interval_cfg(minutes: u32) -> FillConfig {
        FillConfig {
            mode: FillMode::FixedInterval,
            interval: NonZeroU32::new(minutes).unwrap(),
        }
    }

    /// Serves a pinned anchor regardless of store contents, standing in for
    /// a concurrent writer that inserted into the gap after our anchor
    /// lookup. Everything else passes through to the real store.
    struct StaleAnchorStore<'a> {
        inner: &'a mut MemoryStore,
        anchor: Reading,
    }

    impl ReadingStore for StaleAnchorStore<'_> {
        fn find_latest_before(
            &mut self,
            _area: &str,
            _height: &str,
            _before: DateTime<Utc>,
        ) -> Result<Option<Reading>, StoreError> {
            Ok(Some(self.anchor.clone()))
        }

        fn exists_at(&mut self, area: &str, height: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
            self.inner.exists_at(area, height, at)
        }

        fn existing_timestamps_in(
            &mut self,
            area: &str,
            height: &str,
            candidates: &[DateTime<Utc>],
        ) -> Result<std::collections::BTreeSet<DateTime<Utc>>, StoreError> {
            self.inner.existing_timestamps_in(area, height, candidates)
        }

        fn insert_one(&mut self, row: &NewReading) -> Result<bool, StoreError> {
            self.inner.insert_one(row)
        }

        fn insert_many(&mut self, rows: &[NewReading], skip_conflicts: bool) -> Result<usize, StoreError> {
            self.inner.insert_many(rows, skip_conflicts)
        }
    }

    #[test]
    fn no_prior_reading_fills_nothing() {
        let mut store = MemoryStore::new();
        for cfg in [midpoint_cfg(), interval_cfg(1)] {
            let written = fill(&mut store, "a", "1.5m", minute(10), 20.0, &cfg).unwrap();
            assert_eq!(written, 0);
        }
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn non_forward_time_fills_nothing() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a", "1.5m", minute(10), 18.0);
        for cfg in [midpoint_cfg(), interval_cfg(1)] {
            // Exactly-equal timestamp: the strictly-before anchor lookup
            // finds nothing older, so no interval exists.
            assert_eq!(fill(&mut store, "a", "1.5m", minute(10), 21.0, &cfg).unwrap(), 0);
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replayed_earliest_reading_fills_nothing() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a", "1.5m", minute(0), 10.0);
        seed(&mut store, "a", "1.5m", minute(10), 18.0);

        let written = fill(&mut store, "a", "1.5m", minute(0), 10.0, &midpoint_cfg()).unwrap();
        assert_eq!(written, 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn midpoint_inserts_single_interpolated_reading() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a", "1.5m", minute(0), 10.0);

        let written = fill(&mut store, "a", "1.5m", minute(10), 20.0, &midpoint_cfg()).unwrap();
        assert_eq!(written, 1);

        let row = store.get("a", "1.5m", minute(5)).expect("midpoint reading");
        assert_eq!(row.temperature, 15.0);
        assert_eq!(row.humidity, None);
        assert_eq!(row.soil_temperature, None);
        assert_eq!(row.soil_humidity, None);
        assert_eq!(row.owner.as_deref(), Some("kim"));
        assert_eq!(row.group_name.as_deref(), Some("farm-7"));
    }

    #[test]
    fn midpoint_handles_sub_minute_gaps() {
        let mut store = MemoryStore::new();
        let t0 = minute(0);
        seed(&mut store, "a", "1.5m", t0, 10.0);

        let written = fill(&mut store, "a", "1.5m", t0 + Duration::seconds(3), 11.0, &midpoint_cfg()).unwrap();
        assert_eq!(written, 1);

        let row = store
            .get("a", "1.5m", t0 + Duration::milliseconds(1500))
            .expect("midpoint at 1.5s");
        assert_eq!(row.temperature, 10.5);
    }

    #[test]
    fn midpoint_refill_never_duplicates_a_slot() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a", "1.5m", minute(0), 10.0);

        assert_eq!(fill(&mut store, "a", "1.5m", minute(10), 20.0, &midpoint_cfg()).unwrap(), 1);
        // The second identical call anchors on the synthetic reading at
        // minute 5 and halves the residual gap instead; the minute-5 slot
        // itself is never written twice.
        assert_eq!(fill(&mut store, "a", "1.5m", minute(10), 20.0, &midpoint_cfg()).unwrap(), 1);

        assert_eq!(store.get("a", "1.5m", minute(5)).unwrap().temperature, 15.0);
        let second = store
            .get("a", "1.5m", minute(5) + Duration::minutes(2) + Duration::seconds(30))
            .expect("midpoint of the residual gap");
        assert_eq!(second.temperature, 17.5);
        assert_eq!(store.readings_for("a", "1.5m").len(), 3);
    }

    #[test]
    fn midpoint_concurrent_fill_is_a_noop() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a", "1.5m", minute(0), 10.0);
        let anchor = store.get("a", "1.5m", minute(0)).unwrap().clone();
        // Another writer already filled the midpoint slot between our
        // anchor lookup and the write.
        seed(&mut store, "a", "1.5m", minute(5), 55.0);

        let mut racing = StaleAnchorStore {
            inner: &mut store,
            anchor,
        };
        assert_eq!(fill(&mut racing, "a", "1.5m", minute(10), 20.0, &midpoint_cfg()).unwrap(), 0);

        assert_eq!(store.get("a", "1.5m", minute(5)).unwrap().temperature, 55.0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn fixed_interval_linear_ramp() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a", "1.5m", minute(0), 10.0);

        let written = fill(&mut store, "a", "1.5m", minute(5), 20.0, &interval_cfg(1)).unwrap();
        assert_eq!(written, 4);

        for (m, expected) in [(1, 12.0), (2, 14.0), (3, 16.0), (4, 18.0)] {
            let row = store.get("a", "1.5m", minute(m)).expect("ramp reading");
            assert_eq!(row.temperature, expected);
            assert_eq!(row.humidity, None);
            assert_eq!(row.owner.as_deref(), Some("kim"));
        }
        // Neither endpoint is duplicated: the anchor keeps its value and the
        // new reading's own slot stays empty (the caller persists it).
        assert_eq!(store.get("a", "1.5m", minute(0)).unwrap().temperature, 10.0);
        assert!(store.get("a", "1.5m", minute(5)).is_none());
    }

    #[test]
    fn sub_interval_gap_is_skipped() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a", "1.5m", minute(0), 10.0);

        // One-minute gap with a one-minute interval: endpoints suffice.
        assert_eq!(fill(&mut store, "a", "1.5m", minute(1), 12.0, &interval_cfg(1)).unwrap(), 0);
        // 90s gap still floors to one minute.
        assert_eq!(
            fill(&mut store, "a", "1.5m", minute(0) + Duration::seconds(90), 12.0, &interval_cfg(1)).unwrap(),
            0
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn occupied_slots_are_skipped_but_rest_proceed() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a", "1.5m", minute(0), 10.0);
        let anchor = store.get("a", "1.5m", minute(0)).unwrap().clone();
        // A second writer lands a record inside the gap after our anchor
        // lookup; the pinned anchor keeps minute 0 as the interpolation base.
        seed(&mut store, "a", "1.5m", minute(2), 99.0);

        let mut racing = StaleAnchorStore {
            inner: &mut store,
            anchor,
        };
        let written = fill(&mut racing, "a", "1.5m", minute(5), 20.0, &interval_cfg(1)).unwrap();
        assert_eq!(written, 3);

        // The occupied slot keeps its original value; the rest of the batch
        // still interpolates from the minute-0 anchor.
        assert_eq!(store.get("a", "1.5m", minute(2)).unwrap().temperature, 99.0);
        assert_eq!(store.get("a", "1.5m", minute(1)).unwrap().temperature, 12.0);
        assert_eq!(store.get("a", "1.5m", minute(3)).unwrap().temperature, 16.0);
        assert_eq!(store.get("a", "1.5m", minute(4)).unwrap().temperature, 18.0);
    }

    #[test]
    fn fixed_interval_refill_is_idempotent() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a", "1.5m", minute(0), 10.0);

        assert_eq!(fill(&mut store, "a", "1.5m", minute(5), 20.0, &interval_cfg(1)).unwrap(), 4);
        // Re-deriving the interval anchors on the synthetic reading at
        // minute 4, leaving a sub-interval residual gap: a no-op.
        assert_eq!(fill(&mut store, "a", "1.5m", minute(5), 20.0, &interval_cfg(1)).unwrap(), 0);
        // 1 real anchor + 4 synthetic; the minute-5 reading itself is the
        // caller's to persist.
        assert_eq!(store.readings_for("a", "1.5m").len(), 5);
    }

    #[test]
    fn wider_interval_uses_fractional_position() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a", "1.5m", minute(0), 14.0);

        let written = fill(&mut store, "a", "1.5m", minute(7), 21.0, &interval_cfg(2)).unwrap();
        assert_eq!(written, 3);

        // Temperature follows i/total, with total = 7 minutes.
        for (m, expected) in [(2, 16.0), (4, 18.0), (6, 20.0)] {
            let row = store.get("a", "1.5m", minute(m)).expect("interval reading");
            assert_eq!(row.temperature, expected);
        }
        assert!(store.get("a", "1.5m", minute(1)).is_none());
    }

    #[test]
    fn locations_are_isolated() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a", "1.5m", minute(0), 10.0);
        seed(&mut store, "a", "3.0m", minute(0), 30.0);
        seed(&mut store, "b", "1.5m", minute(0), 50.0);

        let written = fill(&mut store, "a", "1.5m", minute(10), 20.0, &midpoint_cfg()).unwrap();
        assert_eq!(written, 1);

        // Anchor came from (a, 1.5m), not from the hotter neighbours.
        assert_eq!(store.get("a", "1.5m", minute(5)).unwrap().temperature, 15.0);
        assert_eq!(store.readings_for("a", "3.0m").len(), 1);
        assert_eq!(store.readings_for("b", "1.5m").len(), 1);
    }

    #[test]
    fn synthetic_reading_anchors_later_fills() {
        let mut store = MemoryStore::new();
        seed(&mut store, "a", "1.5m", minute(0), 10.0);
        assert_eq!(fill(&mut store, "a", "1.5m", minute(10), 20.0, &midpoint_cfg()).unwrap(), 1);

        // The midpoint at minute 5 is now the latest record before minute 12.
        assert_eq!(fill(&mut store, "a", "1.5m", minute(12), 18.0, &midpoint_cfg()).unwrap(), 1);
        let row = store
            .get("a", "1.5m", minute(5) + Duration::minutes(3) + Duration::seconds(30))
            .expect("second midpoint");
        assert_eq!(row.temperature, 16.5);
    }

    #[test]
    fn fill_mode_parsing() {
        assert_eq!(FillMode::parse("midpoint"), Some(FillMode::Midpoint));
        assert_eq!(FillMode::parse("fixed-interval"), Some(FillMode::FixedInterval));
        assert_eq!(FillMode::parse("fixed_interval"), Some(FillMode::FixedInterval));
        assert_eq!(FillMode::parse("cubic"), None);
    }
}
