//! Record store adapter for the `readings` table.
//!
//! The gap-fill engine only talks to the store through the [`ReadingStore`]
//! trait, so it can be driven by the Postgres-backed implementation in
//! production and an in-memory map in tests. All write paths are
//! conflict-skipping against the `(area, height, time)` uniqueness
//! constraint; a concurrent insert at the same slot degrades to a no-op
//! instead of an error.

use crate::db::models::{NewReading, Reading};
use crate::schema;
use chrono::{DateTime, Utc};
use core::fmt;
use diesel::prelude::*;
use diesel::PgConnection;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum StoreError {
    /// The record store could not be reached or the query failed.
    Unavailable(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(s) => write!(f, "record store unavailable: {}", s),
        }
    }
}

impl Error for StoreError {}

pub trait ReadingStore {
    /// The most recent reading for the location strictly before `before`.
    fn find_latest_before(
        &mut self,
        area: &str,
        height: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<Reading>, StoreError>;

    fn exists_at(&mut self, area: &str, height: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Batch existence check: which of `candidates` already hold a reading
    /// for the location.
    fn existing_timestamps_in(
        &mut self,
        area: &str,
        height: &str,
        candidates: &[DateTime<Utc>],
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError>;

    /// Insert a single reading; returns `false` when a uniqueness conflict
    /// on `(area, height, time)` caused the row to be skipped.
    fn insert_one(&mut self, row: &NewReading) -> Result<bool, StoreError>;

    /// Insert a batch of readings, returning the number actually written.
    /// With `skip_conflicts`, a uniqueness conflict is a per-row no-op
    /// rather than a failure of the whole batch.
    fn insert_many(&mut self, rows: &[NewReading], skip_conflicts: bool) -> Result<usize, StoreError>;
}

pub struct PgReadingStore<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> PgReadingStore<'a> {
    pub fn new(conn: &'a mut PgConnection) -> Self {
        PgReadingStore { conn }
    }
}

impl ReadingStore for PgReadingStore<'_> {
    fn find_latest_before(
        &mut self,
        area: &str,
        height: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<Reading>, StoreError> {
        use schema::readings::dsl as R;

        R::readings
            .filter(R::area.eq(area).and(R::height.eq(height)).and(R::time.lt(before)))
            .order(R::time.desc())
            .first(self.conn)
            .optional()
            .map_err(|e| StoreError::Unavailable(format!("query latest reading failed: {}", e)))
    }

    fn exists_at(&mut self, area: &str, height: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        use schema::readings::dsl as R;

        diesel::select(diesel::dsl::exists(
            R::readings.filter(R::area.eq(area).and(R::height.eq(height)).and(R::time.eq(at))),
        ))
        .get_result(self.conn)
        .map_err(|e| StoreError::Unavailable(format!("reading existence check failed: {}", e)))
    }

    fn existing_timestamps_in(
        &mut self,
        area: &str,
        height: &str,
        candidates: &[DateTime<Utc>],
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError> {
        use schema::readings::dsl as R;

        if candidates.is_empty() {
            return Ok(BTreeSet::new());
        }

        R::readings
            .filter(
                R::area
                    .eq(area)
                    .and(R::height.eq(height))
                    .and(R::time.eq_any(candidates)),
            )
            .select(R::time)
            .load::<DateTime<Utc>>(self.conn)
            .map(|times| times.into_iter().collect())
            .map_err(|e| StoreError::Unavailable(format!("query existing timestamps failed: {}", e)))
    }

    fn insert_one(&mut self, row: &NewReading) -> Result<bool, StoreError> {
        use schema::readings::dsl as R;

        diesel::insert_into(R::readings)
            .values(row)
            .on_conflict((R::area, R::height, R::time))
            .do_nothing()
            .execute(self.conn)
            .map(|count| count > 0)
            .map_err(|e| StoreError::Unavailable(format!("insert reading failed: {}", e)))
    }

    fn insert_many(&mut self, rows: &[NewReading], skip_conflicts: bool) -> Result<usize, StoreError> {
        use schema::readings::dsl as R;

        if rows.is_empty() {
            return Ok(0);
        }

        let result = if skip_conflicts {
            diesel::insert_into(R::readings)
                .values(rows)
                .on_conflict((R::area, R::height, R::time))
                .do_nothing()
                .execute(self.conn)
        } else {
            diesel::insert_into(R::readings).values(rows).execute(self.conn)
        };

        result
            .map(|count| count as usize)
            .map_err(|e| StoreError::Unavailable(format!("insert reading batch failed: {}", e)))
    }
}

/// In-memory store used by the engine and ingest tests.
#[cfg(test)]
pub(crate) struct MemoryStore {
    rows: std::collections::BTreeMap<(String, String, DateTime<Utc>), Reading>,
    next_id: i64,
    /// When set, read operations fail as if the database were down.
    pub fail_reads: bool,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            rows: std::collections::BTreeMap::new(),
            next_id: 1,
            fail_reads: false,
        }
    }

    pub fn readings_for(&self, area: &str, height: &str) -> Vec<&Reading> {
        self.rows
            .values()
            .filter(|r| r.area == area && r.height == height)
            .collect()
    }

    pub fn get(&self, area: &str, height: &str, at: DateTime<Utc>) -> Option<&Reading> {
        self.rows.get(&(area.to_string(), height.to_string(), at))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn store_row(&mut self, row: &NewReading) -> bool {
        let key = (row.area.clone(), row.height.clone(), row.time);
        if self.rows.contains_key(&key) {
            return false;
        }
        let reading = Reading {
            id: self.next_id,
            area: row.area.clone(),
            height: row.height.clone(),
            time: row.time,
            temperature: row.temperature,
            humidity: row.humidity,
            soil_temperature: row.soil_temperature,
            soil_humidity: row.soil_humidity,
            owner: row.owner.clone(),
            group_name: row.group_name.clone(),
        };
        self.next_id += 1;
        self.rows.insert(key, reading);
        true
    }
}

#[cfg(test)]
impl ReadingStore for MemoryStore {
    fn find_latest_before(
        &mut self,
        area: &str,
        height: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<Reading>, StoreError> {
        self.check_reads()?;
        Ok(self
            .rows
            .values()
            .filter(|r| r.area == area && r.height == height && r.time < before)
            .max_by_key(|r| r.time)
            .cloned())
    }

    fn exists_at(&mut self, area: &str, height: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check_reads()?;
        Ok(self.rows.contains_key(&(area.to_string(), height.to_string(), at)))
    }

    fn existing_timestamps_in(
        &mut self,
        area: &str,
        height: &str,
        candidates: &[DateTime<Utc>],
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError> {
        self.check_reads()?;
        Ok(candidates
            .iter()
            .copied()
            .filter(|at| self.rows.contains_key(&(area.to_string(), height.to_string(), *at)))
            .collect())
    }

    fn insert_one(&mut self, row: &NewReading) -> Result<bool, StoreError> {
        Ok(self.store_row(row))
    }

    fn insert_many(&mut self, rows: &[NewReading], skip_conflicts: bool) -> Result<usize, StoreError> {
        let mut written = 0;
        for row in rows {
            if self.store_row(row) {
                written += 1;
            } else if !skip_conflicts {
                return Err(StoreError::Unavailable(format!(
                    "duplicate key (area, height, time) = ({}, {}, {})",
                    row.area, row.height, row.time
                )));
            }
        }
        Ok(written)
    }
}
