//! Diesel model structs for the `readings` table.
//!
//! Important: migrations set up `readings` as a TimescaleDB hypertable with a
//! UNIQUE constraint on `(area, height, time)`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::readings)]
pub struct Reading {
    pub id: i64,
    pub area: String,
    pub height: String,
    pub time: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub soil_temperature: Option<f64>,
    pub soil_humidity: Option<f64>,
    pub owner: Option<String>,
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::readings)]
pub struct NewReading {
    pub area: String,
    pub height: String,
    pub time: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub soil_temperature: Option<f64>,
    pub soil_humidity: Option<f64>,
    pub owner: Option<String>,
    pub group_name: Option<String>,
}

impl NewReading {
    /// A synthetic reading produced by the gap-fill engine.
    ///
    /// Only temperature is interpolated; the other sensor fields stay unset.
    /// Attribution is inherited from the anchor record, never from the new
    /// reading that triggered the fill.
    pub fn interpolated(anchor: &Reading, time: DateTime<Utc>, temperature: f64) -> Self {
        NewReading {
            area: anchor.area.clone(),
            height: anchor.height.clone(),
            time,
            temperature,
            humidity: None,
            soil_temperature: None,
            soil_humidity: None,
            owner: anchor.owner.clone(),
            group_name: anchor.group_name.clone(),
        }
    }
}
