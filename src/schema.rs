//! Handwritten Diesel schema declaration used by model structs.
//!
//! Migrations define the actual table and constraints. This module only
//! provides the `diesel::table!` declaration so we can derive
//! Insertable/Queryable in a type-safe way without running
//! `diesel print-schema`.

// TimescaleDB hypertable (intended): per-location sensor readings.
// Uniqueness on (area, height, time) is enforced by the migration and is
// the authoritative duplicate guard for the gap-fill engine.
diesel::table! {
    readings (id) {
        id -> BigInt,
        area -> Text,
        height -> Text,
        time -> Timestamptz,
        temperature -> Double,
        humidity -> Nullable<Double>,
        soil_temperature -> Nullable<Double>,
        soil_humidity -> Nullable<Double>,
        owner -> Nullable<Text>,
        group_name -> Nullable<Text>,
    }
}
