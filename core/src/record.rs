//! Wire and storage shapes.
//!
//! A `TelemetryRecord` is self-describing (entity id and role embedded),
//! so no consumer needs a roster lookup to interpret one. The nested
//! layout is what dashboards subscribe to and what the run store keeps
//! as the payload column.

use crate::{
    role::Role,
    types::{EntityId, Tick},
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub entity_id:         EntityId,
    pub role:              Role,
    pub heart_rate:        HeartRate,
    pub temperature:       Temperature,
    pub blood_pressure:    BloodPressure,
    pub calories_consumed: Calories,
    pub gps:               Gps,
    pub timestamp:         DateTime<FixedOffset>,
    pub elapsed_time:      Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRate {
    pub heart_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub body_temperature: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloodPressure {
    pub systolic:  u32,
    pub diastolic: u32,
}

/// Energy expenditure for a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calories {
    pub calories: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gps {
    pub x:        u32,
    pub y:        u32,
    pub velocity: f64,
    /// Coarse role discriminator; bands are disjoint per role.
    pub unic:     u32,
}

// ── Relay projections ──────────────────────────────────────────

/// Position-only view published on the coordinates topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateFrame {
    pub entity_id: EntityId,
    pub role:      Role,
    pub gps:       Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

/// Vital-signs view published on the blood pressure topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloodPressureFrame {
    pub entity_id:      EntityId,
    pub blood_pressure: BloodPressure,
}

/// The subset of a sensor message the relay needs. Unknown fields are
/// ignored; any missing required field fails the decode.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorView {
    pub entity_id:      EntityId,
    pub role:           Role,
    pub gps:            Position,
    #[serde(default)]
    pub blood_pressure: Option<BloodPressure>,
}

// ── Aggregated metrics ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AverageVelocityMessage {
    pub average_velocity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceTraveledMessage {
    pub distance_traveled_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaloriesConsumedMessage {
    pub calories_consumed: f64,
}
