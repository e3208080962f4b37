//! Telemetry generator: (entity, role, elapsed tick) -> one record.
//!
//! Stateless apart from the injected `RandomSource`. Each field is drawn
//! uniformly from the role's envelope; human-facing reals are rounded to
//! one decimal. Past the late-match threshold the athlete tires: heart
//! rate is scaled up and velocity scaled down.

use crate::{
    config::TelemetryConfig,
    error::SimResult,
    record::{BloodPressure, Calories, Gps, HeartRate, TelemetryRecord, Temperature},
    rng::RandomSource,
    role::Role,
    types::{EntityId, Tick},
};
use chrono::{DateTime, FixedOffset, Utc};

pub const LATE_MATCH_HEART_RATE: f64 = 1.1;
pub const LATE_MATCH_VELOCITY: f64 = 0.5;

/// Multipliers applied to the raw heart-rate and velocity draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FatigueModifier {
    pub heart_rate: f64,
    pub velocity:   f64,
}

impl FatigueModifier {
    pub const FRESH: Self = Self { heart_rate: 1.0, velocity: 1.0 };
    pub const LATE_MATCH: Self = Self {
        heart_rate: LATE_MATCH_HEART_RATE,
        velocity:   LATE_MATCH_VELOCITY,
    };

    pub fn at(elapsed: Tick, late_match_after: Tick) -> Self {
        if elapsed > late_match_after {
            Self::LATE_MATCH
        } else {
            Self::FRESH
        }
    }
}

pub struct TelemetryGenerator {
    late_match_after: Tick,
    timezone:         FixedOffset,
}

impl TelemetryGenerator {
    pub fn new(config: &TelemetryConfig) -> SimResult<Self> {
        Ok(Self {
            late_match_after: config.match_clock.late_match_after,
            timezone:         config.timezone()?,
        })
    }

    /// Generate a record stamped with the current wall-clock time.
    pub fn generate(
        &self,
        entity_id: EntityId,
        role: Role,
        elapsed: Tick,
        rng: &mut impl RandomSource,
    ) -> TelemetryRecord {
        let now = Utc::now().with_timezone(&self.timezone);
        self.generate_at(entity_id, role, elapsed, now, rng)
    }

    pub fn generate_at(
        &self,
        entity_id: EntityId,
        role: Role,
        elapsed: Tick,
        timestamp: DateTime<FixedOffset>,
        rng: &mut impl RandomSource,
    ) -> TelemetryRecord {
        let env = role.envelope();
        let fatigue = FatigueModifier::at(elapsed, self.late_match_after);

        // Integer scaling truncates, so a fresh 180 bpm tires to 198.
        let raw_heart_rate = rng.int_inclusive(env.heart_rate.min, env.heart_rate.max);
        let heart_rate = (f64::from(raw_heart_rate) * fatigue.heart_rate) as u32;

        let body_temperature =
            round1(rng.uniform(env.body_temperature.min, env.body_temperature.max));
        let systolic = rng.int_inclusive(env.systolic.min, env.systolic.max);
        let diastolic = rng.int_inclusive(env.diastolic.min, env.diastolic.max);
        let calories = round1(rng.uniform(env.calories.min, env.calories.max));

        let x = rng.int_inclusive(env.x.min, env.x.max);
        let y = rng.int_inclusive(env.y.min, env.y.max);
        let velocity = round1(rng.uniform(env.velocity.min, env.velocity.max) * fatigue.velocity);
        let unic = rng.int_inclusive(env.tag.min, env.tag.max);

        TelemetryRecord {
            entity_id,
            role,
            heart_rate:        HeartRate { heart_rate },
            temperature:       Temperature { body_temperature },
            blood_pressure:    BloodPressure { systolic, diastolic },
            calories_consumed: Calories { calories },
            gps:               Gps { x, y, velocity, unic },
            timestamp,
            elapsed_time:      elapsed,
        }
    }
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
