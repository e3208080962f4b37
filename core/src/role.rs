//! Role archetypes and the value envelope each one draws from.
//!
//! The role is the only source of structural variation in the metric
//! model: every bounded field of a telemetry record is drawn from the
//! envelope of the athlete's role.

use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Portiere,
    Difensore,
    Centrocampista,
    Attaccante,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Portiere,
        Role::Difensore,
        Role::Centrocampista,
        Role::Attaccante,
    ];

    /// The wire tag, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portiere       => "portiere",
            Self::Difensore      => "difensore",
            Self::Centrocampista => "centrocampista",
            Self::Attaccante     => "attaccante",
        }
    }

    pub fn envelope(&self) -> &'static RoleEnvelope {
        match self {
            Self::Portiere       => &PORTIERE,
            Self::Difensore      => &DIFENSORE,
            Self::Centrocampista => &CENTROCAMPISTA,
            Self::Attaccante     => &ATTACCANTE,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = SimError;

    fn from_str(tag: &str) -> SimResult<Self> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == tag)
            .ok_or_else(|| SimError::UnknownRole { tag: tag.to_string() })
    }
}

/// A closed `[min, max]` interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> Span<T> {
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: T) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Declared value ranges for one role.
///
/// Position bands overlap between roles on purpose (zones of play share
/// the middle of the pitch); the auxiliary `tag` bands never overlap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleEnvelope {
    pub heart_rate:       Span<u32>,
    pub body_temperature: Span<f64>,
    pub systolic:         Span<u32>,
    pub diastolic:        Span<u32>,
    pub calories:         Span<f64>,
    pub x:                Span<u32>,
    pub y:                Span<u32>,
    pub velocity:         Span<f64>,
    pub tag:              Span<u32>,
}

const HEART_RATE: Span<u32> = Span::new(120, 180);
const BODY_TEMPERATURE: Span<f64> = Span::new(35.5, 38.0);
const SYSTOLIC: Span<u32> = Span::new(170, 230);
const DIASTOLIC: Span<u32> = Span::new(75, 95);

const PORTIERE: RoleEnvelope = RoleEnvelope {
    heart_rate:       HEART_RATE,
    body_temperature: BODY_TEMPERATURE,
    systolic:         SYSTOLIC,
    diastolic:        DIASTOLIC,
    calories:         Span::new(10.0, 13.0),
    x:                Span::new(0, 30),
    y:                Span::new(25, 40),
    velocity:         Span::new(0.0, 6.0),
    tag:              Span::new(0, 700),
};

const DIFENSORE: RoleEnvelope = RoleEnvelope {
    heart_rate:       HEART_RATE,
    body_temperature: BODY_TEMPERATURE,
    systolic:         SYSTOLIC,
    diastolic:        DIASTOLIC,
    calories:         Span::new(10.0, 20.0),
    x:                Span::new(5, 52),
    y:                Span::new(0, 65),
    velocity:         Span::new(0.0, 15.0),
    tag:              Span::new(701, 1706),
};

const CENTROCAMPISTA: RoleEnvelope = RoleEnvelope {
    heart_rate:       HEART_RATE,
    body_temperature: BODY_TEMPERATURE,
    systolic:         SYSTOLIC,
    diastolic:        DIASTOLIC,
    calories:         Span::new(10.0, 20.0),
    x:                Span::new(30, 80),
    y:                Span::new(0, 65),
    velocity:         Span::new(0.0, 17.0),
    tag:              Span::new(1707, 3411),
};

const ATTACCANTE: RoleEnvelope = RoleEnvelope {
    heart_rate:       HEART_RATE,
    body_temperature: BODY_TEMPERATURE,
    systolic:         SYSTOLIC,
    diastolic:        DIASTOLIC,
    calories:         Span::new(10.0, 20.0),
    x:                Span::new(50, 105),
    y:                Span::new(5, 60),
    velocity:         Span::new(0.0, 17.0),
    tag:              Span::new(3412, 6824),
};
