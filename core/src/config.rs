//! Process-wide configuration, built once at startup and passed by
//! reference to every component.

use crate::{
    error::{SimError, SimResult},
    role::Role,
    types::{EntityId, Tick, FULL_TIME},
};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub bus:          BusSettings,
    pub store:        StoreSettings,
    pub topics:       TopicLayout,
    pub match_clock:  MatchSettings,
    pub roster:       Vec<RosterEntry>,
    /// Fixed RNG seed. `None` seeds from the wall clock.
    pub seed:         Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Endpoint name for logs. The in-process broker never opens a socket.
    pub host:               String,
    pub port:               u16,
    /// Capacity of the publish queue and of every subscription queue.
    pub queue_capacity:     usize,
    /// How long a publish or a delivery may wait on a full queue.
    pub publish_timeout_ms: u64,
    pub retry:              RetryPolicy,
}

/// Bounded retry with exponential backoff for transient bus failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts:       u32,
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Directory holding the database file, or `:memory:`.
    pub endpoint:          String,
    pub database_name:     String,
    pub collection_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicLayout {
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    /// Last tick played; the driver runs 0..=final_tick.
    pub final_tick:         Tick,
    pub tick_interval_ms:   u64,
    /// Fatigue applies strictly after this tick.
    pub late_match_after:   Tick,
    /// Offset stamped on record timestamps (Rome summer time by default).
    pub utc_offset_seconds: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub entity_id: EntityId,
    pub role:      Role,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            bus:         BusSettings::default(),
            store:       StoreSettings::default(),
            topics:      TopicLayout::default(),
            match_clock: MatchSettings::default(),
            roster:      default_roster(),
            seed:        None,
        }
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            host:               "localhost".to_string(),
            port:               1883,
            queue_capacity:     1024,
            publish_timeout_ms: 250,
            retry:              RetryPolicy::default(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 50 }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            endpoint:          ".".to_string(),
            database_name:     "footballDB".to_string(),
            collection_prefix: "simulations".to_string(),
        }
    }
}

impl Default for TopicLayout {
    fn default() -> Self {
        Self { root: "football/players".to_string() }
    }
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            final_tick:         FULL_TIME,
            tick_interval_ms:   1000,
            late_match_after:   80,
            utc_offset_seconds: 2 * 3600,
        }
    }
}

/// One goalkeeper, four defenders, three midfielders, three forwards.
fn default_roster() -> Vec<RosterEntry> {
    (1..=11)
        .map(|entity_id| {
            let role = match entity_id {
                1      => Role::Portiere,
                2..=5  => Role::Difensore,
                6..=8  => Role::Centrocampista,
                _      => Role::Attaccante,
            };
            RosterEntry { entity_id, role }
        })
        .collect()
}

impl TelemetryConfig {
    /// Read a JSON config file. Missing keys fall back to the defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        let config: TelemetryConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with no pacing and a private in-memory store named `db_name`.
    pub fn default_test(db_name: &str) -> Self {
        let mut config = Self::default();
        config.match_clock.tick_interval_ms = 0;
        config.store.endpoint = StoreSettings::MEMORY.to_string();
        config.store.database_name = db_name.to_string();
        config.seed = Some(0x5EED);
        config
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.roster.is_empty() {
            return Err(invalid("roster is empty"));
        }
        let mut seen = HashSet::new();
        for entry in &self.roster {
            if entry.entity_id == 0 {
                return Err(invalid("entity ids start at 1"));
            }
            if !seen.insert(entry.entity_id) {
                return Err(invalid(format!("entity {} appears twice", entry.entity_id)));
            }
        }
        if self.match_clock.final_tick > FULL_TIME {
            return Err(invalid(format!(
                "final tick {} is past full time ({FULL_TIME})",
                self.match_clock.final_tick
            )));
        }
        if !is_identifier(&self.store.collection_prefix) {
            return Err(invalid(format!(
                "collection prefix '{}' must be [A-Za-z0-9_]+",
                self.store.collection_prefix
            )));
        }
        if self.bus.queue_capacity == 0 {
            return Err(invalid("bus queue capacity must be positive"));
        }
        if self.bus.retry.max_attempts == 0 {
            return Err(invalid("retry policy needs at least one attempt"));
        }
        self.timezone()?;
        Ok(())
    }

    pub fn timezone(&self) -> SimResult<FixedOffset> {
        FixedOffset::east_opt(self.match_clock.utc_offset_seconds).ok_or_else(|| {
            invalid(format!(
                "utc offset {}s is out of range",
                self.match_clock.utc_offset_seconds
            ))
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.match_clock.tick_interval_ms)
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.roster.iter().map(|e| e.entity_id).collect()
    }
}

impl BusSettings {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based): 1x, 2x, 4x, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

impl StoreSettings {
    pub const MEMORY: &'static str = ":memory:";

    /// SQLite path or URI for the configured database.
    ///
    /// In-memory databases use a shared-cache URI so the driver and the
    /// aggregator can hold separate connections to the same data.
    pub fn database_uri(&self) -> String {
        if self.endpoint == Self::MEMORY {
            format!("file:{}?mode=memory&cache=shared", self.database_name)
        } else {
            Path::new(&self.endpoint)
                .join(format!("{}.db", self.database_name))
                .to_string_lossy()
                .into_owned()
        }
    }
}

impl TopicLayout {
    fn player(&self, entity_id: EntityId, leaf: &str) -> String {
        format!("{}/{entity_id}/{leaf}", self.root)
    }

    pub fn sensors(&self, entity_id: EntityId) -> String {
        self.player(entity_id, "sensors")
    }

    pub fn coordinates(&self, entity_id: EntityId) -> String {
        self.player(entity_id, "sensors/coordinates")
    }

    pub fn blood_pressure(&self, entity_id: EntityId) -> String {
        self.player(entity_id, "sensors/blood_pressure")
    }

    pub fn average_velocity(&self, entity_id: EntityId) -> String {
        self.player(entity_id, "realtime/average_velocity")
    }

    pub fn distance_traveled(&self, entity_id: EntityId) -> String {
        self.player(entity_id, "realtime/distance_traveled")
    }

    pub fn calories_consumed(&self, entity_id: EntityId) -> String {
        self.player(entity_id, "realtime/calories_consumed")
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid(reason: impl Into<String>) -> SimError {
    SimError::InvalidConfig { reason: reason.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roster_has_eleven_players_over_all_roles() {
        let config = TelemetryConfig::default();
        assert_eq!(config.roster.len(), 11);
        for role in Role::ALL {
            assert!(config.roster.iter().any(|e| e.role == role), "{role} missing");
        }
        config.validate().unwrap();
    }

    #[test]
    fn duplicate_entity_is_rejected() {
        let mut config = TelemetryConfig::default();
        config.roster.push(RosterEntry { entity_id: 3, role: Role::Attaccante });
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig { .. })));
    }

    #[test]
    fn final_tick_past_full_time_is_rejected() {
        let mut config = TelemetryConfig::default();
        config.match_clock.final_tick = 91;
        assert!(config.validate().is_err());
    }

    #[test]
    fn topic_templates() {
        let topics = TopicLayout::default();
        assert_eq!(topics.sensors(4), "football/players/4/sensors");
        assert_eq!(topics.coordinates(4), "football/players/4/sensors/coordinates");
        assert_eq!(topics.distance_traveled(11), "football/players/11/realtime/distance_traveled");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: TelemetryConfig =
            serde_json::from_str(r#"{ "seed": 9, "store": { "database_name": "x" } }"#).unwrap();
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.store.database_name, "x");
        assert_eq!(config.store.collection_prefix, "simulations");
        assert_eq!(config.roster.len(), 11);
    }

    #[test]
    fn unknown_role_in_roster_fails_to_parse() {
        let json = r#"{ "roster": [ { "entity_id": 1, "role": "libero" } ] }"#;
        assert!(serde_json::from_str::<TelemetryConfig>(json).is_err());
    }

    #[test]
    fn backoff_doubles() {
        let retry = RetryPolicy { max_attempts: 4, initial_backoff_ms: 10 };
        assert_eq!(retry.backoff(1), Duration::from_millis(10));
        assert_eq!(retry.backoff(3), Duration::from_millis(40));
    }

    #[test]
    fn memory_store_uses_shared_cache_uri() {
        let config = TelemetryConfig::default_test("cfgtest");
        assert_eq!(config.store.database_uri(), "file:cfgtest?mode=memory&cache=shared");
    }
}
