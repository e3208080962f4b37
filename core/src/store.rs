//! SQLite persistence layer for runs.
//!
//! RULE: Only store.rs talks to the database.
//! A run is one table named `<prefix>_<run_id>`; the driver is its only
//! writer, the aggregation engine only reads it. Rows are append-only.

use crate::{
    config::{is_identifier, StoreSettings},
    error::{SimError, SimResult},
    record::TelemetryRecord,
    types::{EntityId, RunId, Tick},
};
use chrono::{DateTime, FixedOffset};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REGISTRY_TABLE: &str = "run_registry";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_COLLISION_SUFFIX: u8 = 99;

/// A run's collection, validated so its name is safe to splice into SQL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunHandle {
    run_id:     RunId,
    collection: String,
}

impl RunHandle {
    pub fn new(prefix: &str, run_id: RunId) -> SimResult<Self> {
        let collection = format!("{prefix}_{run_id}");
        if !is_identifier(&collection) {
            return Err(SimError::InvalidCollectionName { name: collection });
        }
        Ok(Self { run_id, collection })
    }

    /// Recover a handle from a collection name such as
    /// `simulations_20240101_090000`.
    pub fn from_collection(prefix: &str, name: &str) -> SimResult<Self> {
        let run_id = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| SimError::InvalidCollectionName { name: name.to_string() })?;
        Self::new(prefix, RunId::from_raw(run_id))
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
}

impl RunStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Running   => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "running"   => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRegistration {
    pub run_id:          RunId,
    pub started_at:      String,
    pub roster_size:     u32,
    pub ticks_completed: u32,
    pub status:          RunStatus,
}

/// Chronologically last sample of one entity in a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastSample {
    pub velocity:     f64,
    pub elapsed_time: Tick,
}

pub struct RunStore {
    conn:   Connection,
    uri:    String,
    prefix: String,
}

impl RunStore {
    pub fn open(uri: &str, prefix: &str) -> SimResult<Self> {
        let conn = Connection::open_with_flags(
            uri,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL lets the aggregator read while the driver appends.
        // Shared-memory databases ignore it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            uri: uri.to_string(),
            prefix: prefix.to_string(),
        })
    }

    pub fn from_settings(settings: &StoreSettings) -> SimResult<Self> {
        Self::open(&settings.database_uri(), &settings.collection_prefix)
    }

    /// Shared-cache in-memory database (used in tests). Every store
    /// opened with the same `name` sees the same data while at least one
    /// connection stays open.
    pub fn in_memory(name: &str, prefix: &str) -> SimResult<Self> {
        Self::open(&format!("file:{name}?mode=memory&cache=shared"), prefix)
    }

    /// A second connection to the same database.
    pub fn reopen(&self) -> SimResult<Self> {
        Self::open(&self.uri, &self.prefix)
    }

    pub fn migrate(&self) -> SimResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_runs.sql"))?;
        Ok(())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // ── Run lifecycle ──────────────────────────────────────────

    /// Create the collection for a new run. If a run with the same id
    /// already exists (two starts in one second), a `_NN` suffix is added;
    /// the suffixed id still sorts after the unsuffixed one.
    pub fn create_run(
        &self,
        run_id: &RunId,
        started_at: &DateTime<FixedOffset>,
        roster_size: u32,
    ) -> SimResult<RunHandle> {
        let mut handle = RunHandle::new(&self.prefix, run_id.clone())?;
        let mut suffix = 0u8;
        while self.collection_exists(handle.collection())? {
            suffix += 1;
            if suffix > MAX_COLLISION_SUFFIX {
                return Err(SimError::InvalidCollectionName {
                    name: handle.collection().to_string(),
                });
            }
            handle = RunHandle::new(&self.prefix, run_id.with_suffix(suffix))?;
        }

        let table = handle.collection();
        self.conn.execute_batch(&format!(
            "CREATE TABLE \"{table}\" (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id     INTEGER NOT NULL,
                role          TEXT NOT NULL,
                elapsed_time  INTEGER NOT NULL,
                velocity      REAL NOT NULL,
                calories      REAL NOT NULL,
                recorded_at   TEXT NOT NULL,
                payload       TEXT NOT NULL
            );
            CREATE INDEX \"{table}_entity_elapsed\" ON \"{table}\" (entity_id, elapsed_time);"
        ))?;
        self.conn.execute(
            "INSERT INTO run_registry (collection, run_id, started_at, roster_size)
             VALUES (?1, ?2, ?3, ?4)",
            params![table, handle.run_id().as_str(), started_at.to_rfc3339(), roster_size],
        )?;
        Ok(handle)
    }

    pub fn finish_run(
        &self,
        run: &RunHandle,
        ticks_completed: u32,
        status: RunStatus,
    ) -> SimResult<()> {
        self.conn.execute(
            "UPDATE run_registry SET ticks_completed = ?1, status = ?2 WHERE collection = ?3",
            params![ticks_completed, status.as_str(), run.collection()],
        )?;
        Ok(())
    }

    pub fn registration(&self, run: &RunHandle) -> SimResult<Option<RunRegistration>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, started_at, roster_size, ticks_completed, status
                 FROM run_registry WHERE collection = ?1",
                params![run.collection()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(run_id, started_at, roster_size, ticks_completed, status)| {
            let parsed = RunStatus::parse(&status).ok_or_else(|| SimError::UnknownRunStatus {
                collection: run.collection().to_string(),
                status:     status.clone(),
            })?;
            Ok(RunRegistration {
                run_id: RunId::from_raw(run_id),
                started_at,
                roster_size,
                ticks_completed,
                status: parsed,
            })
        })
        .transpose()
    }

    /// Every table whose name carries the run-collection prefix.
    pub fn collection_names(&self) -> SimResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name ASC",
        )?;
        let marker = format!("{}_", self.prefix);
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names
            .into_iter()
            .filter(|n| n != REGISTRY_TABLE && n.starts_with(&marker))
            .collect())
    }

    fn collection_exists(&self, name: &str) -> SimResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ── Telemetry ──────────────────────────────────────────────

    pub fn append(&self, run: &RunHandle, record: &TelemetryRecord) -> SimResult<()> {
        let payload = serde_json::to_string(record)?;
        self.conn.execute(
            &format!(
                "INSERT INTO \"{}\" (entity_id, role, elapsed_time, velocity, calories, recorded_at, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                run.collection()
            ),
            params![
                record.entity_id,
                record.role.as_str(),
                record.elapsed_time,
                record.gps.velocity,
                record.calories_consumed.calories,
                record.timestamp.to_rfc3339(),
                payload,
            ],
        )?;
        Ok(())
    }

    /// All records of one entity, oldest first.
    pub fn records_for(&self, run: &RunHandle, entity_id: EntityId) -> SimResult<Vec<TelemetryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT payload FROM \"{}\" WHERE entity_id = ?1 ORDER BY elapsed_time ASC, seq ASC",
            run.collection()
        ))?;
        let payloads = stmt
            .query_map(params![entity_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(SimError::from))
            .collect()
    }

    pub fn record_count(&self, run: &RunHandle) -> SimResult<u64> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", run.collection()),
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Mean velocity over all the entity's records; `None` if it has none.
    pub fn average_velocity(&self, run: &RunHandle, entity_id: EntityId) -> SimResult<Option<f64>> {
        Ok(self.conn.query_row(
            &format!("SELECT AVG(velocity) FROM \"{}\" WHERE entity_id = ?1", run.collection()),
            params![entity_id],
            |row| row.get(0),
        )?)
    }

    /// The entity's latest record by elapsed time (insertion order breaks ties).
    pub fn last_sample(&self, run: &RunHandle, entity_id: EntityId) -> SimResult<Option<LastSample>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT velocity, elapsed_time FROM \"{}\" WHERE entity_id = ?1
                     ORDER BY elapsed_time DESC, seq DESC LIMIT 1",
                    run.collection()
                ),
                params![entity_id],
                |row| {
                    Ok(LastSample {
                        velocity:     row.get(0)?,
                        elapsed_time: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    /// Sum of per-tick calories; `None` if the entity has no records.
    pub fn total_calories(&self, run: &RunHandle, entity_id: EntityId) -> SimResult<Option<f64>> {
        Ok(self.conn.query_row(
            &format!("SELECT SUM(calories) FROM \"{}\" WHERE entity_id = ?1", run.collection()),
            params![entity_id],
            |row| row.get(0),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_round_trips_through_collection_name() {
        let handle = RunHandle::from_collection("simulations", "simulations_20240101_090000").unwrap();
        assert_eq!(handle.run_id().as_str(), "20240101_090000");
        assert_eq!(handle.collection(), "simulations_20240101_090000");
    }

    #[test]
    fn foreign_names_are_rejected() {
        assert!(RunHandle::from_collection("simulations", "run_registry").is_err());
        assert!(RunHandle::from_collection("simulations", "simulations_").is_err());
        assert!(RunHandle::from_collection("simulations", "simulations_x\"; DROP").is_err());
    }

    #[test]
    fn unknown_registry_status_is_an_error() {
        let store = RunStore::in_memory("store_bad_status", "simulations").unwrap();
        store.migrate().unwrap();
        let t = DateTime::parse_from_rfc3339("2024-01-01T09:00:00+02:00").unwrap();
        let run = store.create_run(&RunId::from_start_time(&t), &t, 11).unwrap();
        store
            .conn
            .execute("UPDATE run_registry SET status = 'paused'", [])
            .unwrap();

        match store.registration(&run) {
            Err(SimError::UnknownRunStatus { collection, status }) => {
                assert_eq!(collection, run.collection());
                assert_eq!(status, "paused");
            }
            other => panic!("expected UnknownRunStatus, got {other:?}"),
        }
    }
}
