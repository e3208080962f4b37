//! Run store and run selector tests.
//!
//! Tests cover: run creation and registry, append/read-back, collection
//! naming, latest-run selection, same-second collisions.

use chrono::{DateTime, FixedOffset};
use pitchside_core::{
    config::TelemetryConfig,
    generator::TelemetryGenerator,
    rng::TelemetryRng,
    role::Role,
    selector::latest_run,
    store::{RunStatus, RunStore},
    types::RunId,
};

fn store(name: &str) -> RunStore {
    let store = RunStore::in_memory(name, "simulations").expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn at(rfc3339: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(rfc3339).unwrap()
}

#[test]
fn selector_returns_none_without_runs() {
    let store = store("sel_empty");
    assert_eq!(latest_run(&store).unwrap(), None);
}

#[test]
fn selector_returns_newest_run() {
    let store = store("sel_newest");
    for start in ["2024-01-01T10:00:00+02:00", "2024-01-01T09:00:00+02:00"] {
        let t = at(start);
        store.create_run(&RunId::from_start_time(&t), &t, 11).unwrap();
    }

    let latest = latest_run(&store).unwrap().expect("a run");
    assert_eq!(latest.collection(), "simulations_20240101_100000");
    assert_eq!(latest.run_id().as_str(), "20240101_100000");
}

#[test]
fn registry_table_is_not_a_run() {
    let store = store("sel_registry");
    let names = store.collection_names().unwrap();
    assert!(names.is_empty(), "unexpected collections: {names:?}");
}

#[test]
fn same_second_start_gets_sortable_suffix() {
    let store = store("collide");
    let t = at("2024-03-05T18:30:00+02:00");
    let id = RunId::from_start_time(&t);

    let first = store.create_run(&id, &t, 11).unwrap();
    let second = store.create_run(&id, &t, 11).unwrap();

    assert_eq!(first.collection(), "simulations_20240305_183000");
    assert_eq!(second.collection(), "simulations_20240305_183000_01");
    assert_eq!(latest_run(&store).unwrap(), Some(second));
}

#[test]
fn appended_records_read_back_in_tick_order() {
    let store = store("append_read");
    let t = at("2024-05-01T20:45:00+02:00");
    let run = store.create_run(&RunId::from_start_time(&t), &t, 1).unwrap();

    let generator = TelemetryGenerator::new(&TelemetryConfig::default()).unwrap();
    let mut rng = TelemetryRng::new(3);
    let mut written = Vec::new();
    for tick in 0..5 {
        let r = generator.generate_at(7, Role::Centrocampista, tick, t, &mut rng);
        store.append(&run, &r).unwrap();
        written.push(r);
    }
    let other = generator.generate_at(8, Role::Centrocampista, 0, t, &mut rng);
    store.append(&run, &other).unwrap();

    assert_eq!(store.records_for(&run, 7).unwrap(), written);
    assert_eq!(store.record_count(&run).unwrap(), 6);
    assert!(store.records_for(&run, 1).unwrap().is_empty());
}

#[test]
fn finish_run_updates_registry() {
    let store = store("finish");
    let t = at("2024-05-02T20:45:00+02:00");
    let run = store.create_run(&RunId::from_start_time(&t), &t, 11).unwrap();

    let reg = store.registration(&run).unwrap().unwrap();
    assert_eq!(reg.status, RunStatus::Running);
    assert_eq!(reg.roster_size, 11);

    store.finish_run(&run, 42, RunStatus::Cancelled).unwrap();
    let reg = store.registration(&run).unwrap().unwrap();
    assert_eq!(reg.status, RunStatus::Cancelled);
    assert_eq!(reg.ticks_completed, 42);
}

#[test]
fn second_connection_sees_appends() {
    let writer = store("two_conns");
    let reader = writer.reopen().unwrap();
    let t = at("2024-05-03T20:45:00+02:00");
    let run = writer.create_run(&RunId::from_start_time(&t), &t, 1).unwrap();

    let generator = TelemetryGenerator::new(&TelemetryConfig::default()).unwrap();
    let r = generator.generate_at(1, Role::Portiere, 0, t, &mut TelemetryRng::new(1));
    writer.append(&run, &r).unwrap();

    assert_eq!(latest_run(&reader).unwrap(), Some(run.clone()));
    assert_eq!(reader.record_count(&run).unwrap(), 1);
}
