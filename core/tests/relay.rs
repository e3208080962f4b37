//! Coordinate relay tests.
//!
//! Tests cover: the position-only projection, malformed payloads,
//! per-entity ordering through a live bus, draining on an orderly stop.

use pitchside_core::{
    bus::{BusMessage, InProcessBus, MessageBus},
    config::TelemetryConfig,
    record::CoordinateFrame,
    relay::{CoordinateRelay, RelayStats},
};
use serde_json::json;
use std::sync::Arc;

fn relay(config: &TelemetryConfig) -> (Arc<InProcessBus>, CoordinateRelay) {
    let bus = InProcessBus::connect(&config.bus).expect("bus");
    let relay = CoordinateRelay::new(config, bus.clone());
    (bus, relay)
}

fn sensor(entity_id: u32, x: u32, y: u32) -> BusMessage {
    BusMessage::json(
        format!("football/players/{entity_id}/sensors"),
        &json!({
            "entity_id": entity_id,
            "role": "difensore",
            "gps": { "x": x, "y": y, "velocity": 5.5, "unic": 900 },
            "heart_rate": { "heart_rate": 150 }
        }),
    )
    .unwrap()
}

#[test]
fn coordinates_drop_velocity_and_everything_else() {
    let config = TelemetryConfig::default();
    let (bus, relay) = relay(&config);

    let input = BusMessage::json(
        "football/players/3/sensors",
        &json!({ "entity_id": 3, "role": "difensore", "gps": { "x": 10, "y": 20, "velocity": 5.5 } }),
    )
    .unwrap();
    let out = relay.derive(&input).unwrap();

    assert_eq!(out.len(), 1, "no blood pressure in input, so only coordinates");
    assert_eq!(out[0].topic, "football/players/3/sensors/coordinates");
    let value: serde_json::Value = serde_json::from_slice(&out[0].payload).unwrap();
    assert_eq!(value, json!({ "entity_id": 3, "role": "difensore", "gps": { "x": 10, "y": 20 } }));
    bus.close();
}

#[test]
fn blood_pressure_view_is_published_when_present() {
    let config = TelemetryConfig::default();
    let (bus, relay) = relay(&config);

    let input = BusMessage::json(
        "football/players/6/sensors",
        &json!({
            "entity_id": 6, "role": "centrocampista",
            "gps": { "x": 40, "y": 30, "velocity": 9.1 },
            "blood_pressure": { "systolic": 190, "diastolic": 80 }
        }),
    )
    .unwrap();
    let out = relay.derive(&input).unwrap();

    assert_eq!(out.len(), 2);
    assert_eq!(out[1].topic, "football/players/6/sensors/blood_pressure");
    let value: serde_json::Value = serde_json::from_slice(&out[1].payload).unwrap();
    assert_eq!(value, json!({ "entity_id": 6, "blood_pressure": { "systolic": 190, "diastolic": 80 } }));
    bus.close();
}

#[test]
fn malformed_payload_fails_only_that_message() {
    let config = TelemetryConfig::default();
    let (bus, relay) = relay(&config);
    let mut stats = RelayStats::default();

    let missing_gps = BusMessage::json(
        "football/players/2/sensors",
        &json!({ "entity_id": 2, "role": "difensore" }),
    )
    .unwrap();
    assert!(relay.derive(&missing_gps).is_err());

    let garbage = BusMessage { topic: "football/players/2/sensors".into(), payload: b"{not json".to_vec() };
    relay.handle(&missing_gps, &mut stats);
    relay.handle(&garbage, &mut stats);
    relay.handle(&sensor(2, 7, 8), &mut stats);

    assert_eq!(stats.received, 3);
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.published, 1);
    bus.close();
}

#[test]
fn foreign_topics_are_ignored() {
    let config = TelemetryConfig::default();
    let (bus, relay) = relay(&config);
    let stray = BusMessage::json("football/players/42/sensors", &json!({})).unwrap();
    assert!(relay.derive(&stray).unwrap().is_empty());
    bus.close();
}

#[test]
fn live_relay_preserves_per_entity_order() {
    let config = TelemetryConfig::default();
    let (bus, relay) = relay(&config);
    let out = bus.subscribe(&["football/players/+/sensors/coordinates".to_string()]).unwrap();
    let worker = relay.spawn().unwrap();

    for tick in 0..20 {
        bus.publish(sensor(4, tick, 1)).unwrap();
        bus.publish(sensor(9, tick, 2)).unwrap();
    }

    // Wait for the relay to republish all 40 frames before closing.
    let mut frames = Vec::new();
    while frames.len() < 40 {
        let m = out
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("relay output");
        frames.push(m.decode::<CoordinateFrame>().unwrap());
    }
    bus.close();
    let stats = worker.join().unwrap();
    assert_eq!(stats.received, 40);

    for entity in [4, 9] {
        let xs: Vec<u32> = frames.iter().filter(|f| f.entity_id == entity).map(|f| f.gps.x).collect();
        assert_eq!(xs, (0..20).collect::<Vec<_>>(), "entity {entity} reordered");
    }
}

#[test]
fn finish_republishes_everything_queued_before_close() {
    let config = TelemetryConfig::default();
    let (bus, relay) = relay(&config);
    let out = bus.subscribe(&["football/players/+/sensors/coordinates".to_string()]).unwrap();
    let worker = relay.spawn().unwrap();

    for tick in 0..25 {
        for entity in 1..=11 {
            bus.publish(sensor(entity, tick, entity)).unwrap();
        }
    }
    // No waiting on the output: the stop itself must drain the backlog.
    let stats = worker.finish().unwrap();
    bus.close();

    assert_eq!(stats.received, 275);
    assert_eq!(stats.published, 275);
    assert_eq!(stats.publish_failures, 0);
    assert_eq!(out.drain().len(), 275);
}
