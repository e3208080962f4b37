//! In-process bus tests.
//!
//! Tests cover: filtered delivery, FIFO order, the flush barrier,
//! close semantics, backpressure and bounded retry.

use pitchside_core::{
    bus::{publish_with_retry, BusMessage, InProcessBus, MessageBus},
    config::{BusSettings, RetryPolicy},
    error::SimError,
};
use std::time::Duration;

fn msg(topic: &str, n: u32) -> BusMessage {
    BusMessage::json(topic, &n).unwrap()
}

#[test]
fn delivers_only_matching_topics_in_order() {
    let bus = InProcessBus::connect(&BusSettings::default()).unwrap();
    let sensors = bus.subscribe(&["football/players/+/sensors".to_string()]).unwrap();
    let one = bus.subscribe(&["football/players/1/#".to_string()]).unwrap();

    for n in 0..10 {
        bus.publish(msg("football/players/1/sensors", n)).unwrap();
        bus.publish(msg("football/players/2/realtime/average_velocity", n)).unwrap();
    }
    bus.close();

    let got: Vec<u32> = sensors.drain().iter().map(|m| m.decode().unwrap()).collect();
    assert_eq!(got, (0..10).collect::<Vec<_>>());
    assert_eq!(one.drain().len(), 10);

    let stats = bus.stats().expect("stats after close");
    assert_eq!(stats.published, 20);
    assert_eq!(stats.delivered, 20);
    assert_eq!(stats.dropped, 0);
}

#[test]
fn flush_waits_for_delivery_and_keeps_the_bus_open() {
    let bus = InProcessBus::connect(&BusSettings::default()).unwrap();
    let sub = bus.subscribe(&["t".to_string()]).unwrap();
    for n in 0..50 {
        bus.publish(msg("t", n)).unwrap();
    }

    bus.flush().unwrap();
    assert_eq!(sub.drain().len(), 50);
    assert!(!bus.is_closed());
    bus.publish(msg("t", 50)).unwrap();

    bus.close();
    assert!(matches!(bus.flush(), Err(SimError::BusClosed)));
    assert_eq!(sub.drain().len(), 1);
}

#[test]
fn close_disconnects_subscribers_and_rejects_publishes() {
    let bus = InProcessBus::connect(&BusSettings::default()).unwrap();
    let sub = bus.subscribe(&["#".to_string()]).unwrap();
    bus.close();
    bus.close();

    assert!(sub.recv().is_none());
    assert!(matches!(bus.publish(msg("a", 1)), Err(SimError::BusClosed)));
    assert!(matches!(bus.subscribe(&["a".to_string()]), Err(SimError::BusClosed)));
}

#[test]
fn full_subscriber_queue_drops_instead_of_blocking() {
    let settings = BusSettings { queue_capacity: 2, publish_timeout_ms: 5, ..BusSettings::default() };
    let bus = InProcessBus::connect(&settings).unwrap();
    let slow = bus.subscribe(&["t".to_string()]).unwrap();

    let mut accepted = 0;
    for n in 0..6 {
        if bus.publish(msg("t", n)).is_ok() {
            accepted += 1;
        }
    }
    bus.close();

    let stats = bus.stats().unwrap();
    assert_eq!(stats.published, accepted);
    assert_eq!(slow.drain().len() as u64, stats.delivered);
    assert!(stats.delivered <= 2);
    assert_eq!(stats.delivered + stats.dropped, accepted);
}

#[test]
fn retry_gives_up_on_permanent_errors() {
    let bus = InProcessBus::connect(&BusSettings::default()).unwrap();
    bus.close();
    let retry = RetryPolicy { max_attempts: 5, initial_backoff_ms: 1_000 };

    let start = std::time::Instant::now();
    let err = publish_with_retry(bus.as_ref(), msg("t", 0), &retry).unwrap_err();
    assert!(matches!(err, SimError::BusClosed));
    assert!(start.elapsed() < Duration::from_millis(500), "closed bus must not be retried");
}

#[test]
fn transient_classification() {
    assert!(SimError::BusQueueFull { topic: "t".into(), timeout_ms: 5 }.is_transient());
    assert!(!SimError::BusClosed.is_transient());
}
