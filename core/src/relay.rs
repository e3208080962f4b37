//! Coordinate relay: sensor record in, reduced views out.
//!
//! Runs on its own thread, fed by a bounded bus subscription. Holds no
//! mutable state; every message is decoded, projected and republished
//! independently, so a malformed message only costs itself. Per-entity
//! order is the order messages arrive on the subscription.
//!
//! RULE: stop the relay with `RelayHandle::finish` before closing the bus.
//! Messages still queued for the relay at close time would otherwise be
//! received but fail to republish.

use crate::{
    bus::{publish_with_retry, BusMessage, MessageBus, Subscription},
    config::{RetryPolicy, TelemetryConfig, TopicLayout},
    error::{SimError, SimResult},
    record::{BloodPressureFrame, CoordinateFrame, SensorView},
    types::EntityId,
};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub received:         u64,
    pub published:        u64,
    pub dropped:          u64,
    pub publish_failures: u64,
}

#[derive(Clone)]
pub struct CoordinateRelay {
    entities: Vec<EntityId>,
    topics:   TopicLayout,
    retry:    RetryPolicy,
    bus:      Arc<dyn MessageBus>,
}

impl CoordinateRelay {
    pub fn new(config: &TelemetryConfig, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            entities: config.entity_ids(),
            topics:   config.topics.clone(),
            retry:    config.bus.retry,
            bus,
        }
    }

    /// One sensor topic per roster entry.
    pub fn sensor_filters(&self) -> Vec<String> {
        self.entities.iter().map(|id| self.topics.sensors(*id)).collect()
    }

    /// Project a sensor message into the messages to republish.
    ///
    /// Every roster entity whose sensor topic equals the message topic
    /// yields a coordinate frame, plus a blood-pressure frame when the
    /// payload carries one. Messages on other topics yield nothing.
    pub fn derive(&self, message: &BusMessage) -> SimResult<Vec<BusMessage>> {
        let matching: Vec<EntityId> = self
            .entities
            .iter()
            .copied()
            .filter(|id| message.topic == self.topics.sensors(*id))
            .collect();
        if matching.is_empty() {
            return Ok(Vec::new());
        }
        let sensor: SensorView = message.decode()?;

        let mut out = Vec::new();
        for id in matching {
            let coordinates = CoordinateFrame {
                entity_id: sensor.entity_id,
                role:      sensor.role,
                gps:       sensor.gps,
            };
            out.push(BusMessage::json(self.topics.coordinates(id), &coordinates)?);

            if let Some(blood_pressure) = sensor.blood_pressure {
                let vitals = BloodPressureFrame { entity_id: sensor.entity_id, blood_pressure };
                out.push(BusMessage::json(self.topics.blood_pressure(id), &vitals)?);
            }
        }
        Ok(out)
    }

    /// Derive and publish for one message, updating `stats`.
    pub fn handle(&self, message: &BusMessage, stats: &mut RelayStats) {
        stats.received += 1;
        let derived = match self.derive(message) {
            Ok(d) => d,
            Err(e) => {
                stats.dropped += 1;
                log::warn!("relay: dropped message on '{}': {e}", message.topic);
                return;
            }
        };
        for out in derived {
            let topic = out.topic.clone();
            match publish_with_retry(self.bus.as_ref(), out, &self.retry) {
                Ok(()) => {
                    stats.published += 1;
                    log::debug!("relay: published to '{topic}'");
                }
                Err(e) => {
                    stats.publish_failures += 1;
                    log::warn!("relay: publish to '{topic}' failed: {e}");
                }
            }
        }
    }

    /// Process messages until the subscription disconnects (bus closed).
    pub fn run(&self, subscription: Subscription) -> RelayStats {
        self.run_until(subscription, &crossbeam_channel::never())
    }

    /// Process messages until the subscription disconnects or `stop`
    /// fires. On stop, whatever is already queued is still handled.
    pub fn run_until(&self, subscription: Subscription, stop: &Receiver<()>) -> RelayStats {
        let mut stats = RelayStats::default();
        let messages = subscription.receiver();
        loop {
            select! {
                recv(messages) -> message => match message {
                    Ok(message) => self.handle(&message, &mut stats),
                    Err(_) => break,
                },
                recv(stop) -> _stopped => {
                    for message in subscription.drain() {
                        self.handle(&message, &mut stats);
                    }
                    break;
                }
            }
        }
        log::info!(
            "relay: stopped ({} received, {} published, {} dropped, {} publish failures)",
            stats.received, stats.published, stats.dropped, stats.publish_failures
        );
        stats
    }

    /// Subscribe to every sensor topic and process on a dedicated thread.
    pub fn spawn(self) -> SimResult<RelayHandle> {
        let subscription = self.bus.subscribe(&self.sensor_filters())?;
        let (stop, stopped) = bounded(1);
        let bus = self.bus.clone();
        let thread = std::thread::Builder::new()
            .name("coordinate-relay".to_string())
            .spawn(move || self.run_until(subscription, &stopped))
            .map_err(|e| SimError::Other(anyhow::anyhow!("cannot start relay thread: {e}")))?;
        Ok(RelayHandle { stop, bus, thread })
    }
}

/// A relay running on its own thread.
pub struct RelayHandle {
    stop:   Sender<()>,
    bus:    Arc<dyn MessageBus>,
    thread: JoinHandle<RelayStats>,
}

impl RelayHandle {
    /// Orderly stop. Waits until every sensor message published so far
    /// has reached the relay, lets it republish them on the still-open
    /// bus, then joins the thread. Call after the producers have stopped
    /// and before `MessageBus::close`.
    pub fn finish(self) -> SimResult<RelayStats> {
        if let Err(e) = self.bus.flush() {
            log::warn!("relay: bus flush before stop failed: {e}");
        }
        // Only fails if the thread already exited.
        let _ = self.stop.send(());
        join_relay(self.thread)
    }

    /// Wait for the relay to exit on its own, i.e. once the bus is closed.
    pub fn join(self) -> SimResult<RelayStats> {
        let RelayHandle { stop, thread, .. } = self;
        let stats = join_relay(thread);
        drop(stop);
        stats
    }
}

fn join_relay(thread: JoinHandle<RelayStats>) -> SimResult<RelayStats> {
    thread
        .join()
        .map_err(|_| SimError::Other(anyhow::anyhow!("relay thread panicked")))
}
