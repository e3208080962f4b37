//! Publish/subscribe bus.
//!
//! RULE: Components talk to the transport only through `MessageBus`.
//! The in-process implementation runs one broker worker thread; every
//! publisher and every subscription sits behind a bounded queue, so
//! backpressure is explicit and per-topic order is FIFO.
//!
//! The broker is private to the process: `BusSettings::host`/`port` only
//! name the endpoint in logs. Only subscribers in the same process, such
//! as the coordinate relay or a test, see what is published.
//!
//! SHUTDOWN (two phases):
//!   1. Producers stop publishing; `flush` waits until everything already
//!      published has reached the subscriber queues, and consumers that
//!      republish (the relay) drain while the bus still accepts messages.
//!   2. `close` delivers whatever is still queued and disconnects.

use crate::{
    config::{BusSettings, RetryPolicy},
    error::{SimError, SimResult},
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic:   String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn json<T: Serialize>(topic: impl Into<String>, value: &T) -> SimResult<Self> {
        Ok(Self {
            topic:   topic.into(),
            payload: serde_json::to_vec(value)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> SimResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

pub trait MessageBus: Send + Sync {
    /// Enqueue a message for delivery. Does not wait for subscribers.
    fn publish(&self, message: BusMessage) -> SimResult<()>;

    /// Register interest in every topic matching one of `filters`.
    fn subscribe(&self, filters: &[String]) -> SimResult<Subscription>;

    /// Block until every message published before this call has been
    /// handed to the queues of its subscribers. The bus stays open.
    fn flush(&self) -> SimResult<()>;

    /// Flush queued messages, stop delivery and disconnect subscriptions.
    fn close(&self);
}

/// Publish with bounded retry on transient (queue-full) failures.
pub fn publish_with_retry(
    bus: &dyn MessageBus,
    message: BusMessage,
    retry: &RetryPolicy,
) -> SimResult<()> {
    let mut attempt = 1;
    loop {
        match bus.publish(message.clone()) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                let wait = retry.backoff(attempt);
                log::debug!(
                    "publish to '{}' failed (attempt {attempt}): {e}; retrying in {wait:?}",
                    message.topic
                );
                std::thread::sleep(wait);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn publish_json<T: Serialize>(
    bus: &dyn MessageBus,
    topic: &str,
    value: &T,
    retry: &RetryPolicy,
) -> SimResult<()> {
    publish_with_retry(bus, BusMessage::json(topic, value)?, retry)
}

/// MQTT-style filter match: `+` matches one level, a trailing `#`
/// matches any remaining levels (including none).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match part {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}

/// Receiving end of a subscription. Dropping it unsubscribes.
pub struct Subscription {
    filters: Vec<String>,
    rx:      Receiver<BusMessage>,
}

impl Subscription {
    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    /// Block until a message arrives. `None` once the bus has closed.
    pub fn recv(&self) -> Option<BusMessage> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<BusMessage, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Everything already delivered, without blocking.
    pub fn drain(&self) -> Vec<BusMessage> {
        self.rx.try_iter().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = BusMessage> + '_ {
        self.rx.iter()
    }

    pub(crate) fn receiver(&self) -> &Receiver<BusMessage> {
        &self.rx
    }
}

// ── In-process broker ──────────────────────────────────────────

enum BrokerCommand {
    Publish(BusMessage),
    Subscribe { filters: Vec<String>, tx: Sender<BusMessage> },
    Flush(Sender<()>),
    Shutdown,
}

struct Subscriber {
    filters: Vec<String>,
    tx:      Sender<BusMessage>,
    live:    bool,
}

impl Subscriber {
    fn wants(&self, topic: &str) -> bool {
        self.filters.iter().any(|f| topic_matches(f, topic))
    }
}

/// Counters reported by the broker worker when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped:   u64,
}

pub struct InProcessBus {
    endpoint:       String,
    commands:       Sender<BrokerCommand>,
    queue_capacity: usize,
    timeout:        Duration,
    closed:         AtomicBool,
    worker:         Mutex<Option<JoinHandle<BrokerStats>>>,
    stats:          Mutex<Option<BrokerStats>>,
}

impl InProcessBus {
    pub fn connect(settings: &BusSettings) -> SimResult<Arc<Self>> {
        let (commands, rx) = bounded(settings.queue_capacity);
        let timeout = settings.publish_timeout();
        let worker = std::thread::Builder::new()
            .name("bus-broker".to_string())
            .spawn(move || run_broker(rx, timeout))
            .map_err(|e| anyhow::anyhow!("cannot start bus worker: {e}"))?;
        let endpoint = settings.endpoint();
        log::info!("bus: connected to {endpoint} (in-process broker)");
        Ok(Arc::new(Self {
            endpoint,
            commands,
            queue_capacity: settings.queue_capacity,
            timeout,
            closed: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
            stats: Mutex::new(None),
        }))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Broker counters, available once the bus has been closed.
    pub fn stats(&self) -> Option<BrokerStats> {
        self.stats.lock().ok().and_then(|s| *s)
    }

    fn send(&self, command: BrokerCommand, topic: &str) -> SimResult<()> {
        if self.is_closed() {
            return Err(SimError::BusClosed);
        }
        self.commands
            .send_timeout(command, self.timeout)
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SimError::BusQueueFull {
                    topic:      topic.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                },
                SendTimeoutError::Disconnected(_) => SimError::BusClosed,
            })
    }
}

impl MessageBus for InProcessBus {
    fn publish(&self, message: BusMessage) -> SimResult<()> {
        let topic = message.topic.clone();
        self.send(BrokerCommand::Publish(message), &topic)
    }

    fn subscribe(&self, filters: &[String]) -> SimResult<Subscription> {
        let (tx, rx) = bounded(self.queue_capacity);
        let filters = filters.to_vec();
        self.send(
            BrokerCommand::Subscribe { filters: filters.clone(), tx },
            "<subscribe>",
        )?;
        log::debug!("bus: subscribed to {} filter(s)", filters.len());
        Ok(Subscription { filters, rx })
    }

    fn flush(&self) -> SimResult<()> {
        if self.is_closed() {
            return Err(SimError::BusClosed);
        }
        // A barrier waits behind the backlog instead of timing out on it.
        let (ack, done) = bounded(1);
        self.commands
            .send(BrokerCommand::Flush(ack))
            .map_err(|_| SimError::BusClosed)?;
        // The ack sender is dropped unanswered if the broker stops first.
        done.recv().map_err(|_| SimError::BusClosed)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Queued publishes ahead of Shutdown are still delivered.
        if self.commands.send(BrokerCommand::Shutdown).is_err() {
            log::warn!("bus: broker already gone at close");
        }
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = worker {
            match handle.join() {
                Ok(stats) => {
                    log::info!(
                        "bus: disconnected from {} ({} published, {} delivered, {} dropped)",
                        self.endpoint, stats.published, stats.delivered, stats.dropped
                    );
                    if let Ok(mut slot) = self.stats.lock() {
                        *slot = Some(stats);
                    }
                }
                Err(_) => log::error!("bus: broker worker panicked"),
            }
        }
    }
}

impl Drop for InProcessBus {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_broker(rx: Receiver<BrokerCommand>, timeout: Duration) -> BrokerStats {
    let mut subscribers: Vec<Subscriber> = Vec::new();
    let mut stats = BrokerStats::default();

    while let Ok(command) = rx.recv() {
        match command {
            BrokerCommand::Publish(message) => {
                stats.published += 1;
                for sub in subscribers.iter_mut().filter(|s| s.wants(&message.topic)) {
                    match sub.tx.send_timeout(message.clone(), timeout) {
                        Ok(()) => stats.delivered += 1,
                        Err(SendTimeoutError::Timeout(_)) => {
                            stats.dropped += 1;
                            log::warn!(
                                "bus: subscriber queue full, dropped message on '{}'",
                                message.topic
                            );
                        }
                        Err(SendTimeoutError::Disconnected(_)) => sub.live = false,
                    }
                }
                subscribers.retain(|s| s.live);
            }
            BrokerCommand::Subscribe { filters, tx } => {
                subscribers.push(Subscriber { filters, tx, live: true });
            }
            BrokerCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            BrokerCommand::Shutdown => break,
        }
    }
    // Commands that raced in behind Shutdown are discarded; a pending
    // flush then sees its ack sender dropped.
    rx.try_iter().for_each(drop);
    stats
}
