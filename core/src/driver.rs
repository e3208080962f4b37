//! Simulation driver: owns the tick loop of one run.
//!
//! EACH TICK (fixed order):
//!   1. For every roster entry: generate, publish to its sensor topic,
//!      append to the run.
//!   2. Sleep one tick interval (cancellable), then advance.
//!
//! RULES:
//!   - The driver is the only writer of its run.
//!   - A failed publish or append for one entity is logged and counted;
//!     the rest of the tick proceeds.
//!   - Once shutdown is observed no further publish or append happens.
//!     Everything appended so far stays a valid, queryable partial run.

use crate::{
    bus::{publish_json, MessageBus},
    cancel::ShutdownSignal,
    clock::{DriverState, MatchClock},
    config::{RetryPolicy, RosterEntry, TelemetryConfig, TopicLayout},
    error::{SimError, SimResult},
    generator::TelemetryGenerator,
    rng::RandomSource,
    store::{RunHandle, RunStatus, RunStore},
    types::{RunId, Tick},
};
use chrono::{FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one driver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run:               RunHandle,
    pub ticks_completed:   u32,
    pub records_appended:  u64,
    pub append_failures:   u64,
    pub publish_failures:  u64,
    pub cancelled:         bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct TickReport {
    appended:         u64,
    append_failures:  u64,
    publish_failures: u64,
    interrupted:      bool,
}

pub struct SimulationDriver<R: RandomSource> {
    pub clock:     MatchClock,
    generator:     TelemetryGenerator,
    rng:           R,
    roster:        Vec<RosterEntry>,
    topics:        TopicLayout,
    retry:         RetryPolicy,
    tick_interval: Duration,
    timezone:      FixedOffset,
    bus:           Arc<dyn MessageBus>,
    store:         RunStore,
    shutdown:      ShutdownSignal,
    release_bus:   bool,
}

impl<R: RandomSource> SimulationDriver<R> {
    pub fn new(
        config: &TelemetryConfig,
        rng: R,
        bus: Arc<dyn MessageBus>,
        store: RunStore,
        shutdown: ShutdownSignal,
    ) -> SimResult<Self> {
        config.validate()?;
        Ok(Self {
            clock:         MatchClock::new(config.match_clock.final_tick),
            generator:     TelemetryGenerator::new(config)?,
            rng,
            roster:        config.roster.clone(),
            topics:        config.topics.clone(),
            retry:         config.bus.retry,
            tick_interval: config.tick_interval(),
            timezone:      config.timezone()?,
            bus,
            store,
            shutdown,
            release_bus:   true,
        })
    }

    /// Leave the bus open after the run, so a relay can drain and
    /// republish, or an aggregation pass can publish on it next. The
    /// caller then owns closing it.
    pub fn keep_bus_open(mut self) -> Self {
        self.release_bus = false;
        self
    }

    pub fn state(&self) -> DriverState {
        self.clock.state()
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Play a whole run: Idle -> Running -> Terminated.
    ///
    /// Errors only if the run cannot be opened at all; everything after
    /// that degrades per entity instead of failing.
    pub fn run(&mut self) -> SimResult<RunSummary> {
        let run = self.open_run()?;
        let mut summary = RunSummary {
            run: run.clone(),
            ticks_completed: 0,
            records_appended: 0,
            append_failures: 0,
            publish_failures: 0,
            cancelled: false,
        };

        let mut tick = self.clock.current_tick();
        while let Some(current) = tick {
            if self.shutdown.is_triggered() {
                summary.cancelled = true;
                break;
            }

            let report = self.step(&run, current);
            summary.records_appended += report.appended;
            summary.append_failures += report.append_failures;
            summary.publish_failures += report.publish_failures;
            if report.interrupted {
                summary.cancelled = true;
                break;
            }
            summary.ticks_completed += 1;

            if current < self.clock.final_tick() && self.shutdown.sleep(self.tick_interval) {
                summary.cancelled = true;
                break;
            }
            tick = self.clock.advance();
        }

        self.terminate(&summary);
        Ok(summary)
    }

    fn open_run(&mut self) -> SimResult<RunHandle> {
        if self.clock.state() != DriverState::Idle {
            return Err(SimError::DriverNotIdle { state: self.clock.state().to_string() });
        }
        let started_at = Utc::now().with_timezone(&self.timezone);
        let run_id = RunId::from_start_time(&started_at);
        let run = self
            .store
            .create_run(&run_id, &started_at, self.roster.len() as u32)?;
        self.clock.start(run.run_id().clone())?;
        log::info!(
            "driver: run {} started ({} entities, ticks 0..={})",
            run.run_id(),
            self.roster.len(),
            self.clock.final_tick()
        );
        Ok(run)
    }

    /// One tick across the whole roster.
    fn step(&mut self, run: &RunHandle, tick: Tick) -> TickReport {
        let mut report = TickReport::default();

        for entry in &self.roster {
            if self.shutdown.is_triggered() {
                report.interrupted = true;
                break;
            }

            let record = self.generator.generate(entry.entity_id, entry.role, tick, &mut self.rng);

            let topic = self.topics.sensors(entry.entity_id);
            if let Err(e) = publish_json(self.bus.as_ref(), &topic, &record, &self.retry) {
                report.publish_failures += 1;
                log::warn!("tick={tick} driver: publish for entity {} failed: {e}", entry.entity_id);
            }

            match self.store.append(run, &record) {
                Ok(()) => report.appended += 1,
                Err(e) => {
                    report.append_failures += 1;
                    log::error!("tick={tick} driver: append for entity {} failed: {e}", entry.entity_id);
                }
            }
            log::debug!(
                "tick={tick} driver: published and stored entity {} ({})",
                entry.entity_id,
                entry.role
            );
        }
        report
    }

    fn terminate(&mut self, summary: &RunSummary) {
        self.clock.terminate();
        let status = if summary.cancelled { RunStatus::Cancelled } else { RunStatus::Completed };
        if let Err(e) = self.store.finish_run(&summary.run, summary.ticks_completed, status) {
            log::error!("driver: cannot record final status of {}: {e}", summary.run.run_id());
        }
        if summary.cancelled {
            log::info!(
                "driver: run {} cancelled after {} tick(s)",
                summary.run.run_id(),
                summary.ticks_completed
            );
        } else {
            log::info!(
                "driver: run {} completed ({} records, {} append failures)",
                summary.run.run_id(),
                summary.records_appended,
                summary.append_failures
            );
        }
        if self.release_bus {
            self.bus.close();
        }
    }
}
