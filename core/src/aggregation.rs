//! Aggregation engine: per-entity derived metrics over one run.
//!
//! Read-only over the run store. May read a run the driver is still
//! appending to; the result then reflects whatever rows were visible.
//!
//! NOTE: distance is a single-sample extrapolation from the last record
//! (velocity x elapsed minutes / 60), not an integral over the series.

use crate::{
    bus::{publish_json, MessageBus},
    config::{RetryPolicy, TelemetryConfig, TopicLayout},
    error::SimResult,
    record::{AverageVelocityMessage, CaloriesConsumedMessage, DistanceTraveledMessage},
    selector,
    store::{RunHandle, RunStore},
    types::{EntityId, Tick},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetricSet {
    pub average_velocity:     f64,
    pub distance_traveled_km: f64,
    pub calories_consumed:    f64,
}

pub type RunMetrics = BTreeMap<EntityId, DerivedMetricSet>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub published: u64,
    pub failed:    u64,
}

/// Result of one standalone select-aggregate-publish pass.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationOutcome {
    NoRun,
    NoMetrics { run: RunHandle },
    Published { run: RunHandle, metrics: RunMetrics, report: PublishReport },
}

pub struct AggregationEngine<'s> {
    store:    &'s RunStore,
    entities: Vec<EntityId>,
    topics:   TopicLayout,
    retry:    RetryPolicy,
}

impl<'s> AggregationEngine<'s> {
    pub fn new(config: &TelemetryConfig, store: &'s RunStore) -> Self {
        Self {
            store,
            entities: config.entity_ids(),
            topics:   config.topics.clone(),
            retry:    config.bus.retry,
        }
    }

    /// Metrics for every roster entity, or `None` if the run could not
    /// be read. Never a partial map: one unreadable metric abandons the run.
    pub fn aggregate(&self, run: &RunHandle) -> Option<RunMetrics> {
        match self.try_aggregate(run) {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                log::error!("aggregation: cannot read run {}: {e}", run.run_id());
                None
            }
        }
    }

    pub fn try_aggregate(&self, run: &RunHandle) -> SimResult<RunMetrics> {
        self.entities
            .iter()
            .map(|id| self.metrics_for(run, *id).map(|m| (*id, m)))
            .collect()
    }

    /// The three metrics for one entity. Each is queried independently;
    /// an entity with no records gets zeros.
    pub fn metrics_for(&self, run: &RunHandle, entity_id: EntityId) -> SimResult<DerivedMetricSet> {
        let average = self.store.average_velocity(run, entity_id);
        let last = self.store.last_sample(run, entity_id);
        let total = self.store.total_calories(run, entity_id);

        Ok(DerivedMetricSet {
            average_velocity:     round_to(average?.unwrap_or(0.0), 2),
            distance_traveled_km: last?.map_or(0.0, |s| distance_km(s.velocity, s.elapsed_time)),
            calories_consumed:    round_to(total?.unwrap_or(0.0), 2),
        })
    }

    /// Three messages per entity. A failed publish is logged and skipped.
    pub fn publish(&self, bus: &dyn MessageBus, metrics: &RunMetrics) -> PublishReport {
        let mut report = PublishReport::default();
        for (id, set) in metrics {
            let id = *id;
            let results = [
                (
                    "average velocity",
                    publish_json(
                        bus,
                        &self.topics.average_velocity(id),
                        &AverageVelocityMessage { average_velocity: set.average_velocity },
                        &self.retry,
                    ),
                ),
                (
                    "distance traveled",
                    publish_json(
                        bus,
                        &self.topics.distance_traveled(id),
                        &DistanceTraveledMessage { distance_traveled_km: set.distance_traveled_km },
                        &self.retry,
                    ),
                ),
                (
                    "calories consumed",
                    publish_json(
                        bus,
                        &self.topics.calories_consumed(id),
                        &CaloriesConsumedMessage { calories_consumed: set.calories_consumed },
                        &self.retry,
                    ),
                ),
            ];
            for (metric, result) in results {
                match result {
                    Ok(()) => report.published += 1,
                    Err(e) => {
                        report.failed += 1;
                        log::warn!("aggregation: {metric} for entity {id} not published: {e}");
                    }
                }
            }
            log::info!(
                "aggregation: entity {id}: {} km/h avg, {} km, {} cal",
                set.average_velocity, set.distance_traveled_km, set.calories_consumed
            );
        }
        report
    }

    /// Aggregate and publish one run.
    pub fn aggregate_and_publish(&self, run: &RunHandle, bus: &dyn MessageBus) -> AggregationOutcome {
        match self.aggregate(run) {
            Some(metrics) => {
                let report = self.publish(bus, &metrics);
                AggregationOutcome::Published { run: run.clone(), metrics, report }
            }
            None => {
                log::warn!("aggregation: no metrics calculated for run {}", run.run_id());
                AggregationOutcome::NoMetrics { run: run.clone() }
            }
        }
    }

    /// Standalone pass: select the newest run, aggregate it, publish.
    pub fn aggregate_latest(&self, bus: &dyn MessageBus) -> AggregationOutcome {
        match selector::latest_run(self.store) {
            Ok(Some(run)) => self.aggregate_and_publish(&run, bus),
            Ok(None) => {
                log::info!("aggregation: no run to aggregate");
                AggregationOutcome::NoRun
            }
            Err(e) => {
                log::error!("aggregation: cannot list runs: {e}");
                AggregationOutcome::NoRun
            }
        }
    }
}

/// `velocity x elapsed/60`, rounded to 2 decimals.
pub fn distance_km(velocity: f64, elapsed: Tick) -> f64 {
    round_to(velocity * (f64::from(elapsed) / 60.0), 2)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
