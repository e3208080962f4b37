//! pitchside: headless runner for the telemetry pipeline.
//!
//! Usage:
//!   pitchside simulate  [--config cfg.json] [--db DIR] [--ticks 90] [--tick-ms 1000] [--seed N] [--aggregate]
//!   pitchside aggregate [--config cfg.json] [--db DIR]
//!
//! The bus is in-process: derived and aggregated messages reach only
//! subscribers inside this process. `aggregate` still logs what it
//! publishes; the store is the durable output.

use anyhow::{bail, Result};
use pitchside_core::{
    aggregation::{AggregationEngine, AggregationOutcome},
    bus::{InProcessBus, MessageBus},
    cancel::ShutdownSignal,
    config::TelemetryConfig,
    driver::{RunSummary, SimulationDriver},
    relay::CoordinateRelay,
    rng::TelemetryRng,
    store::RunStore,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mode = match args.get(1) {
        Some(m) if !m.starts_with("--") => m.as_str(),
        _ => "simulate",
    };
    let config = build_config(&args)?;

    match mode {
        "simulate" => {
            let aggregate_after = args.iter().any(|a| a == "--aggregate");
            simulate(&config, aggregate_after)
        }
        "aggregate" => aggregate(&config),
        other => bail!("unknown mode '{other}' (expected 'simulate' or 'aggregate')"),
    }
}

fn build_config(args: &[String]) -> Result<TelemetryConfig> {
    let mut config = match find_arg(args, "--config") {
        Some(path) => TelemetryConfig::load(path)?,
        None => TelemetryConfig::default(),
    };
    if let Some(db) = find_arg(args, "--db") {
        config.store.endpoint = db.to_string();
    }
    if let Some(ticks) = parse_arg(args, "--ticks")? {
        config.match_clock.final_tick = ticks;
    }
    if let Some(ms) = parse_arg(args, "--tick-ms")? {
        config.match_clock.tick_interval_ms = ms;
    }
    if let Some(seed) = parse_arg(args, "--seed")? {
        config.seed = Some(seed);
    }
    config.validate()?;
    Ok(config)
}

fn simulate(config: &TelemetryConfig, aggregate_after: bool) -> Result<()> {
    println!("pitchside: simulate");
    println!("  bus:    {}", config.bus.endpoint());
    println!("  store:  {}", config.store.database_uri());
    println!("  ticks:  0..={}", config.match_clock.final_tick);
    println!();

    // Unreachable bus or store at startup is fatal.
    let bus = InProcessBus::connect(&config.bus)?;
    let store = RunStore::from_settings(&config.store)?;
    store.migrate()?;

    let shutdown = ShutdownSignal::new();
    install_ctrl_c(shutdown.clone());

    let relay = CoordinateRelay::new(config, bus.clone()).spawn()?;

    let rng = match config.seed {
        Some(seed) => TelemetryRng::new(seed),
        None => TelemetryRng::from_clock(),
    };
    log::info!("rng seed: {}", rng.seed());

    // The relay must drain before the bus closes, so the runner owns closing.
    let mut driver = SimulationDriver::new(config, rng, bus.clone(), store, shutdown.clone())?
        .keep_bus_open();
    let summary = driver.run()?;

    match relay.finish() {
        Ok(stats) => {
            log::info!(
                "relay: {} frame(s) republished (coordinates and blood pressure), {} failed, {} dropped",
                stats.published, stats.publish_failures, stats.dropped
            );
            if stats.publish_failures > 0 {
                log::warn!("relay: {} frame(s) were not republished", stats.publish_failures);
            }
        }
        Err(e) => log::error!("relay: {e}"),
    }

    if aggregate_after && !shutdown.is_triggered() {
        let reader = driver.store().reopen()?;
        let engine = AggregationEngine::new(config, &reader);
        report_outcome(&engine.aggregate_and_publish(&summary.run, bus.as_ref()));
    }

    bus.close();
    print_summary(&summary);
    Ok(())
}

fn aggregate(config: &TelemetryConfig) -> Result<()> {
    let store = RunStore::from_settings(&config.store)?;
    store.migrate()?;
    let bus = InProcessBus::connect(&config.bus)?;

    let engine = AggregationEngine::new(config, &store);
    report_outcome(&engine.aggregate_latest(bus.as_ref()));

    bus.close();
    Ok(())
}

fn report_outcome(outcome: &AggregationOutcome) {
    match outcome {
        AggregationOutcome::NoRun => println!("No latest collection found."),
        AggregationOutcome::NoMetrics { run } => println!("No metrics calculated for {}.", run.collection()),
        AggregationOutcome::Published { run, metrics, report } => {
            println!("Metrics for {}:", run.collection());
            for (id, m) in metrics {
                println!(
                    "  player {id:>2}: avg {:>6.2} km/h  dist {:>6.2} km  {:>8.2} cal",
                    m.average_velocity, m.distance_traveled_km, m.calories_consumed
                );
            }
            println!("  published {} message(s), {} failed", report.published, report.failed);
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("=== Run {} ===", summary.run.run_id());
    println!("  collection:       {}", summary.run.collection());
    println!("  ticks completed:  {}", summary.ticks_completed);
    println!("  records stored:   {}", summary.records_appended);
    println!("  append failures:  {}", summary.append_failures);
    println!("  publish failures: {}", summary.publish_failures);
    if summary.cancelled {
        println!("  (stopped by operator; partial run kept)");
    }
}

/// Ctrl+C sets the shutdown signal. The signal listener runs on a small
/// single-threaded runtime of its own so the tick loop stays synchronous.
fn install_ctrl_c(shutdown: ShutdownSignal) {
    let spawned = std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    log::warn!("cannot start signal runtime, Ctrl+C disabled: {e}");
                    return;
                }
            };
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        log::info!("Received Ctrl+C, stopping simulation");
                        shutdown.trigger();
                    }
                    Err(e) => log::warn!("cannot listen for Ctrl+C: {e}"),
                }
            });
        });
    if let Err(e) = spawned {
        log::warn!("cannot spawn Ctrl+C listener: {e}");
    }
}

fn find_arg<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == name)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match find_arg(args, name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value '{raw}' for {name}: {e}")),
        None => Ok(None),
    }
}
