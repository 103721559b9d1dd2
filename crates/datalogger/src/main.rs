// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Modbus Datalogger CLI
//!
//! # Usage
//!
//! ```bash
//! # Create the reading store named in testid-modbus.json
//! datalogger init
//!
//! # Log ten simulated samples, one per second
//! datalogger log --sensors cpuid.json --count 10 --interval-secs 1
//!
//! # Publish one batch to every sink in testid-publish.json
//! datalogger publish
//!
//! # Publish every 30 seconds until Ctrl+C
//! datalogger watch --interval-secs 30
//! ```
//!
//! `publish` exits with 0 when the batch was committed (or there was nothing
//! to do), 3 when it was retained for retry, 4 when it was delivered but
//! could not be marked, and 1 on configuration or store errors.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datalogger::config::{DEFAULT_MAIN_CONFIG, DEFAULT_PUBLISH_CONFIG};
use datalogger::simulator::DEFAULT_SENSOR_FILE;
use datalogger::{
    build_sinks, record_sample, MainConfig, PublishConfig, PublishCoordinator, PublishStats,
    ReadingStore, RunReport, SensorSet, Simulator, SqliteStore,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Modbus datalogger
#[derive(Parser, Debug)]
#[command(name = "datalogger")]
#[command(about = "Modbus Datalogger - log sensor readings and publish them to HTTP/MQTT sinks")]
#[command(version)]
struct Args {
    /// Main configuration file (store location, publisher tuning)
    #[arg(short, long, default_value = DEFAULT_MAIN_CONFIG)]
    config: PathBuf,

    /// Publish configuration file (HTTP endpoints, MQTT brokers)
    #[arg(short, long, default_value = DEFAULT_PUBLISH_CONFIG)]
    publish_config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the reading store and its schema
    Init,

    /// Simulate every sensor and store the samples
    Log {
        /// Sensor definition file
        #[arg(short, long, default_value = DEFAULT_SENSOR_FILE)]
        sensors: PathBuf,

        /// Number of samples to take
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u64,

        /// Pause between samples (seconds)
        #[arg(long, default_value_t = 0)]
        interval_secs: u64,
    },

    /// Publish one batch of unpublished readings
    Publish {
        /// Override the configured batch size
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Publish repeatedly until Ctrl+C
    Watch {
        /// Seconds between runs
        #[arg(long)]
        interval_secs: u64,

        /// Override the configured batch size
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Show reading counts
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<u8> {
    let main_config = MainConfig::from_file(&args.config)?;
    let db_path = main_config.db_path()?;

    match args.command {
        Commands::Init => {
            let store = SqliteStore::open(&db_path)?;
            println!(
                "Reading store ready: {} ({} readings)",
                db_path.display(),
                store.count()?
            );
            Ok(0)
        }
        Commands::Log {
            sensors,
            count,
            interval_secs,
        } => cmd_log(&db_path, sensors, count, interval_secs).await,
        Commands::Publish { batch_size } => {
            let coordinator =
                build_coordinator(&args.publish_config, &main_config, &db_path, batch_size)?;
            let report = coordinator.run_once().await?;
            print_report(&report);
            Ok(report.exit_code())
        }
        Commands::Watch {
            interval_secs,
            batch_size,
        } => {
            let coordinator =
                build_coordinator(&args.publish_config, &main_config, &db_path, batch_size)?;
            cmd_watch(coordinator, interval_secs).await
        }
        Commands::Stats => {
            let store = SqliteStore::open_existing(&db_path)?;
            let counts = store.counts()?;
            println!("Database: {}", db_path.display());
            println!("  Total readings:       {}", counts.total);
            println!("  Published:            {}", counts.published());
            println!("  Awaiting publication: {}", counts.unpublished);
            Ok(0)
        }
    }
}

fn build_coordinator(
    publish_config: &Path,
    main_config: &MainConfig,
    db_path: &Path,
    batch_size: Option<usize>,
) -> Result<PublishCoordinator<SqliteStore>> {
    let sink_config = PublishConfig::from_file(publish_config)?;
    let sinks = build_sinks(&sink_config)?;

    let mut config = main_config.coordinator()?;
    if let Some(size) = batch_size {
        config.batch_size = size;
    }

    let store = SqliteStore::open_existing(db_path)?;

    tracing::info!("Publisher configured:");
    tracing::info!("  Database: {}", db_path.display());
    tracing::info!("  Batch size: {}", config.batch_size);
    tracing::info!(
        "  Sinks: {} configured, {} enabled",
        sink_config.sinks.len(),
        sink_config.enabled_count()
    );

    Ok(PublishCoordinator::new(config, store, sinks))
}

async fn cmd_log(db_path: &Path, sensors: PathBuf, count: u64, interval_secs: u64) -> Result<u8> {
    let sensor_set = SensorSet::from_file(&sensors)?;
    if sensor_set.is_empty() {
        tracing::warn!("No usable sensors in {}", sensors.display());
    }

    let store = SqliteStore::open(db_path)
        .with_context(|| format!("opening reading store {}", db_path.display()))?;
    let mut simulator = Simulator::new(sensor_set);

    for i in 0..count {
        if i > 0 && interval_secs > 0 {
            tokio::time::sleep(Duration::from_secs(interval_secs)).await;
        }

        let sample = simulator.sample();
        let id = record_sample(&store, &sample)?;
        println!("Reading {}: {}", id, serde_json::Value::Object(sample));
    }

    Ok(0)
}

async fn cmd_watch(coordinator: PublishCoordinator<SqliteStore>, interval_secs: u64) -> Result<u8> {
    if interval_secs == 0 {
        anyhow::bail!("--interval-secs must be greater than zero");
    }

    println!("Publishing every {}s. Press Ctrl+C to stop...", interval_secs);
    println!();

    let mut stats = PublishStats::default();
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("listening for Ctrl+C")?;
                println!("\nShutting down...");
                break;
            }
            _ = interval.tick() => {
                // Store errors end the loop; sink failures only retain the batch.
                let report = coordinator.run_once().await?;
                print_report(&report);
                stats.record(&report);
            }
        }
    }

    println!("\nFinal Statistics:");
    print_stats(&stats);
    Ok(0)
}

fn print_report(report: &RunReport) {
    println!("Fetched {} readings", report.fetched);
    for sink in &report.sinks {
        println!("  {} sink '{}': {}", sink.kind, sink.name, sink.status);
    }
    println!("Outcome: {}", report.outcome);
}

fn print_stats(stats: &PublishStats) {
    println!("  Runs:               {}", stats.runs);
    println!("  Empty runs:         {}", stats.empty_runs);
    println!("  Readings published: {}", stats.readings_published);
    println!("  Retained runs:      {}", stats.retained_runs);
    println!("  Commit failures:    {}", stats.commit_failures);
}
