// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Modbus Datalogger
//!
//! Logs sensor readings into a local SQLite store and publishes them, in
//! batches, to HTTP endpoints and MQTT brokers.
//!
//! # Features
//!
//! - **SQLite Store** -- Append-only readings table with a published flag
//! - **HTTP Sink** -- One JSON array per batch, authenticated by API key
//! - **MQTT Sink** -- One QoS 1 message per reading, every ack awaited
//! - **At-least-once** -- A batch is marked published only after every sink
//!   accepted it; any failure retains the whole batch for the next run
//!
//! # Architecture
//!
//! ```text
//! Simulator --> record_sample --> SqliteStore
//!                                     |
//!                         PublishCoordinator::run_once
//!                                     |
//!                   +-----------------+-----------------+
//!                   |                 |                 |
//!               HttpSink          MqttSink        DisabledSink
//! ```
//!
//! # Example
//!
//! ```ignore
//! use datalogger::{build_sinks, MainConfig, PublishConfig, PublishCoordinator, SqliteStore};
//!
//! let main = MainConfig::from_file("testid-modbus.json")?;
//! let sinks = build_sinks(&PublishConfig::from_file("testid-publish.json")?)?;
//! let store = SqliteStore::open_existing(main.db_path()?)?;
//!
//! let coordinator = PublishCoordinator::new(main.coordinator()?, store, sinks);
//! let report = coordinator.run_once().await?;
//! println!("{}", report.outcome);
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod simulator;
pub mod sink;
pub mod sqlite;
pub mod store;

pub use config::{
    CoordinatorConfig, HttpSinkConfig, MainConfig, MqttSinkConfig, PublishConfig, SinkDescriptor,
    SinkKind,
};
pub use coordinator::{
    PublishCoordinator, PublishStats, RunOutcome, RunReport, SinkReport, SinkStatus,
};
pub use error::{ConfigError, PublishError, SinkError, StoreError};
pub use simulator::{RandomSource, SensorSet, SensorSpec, SensorValue, Simulator, ValueSource};
pub use sink::{build_sinks, DisabledSink, HttpSink, MqttSink, Sink};
pub use sqlite::SqliteStore;
pub use store::{Batch, Reading, ReadingStore, StoreCounts};

use serde_json::{Map, Value};

/// Timestamp format of stored readings (local time, microseconds)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Current local time in [`TIMESTAMP_FORMAT`]
pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Store one simulator sample as an unpublished reading.
pub fn record_sample<S: ReadingStore + ?Sized>(
    store: &S,
    sample: &Map<String, Value>,
) -> Result<i64, StoreError> {
    let payload = serde_json::to_string(sample)
        .map_err(|e| StoreError::ConstraintViolation(format!("unserializable sample: {}", e)))?;
    let id = store.insert_reading(&now_timestamp(), &payload)?;
    tracing::debug!("Stored reading {} ({} sensors)", id, sample.len());
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sample() {
        let store = SqliteStore::new_in_memory().unwrap();
        let mut sample = Map::new();
        sample.insert("cpu_temp".into(), Value::from(42));
        sample.insert("fan_on".into(), Value::Bool(false));

        let id = record_sample(&store, &sample).unwrap();

        let readings = store.fetch_unpublished(10).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].id, id);
        assert_eq!(readings[0].payload, r#"{"cpu_temp":42,"fan_on":false}"#);
        assert!(
            chrono::NaiveDateTime::parse_from_str(&readings[0].timestamp, TIMESTAMP_FORMAT).is_ok()
        );
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let first = now_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = now_timestamp();
        assert!(first < second);
    }
}
