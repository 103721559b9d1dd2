// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datalogger configuration
//!
//! Two JSON files drive a run:
//!
//! - the main config, which says where the reading store lives
//!   (`database.db_path`) and optionally tunes the publisher;
//! - the publish config, which lists HTTP endpoints (`api_endpoints`) and
//!   MQTT brokers (`mqtt_brokers`) by name.
//!
//! Sink descriptors are validated here, before any network activity. A
//! disabled sink is never inspected beyond its `enabled` flag.

use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default main configuration file name
pub const DEFAULT_MAIN_CONFIG: &str = "testid-modbus.json";

/// Default publish configuration file name
pub const DEFAULT_PUBLISH_CONFIG: &str = "testid-publish.json";

/// Default number of readings per batch
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default bound on a single sink call, enforced by the coordinator
pub const DEFAULT_SINK_CALL_TIMEOUT_SECS: u64 = 120;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_ACK_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MQTT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MQTT_KEEP_ALIVE_SECS: u64 = 60;

/// Largest packet MQTT 3.1.1 can encode (256 MiB remaining length)
pub const MQTT_MAX_PACKET_SIZE: usize = 268_435_455;

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Expand a leading `~` against `$HOME`.
///
/// Paths without a leading `~`, or with `~user` forms, are returned as-is.
/// If `$HOME` is unset the path is returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return PathBuf::from(path),
    };

    match std::env::var_os("HOME") {
        Some(home) => {
            let mut expanded = PathBuf::from(home);
            let rest = rest.trim_start_matches('/');
            if !rest.is_empty() {
                expanded.push(rest);
            }
            expanded
        }
        None => PathBuf::from(path),
    }
}

// ============================================================================
// Main configuration
// ============================================================================

/// Main configuration file (`testid-modbus.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MainConfig {
    /// Reading store settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Publisher tuning
    #[serde(default)]
    pub publisher: PublisherSettings,
}

/// `database` section of the main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file; `~` is expanded
    pub db_path: Option<String>,
}

/// `publisher` section of the main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    /// Maximum readings fetched per run
    pub batch_size: usize,

    /// Upper bound on any single sink call, in seconds
    pub sink_call_timeout_seconds: u64,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            sink_call_timeout_seconds: DEFAULT_SINK_CALL_TIMEOUT_SECS,
        }
    }
}

impl MainConfig {
    /// Load the main configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }

    /// Parse the main configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Json {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Resolved store location, with `~` expanded.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match self.database.db_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Ok(expand_home(path)),
            _ => Err(ConfigError::Invalid(
                "'database.db_path' not found in main configuration".into(),
            )),
        }
    }

    /// Coordinator settings derived from the `publisher` section.
    pub fn coordinator(&self) -> Result<CoordinatorConfig, ConfigError> {
        let config = CoordinatorConfig::builder()
            .batch_size(self.publisher.batch_size)
            .sink_call_timeout(Duration::from_secs(
                self.publisher.sink_call_timeout_seconds,
            ))
            .build();
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Coordinator configuration
// ============================================================================

/// Publish coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum readings fetched per run
    pub batch_size: usize,

    /// Upper bound on any single sink call
    pub sink_call_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            sink_call_timeout: Duration::from_secs(DEFAULT_SINK_CALL_TIMEOUT_SECS),
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config builder
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Reject settings that would stall every sink call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sink_call_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "sink call timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    batch_size: Option<usize>,
    sink_call_timeout: Option<Duration>,
}

impl CoordinatorConfigBuilder {
    /// Set the batch size (0 fetches nothing)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the per-sink call bound
    pub fn sink_call_timeout(mut self, timeout: Duration) -> Self {
        self.sink_call_timeout = Some(timeout);
        self
    }

    /// Build the configuration
    pub fn build(self) -> CoordinatorConfig {
        let defaults = CoordinatorConfig::default();

        CoordinatorConfig {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            sink_call_timeout: self
                .sink_call_timeout
                .unwrap_or(defaults.sink_call_timeout),
        }
    }
}

// ============================================================================
// Sink descriptors
// ============================================================================

/// Sink transport family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SinkKind {
    Http,
    Mqtt,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Http => write!(f, "API"),
            SinkKind::Mqtt => write!(f, "MQTT"),
        }
    }
}

/// Validated settings for an enabled HTTP sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSinkConfig {
    pub url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// Validated settings for an enabled MQTT sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSinkConfig {
    pub host: String,
    pub port: u16,
    pub topic_prefix: String,
    /// Applied only when both username and password are configured
    pub credentials: Option<(String, String)>,
    /// Bounded wait for each message's acknowledgment
    pub ack_timeout: Duration,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    /// Upper bound on any single packet, either direction
    pub max_packet_size: usize,
}

impl MqttSinkConfig {
    /// Topic every reading is published to
    pub fn data_topic(&self) -> String {
        format!("{}/readings", self.topic_prefix)
    }
}

/// A named sink, validated and ready to be instantiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkDescriptor {
    Http { name: String, config: HttpSinkConfig },
    Mqtt { name: String, config: MqttSinkConfig },
    Disabled { name: String, kind: SinkKind },
}

impl SinkDescriptor {
    pub fn name(&self) -> &str {
        match self {
            Self::Http { name, .. } | Self::Mqtt { name, .. } | Self::Disabled { name, .. } => {
                name
            }
        }
    }

    pub fn kind(&self) -> SinkKind {
        match self {
            Self::Http { .. } => SinkKind::Http,
            Self::Mqtt { .. } => SinkKind::Mqtt,
            Self::Disabled { kind, .. } => *kind,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled { .. })
    }
}

/// On-disk shape of an HTTP endpoint entry
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpEntry {
    #[allow(dead_code)]
    enabled: bool,
    url: Option<String>,
    api_key: Option<String>,
    timeout_seconds: Option<u64>,
}

/// On-disk shape of an MQTT broker entry
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MqttEntry {
    #[allow(dead_code)]
    enabled: bool,
    host: Option<String>,
    port: Option<u16>,
    topic_prefix: Option<String>,
    username: Option<String>,
    password: Option<String>,
    ack_timeout_seconds: Option<u64>,
    connect_timeout_seconds: Option<u64>,
    max_packet_size_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawPublishConfig {
    #[serde(default)]
    api_endpoints: Map<String, Value>,
    #[serde(default)]
    mqtt_brokers: Map<String, Value>,
}

/// Publish configuration file (`testid-publish.json`)
///
/// Sinks are kept in dispatch order: every HTTP endpoint in declaration
/// order, then every MQTT broker in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishConfig {
    pub sinks: Vec<SinkDescriptor>,
}

impl PublishConfig {
    /// Load and validate the publish configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw: RawPublishConfig = read_json(path.as_ref())?;
        Self::from_raw(raw)
    }

    /// Parse and validate the publish configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let raw: RawPublishConfig =
            serde_json::from_str(json).map_err(|source| ConfigError::Json {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawPublishConfig) -> Result<Self, ConfigError> {
        let mut sinks = Vec::with_capacity(raw.api_endpoints.len() + raw.mqtt_brokers.len());

        for (name, value) in raw.api_endpoints {
            sinks.push(Self::parse_http(name, value)?);
        }
        for (name, value) in raw.mqtt_brokers {
            sinks.push(Self::parse_mqtt(name, value)?);
        }

        Ok(Self { sinks })
    }

    /// Number of sinks that will actually transmit.
    pub fn enabled_count(&self) -> usize {
        self.sinks.iter().filter(|s| s.is_enabled()).count()
    }

    fn is_enabled(name: &str, value: &Value) -> Result<bool, ConfigError> {
        let entry = value.as_object().ok_or_else(|| ConfigError::InvalidSink {
            sink: name.to_string(),
            reason: "expected a JSON object".into(),
        })?;

        match entry.get("enabled") {
            None => Ok(false),
            Some(Value::Bool(enabled)) => Ok(*enabled),
            Some(other) => Err(ConfigError::InvalidSink {
                sink: name.to_string(),
                reason: format!("'enabled' must be a boolean, got {}", other),
            }),
        }
    }

    fn decode_entry<T: DeserializeOwned>(name: &str, value: Value) -> Result<T, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::InvalidSink {
            sink: name.to_string(),
            reason: e.to_string(),
        })
    }

    fn parse_http(name: String, value: Value) -> Result<SinkDescriptor, ConfigError> {
        if !Self::is_enabled(&name, &value)? {
            return Ok(SinkDescriptor::Disabled {
                name,
                kind: SinkKind::Http,
            });
        }

        let entry: HttpEntry = Self::decode_entry(&name, value)?;
        let url = required(&name, "url", entry.url)?;
        let api_key = required(&name, "api_key", entry.api_key)?;
        let timeout = positive_secs(
            &name,
            "timeout_seconds",
            entry.timeout_seconds.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        )?;

        Ok(SinkDescriptor::Http {
            name,
            config: HttpSinkConfig {
                url,
                api_key,
                timeout,
            },
        })
    }

    fn parse_mqtt(name: String, value: Value) -> Result<SinkDescriptor, ConfigError> {
        if !Self::is_enabled(&name, &value)? {
            return Ok(SinkDescriptor::Disabled {
                name,
                kind: SinkKind::Mqtt,
            });
        }

        let entry: MqttEntry = Self::decode_entry(&name, value)?;
        let host = required(&name, "host", entry.host)?;
        let topic_prefix = required(&name, "topic_prefix", entry.topic_prefix)?;
        let credentials = match (entry.username, entry.password) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user, pass))
            }
            _ => None,
        };
        let ack_timeout = positive_secs(
            &name,
            "ack_timeout_seconds",
            entry
                .ack_timeout_seconds
                .unwrap_or(DEFAULT_MQTT_ACK_TIMEOUT_SECS),
        )?;
        let connect_timeout = positive_secs(
            &name,
            "connect_timeout_seconds",
            entry
                .connect_timeout_seconds
                .unwrap_or(DEFAULT_MQTT_CONNECT_TIMEOUT_SECS),
        )?;

        let max_packet_size = entry.max_packet_size_bytes.unwrap_or(MQTT_MAX_PACKET_SIZE);
        if max_packet_size == 0 || max_packet_size > MQTT_MAX_PACKET_SIZE {
            return Err(ConfigError::InvalidSink {
                sink: name,
                reason: format!(
                    "'max_packet_size_bytes' must be between 1 and {}",
                    MQTT_MAX_PACKET_SIZE
                ),
            });
        }

        Ok(SinkDescriptor::Mqtt {
            name,
            config: MqttSinkConfig {
                host,
                port: entry.port.unwrap_or(DEFAULT_MQTT_PORT),
                topic_prefix,
                credentials,
                ack_timeout,
                connect_timeout,
                keep_alive: Duration::from_secs(DEFAULT_MQTT_KEEP_ALIVE_SECS),
                max_packet_size,
            },
        })
    }
}

fn required(sink: &str, field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingField {
            sink: sink.to_string(),
            field,
        }),
    }
}

fn positive_secs(sink: &str, field: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidSink {
            sink: sink.to_string(),
            reason: format!("'{}' must be greater than zero", field),
        });
    }
    Ok(Duration::from_secs(secs))
}
