// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery sinks
//!
//! A sink accepts a whole [`Batch`] and reports a single outcome. Three
//! implementations are selected by configuration:
//!
//! ```text
//! SinkDescriptor::Http     --> HttpSink      (one POST per batch)
//! SinkDescriptor::Mqtt     --> MqttSink      (one QoS 1 message per reading)
//! SinkDescriptor::Disabled --> DisabledSink  (always Ok, transmits nothing)
//! ```

pub mod http;
pub mod mqtt;

pub use http::HttpSink;
pub use mqtt::{AckStatus, MqttConnector, MqttSession, MqttSink, RumqttcConnector};

use crate::config::{PublishConfig, SinkDescriptor, SinkKind};
use crate::error::{ConfigError, SinkError};
use crate::store::Batch;
use async_trait::async_trait;

/// Delivery capability
///
/// Each call is independent: a failed send never undoes what another sink
/// already accepted.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Configured sink name
    fn name(&self) -> &str;

    /// Transport family
    fn kind(&self) -> SinkKind;

    /// Disabled sinks succeed without transmitting.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Deliver the batch. `Ok` means every reading was accepted.
    async fn send(&self, batch: &Batch) -> Result<(), SinkError>;
}

/// Placeholder for a sink switched off in configuration.
#[derive(Debug, Clone)]
pub struct DisabledSink {
    name: String,
    kind: SinkKind,
}

impl DisabledSink {
    pub fn new(name: impl Into<String>, kind: SinkKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[async_trait]
impl Sink for DisabledSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn send(&self, _batch: &Batch) -> Result<(), SinkError> {
        tracing::info!("{} sink '{}' is disabled. Skipping.", self.kind, self.name);
        Ok(())
    }
}

/// Instantiate every configured sink, preserving dispatch order.
pub fn build_sinks(config: &PublishConfig) -> Result<Vec<Box<dyn Sink>>, ConfigError> {
    config
        .sinks
        .iter()
        .map(|descriptor| -> Result<Box<dyn Sink>, ConfigError> {
            Ok(match descriptor {
                SinkDescriptor::Http { name, config } => {
                    Box::new(HttpSink::new(name.clone(), config.clone())?)
                }
                SinkDescriptor::Mqtt { name, config } => {
                    Box::new(MqttSink::new(name.clone(), config.clone()))
                }
                SinkDescriptor::Disabled { name, kind } => {
                    Box::new(DisabledSink::new(name.clone(), *kind))
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Reading;

    #[tokio::test]
    async fn test_disabled_sink_is_vacuous() {
        let sink = DisabledSink::new("off", SinkKind::Http);
        let batch = Batch::new(vec![Reading {
            id: 1,
            timestamp: "2025-01-01T00:00:00".into(),
            payload: "{}".into(),
            published: false,
        }]);

        assert!(!sink.is_enabled());
        assert_eq!(sink.send(&batch).await, Ok(()));
    }

    #[test]
    fn test_build_sinks_preserves_order() {
        let config = PublishConfig::from_json_str(
            r#"{
                "api_endpoints": {
                    "primary": {"enabled": true, "url": "http://127.0.0.1:9/ingest", "api_key": "k"},
                    "legacy": {"enabled": false}
                },
                "mqtt_brokers": {
                    "local": {"enabled": true, "host": "127.0.0.1", "topic_prefix": "dl"}
                }
            }"#,
        )
        .unwrap();

        let sinks = build_sinks(&config).unwrap();
        let summary: Vec<_> = sinks
            .iter()
            .map(|s| (s.name().to_string(), s.kind(), s.is_enabled()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("primary".to_string(), SinkKind::Http, true),
                ("legacy".to_string(), SinkKind::Http, false),
                ("local".to_string(), SinkKind::Mqtt, true),
            ]
        );
    }
}
