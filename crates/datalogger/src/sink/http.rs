// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP API sink
//!
//! Sends the whole batch as one JSON array:
//!
//! ```text
//! POST <url>
//! Content-Type: application/json
//! X-API-Key: <api_key>
//!
//! [{...payload 1...}, {...payload 2...}, ...]
//! ```
//!
//! Any 2xx status accepts the batch; anything else rejects all of it.

use super::Sink;
use crate::config::{HttpSinkConfig, SinkKind};
use crate::error::{ConfigError, SinkError};
use crate::store::Batch;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::Value;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// HTTP endpoint sink
pub struct HttpSink {
    name: String,
    config: HttpSinkConfig,
    client: Client,
}

impl HttpSink {
    /// Create a sink with a client bounded by the configured timeout.
    pub fn new(name: impl Into<String>, config: HttpSinkConfig) -> Result<Self, ConfigError> {
        let name = name.into();
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::InvalidSink {
                sink: name.clone(),
                reason: format!("could not build HTTP client: {}", e),
            })?;

        Ok(Self {
            name,
            config,
            client,
        })
    }
}

/// Serialize the batch payloads into one JSON array, preserving order.
pub fn encode_batch(batch: &Batch) -> Result<Vec<u8>, SinkError> {
    let objects = batch
        .readings()
        .iter()
        .map(|reading| {
            serde_json::from_str::<Value>(&reading.payload).map_err(|e| {
                SinkError::Encode(format!("reading {} has invalid JSON payload: {}", reading.id, e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    serde_json::to_vec(&Value::Array(objects)).map_err(|e| SinkError::Encode(e.to_string()))
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Http
    }

    async fn send(&self, batch: &Batch) -> Result<(), SinkError> {
        let body = encode_batch(batch)?;

        tracing::info!(
            "Sending batch of {} records to API: {}...",
            batch.len(),
            self.config.url
        );

        let response = self
            .client
            .post(&self.config.url)
            .header(CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SinkError::Transport(format!(
                        "request to {} timed out after {:?}",
                        self.config.url, self.config.timeout
                    ))
                } else {
                    SinkError::Transport(format!("request to {} failed: {}", self.config.url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::HttpStatus(status.as_u16()));
        }

        tracing::info!("API Success (Status {}).", status.as_u16());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Reading;

    fn reading(id: i64, payload: &str) -> Reading {
        Reading {
            id,
            timestamp: "2025-01-01T00:00:00".into(),
            payload: payload.into(),
            published: false,
        }
    }

    #[test]
    fn test_encode_batch_is_ordered_array() {
        let batch = Batch::new(vec![
            reading(2, r#"{"reading": 2, "unit": "C"}"#),
            reading(1, r#"{"reading": 1}"#),
        ]);

        let body = encode_batch(&batch).unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!([{"reading": 2, "unit": "C"}, {"reading": 1}])
        );
    }

    #[test]
    fn test_encode_batch_rejects_invalid_payload() {
        let batch = Batch::new(vec![reading(1, "{}"), reading(9, "{broken")]);
        match encode_batch(&batch) {
            Err(SinkError::Encode(msg)) => assert!(msg.contains("reading 9")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
