// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT broker sink
//!
//! Publishes every reading of the batch as its own QoS 1 message on
//! `{topic_prefix}/readings` and waits for each PUBACK before moving on.
//!
//! Delivery is at-least-once: if message 3 of 5 is never acknowledged the
//! whole call fails even though messages 1 and 2 already reached the broker.
//! They are sent again on the next run.
//!
//! The session is closed with a DISCONNECT packet only when `send` runs to
//! completion. A caller that drops the future early (an outer timeout) drops
//! the session with it; the socket is closed without DISCONNECT and the
//! broker sees an abrupt disconnect.
//!
//! The broker client is reached through [`MqttConnector`] / [`MqttSession`].
//! [`RumqttcConnector`] is the production implementation.

use super::Sink;
use crate::config::{MqttSinkConfig, SinkKind};
use crate::error::SinkError;
use crate::store::Batch;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;

/// Outcome of waiting for one message's acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Confirmed,
    TimedOut,
}

/// Opens broker sessions.
#[async_trait]
pub trait MqttConnector: Send + Sync {
    /// Connect and wait for the broker to accept the session.
    async fn connect(&self, config: &MqttSinkConfig) -> Result<Box<dyn MqttSession>, SinkError>;
}

/// A live broker session.
#[async_trait]
pub trait MqttSession: Send {
    /// Publish one QoS 1 message and wait up to `wait` for its acknowledgment.
    async fn publish_acked(
        &mut self,
        topic: &str,
        payload: &[u8],
        wait: Duration,
    ) -> Result<AckStatus, SinkError>;

    /// Release the connection. Best effort; never fails.
    async fn disconnect(&mut self);
}

/// MQTT broker sink
pub struct MqttSink<C: MqttConnector = RumqttcConnector> {
    name: String,
    config: MqttSinkConfig,
    connector: C,
}

impl MqttSink<RumqttcConnector> {
    /// Create a sink backed by rumqttc.
    pub fn new(name: impl Into<String>, config: MqttSinkConfig) -> Self {
        Self::with_connector(name, config, RumqttcConnector)
    }
}

impl<C: MqttConnector> MqttSink<C> {
    /// Create a sink using a custom connector.
    pub fn with_connector(name: impl Into<String>, config: MqttSinkConfig, connector: C) -> Self {
        Self {
            name: name.into(),
            config,
            connector,
        }
    }

    async fn publish_batch(
        &self,
        session: &mut dyn MqttSession,
        batch: &Batch,
    ) -> Result<(), SinkError> {
        let topic = self.config.data_topic();
        tracing::info!("Publishing {} messages to topic: {}...", batch.len(), topic);

        for reading in batch.readings() {
            let status = session
                .publish_acked(&topic, reading.payload.as_bytes(), self.config.ack_timeout)
                .await?;
            if status == AckStatus::TimedOut {
                return Err(SinkError::PublishTimeout(reading.id));
            }
            tracing::trace!("Reading {} acknowledged by {}", reading.id, self.config.host);
        }

        tracing::info!("MQTT publish complete.");
        Ok(())
    }
}

#[async_trait]
impl<C: MqttConnector> Sink for MqttSink<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Mqtt
    }

    async fn send(&self, batch: &Batch) -> Result<(), SinkError> {
        tracing::info!(
            "Connecting to MQTT broker: {}:{}...",
            self.config.host,
            self.config.port
        );
        let mut session = self.connector.connect(&self.config).await?;

        let result = self.publish_batch(session.as_mut(), batch).await;

        session.disconnect().await;
        tracing::info!("MQTT client disconnected.");

        result
    }
}

// ============================================================================
// rumqttc implementation
// ============================================================================

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Connector backed by rumqttc's `AsyncClient` / `EventLoop`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttcConnector;

/// Session driving the rumqttc event loop inline.
pub struct RumqttcSession {
    client: AsyncClient,
    event_loop: EventLoop,
}

fn client_id() -> String {
    format!("datalogger-{}-{:08x}", std::process::id(), fastrand::u32(..))
}

#[async_trait]
impl MqttConnector for RumqttcConnector {
    async fn connect(&self, config: &MqttSinkConfig) -> Result<Box<dyn MqttSession>, SinkError> {
        let mut options = MqttOptions::new(client_id(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_max_packet_size(config.max_packet_size, config.max_packet_size);
        if let Some((username, password)) = &config.credentials {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let handshake = tokio::time::timeout(config.connect_timeout, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(SinkError::Transport(format!(
                                "broker refused connection: {:?}",
                                ack.code
                            )))
                        };
                    }
                    Ok(_) => {}
                    Err(e) => return Err(SinkError::Transport(e.to_string())),
                }
            }
        })
        .await;

        match handshake {
            Ok(Ok(())) => {
                tracing::debug!("Connected to {}:{}", config.host, config.port);
                Ok(Box::new(RumqttcSession { client, event_loop }))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SinkError::Transport(format!(
                "timed out connecting to {}:{} after {:?}",
                config.host, config.port, config.connect_timeout
            ))),
        }
    }
}

#[async_trait]
impl MqttSession for RumqttcSession {
    async fn publish_acked(
        &mut self,
        topic: &str,
        payload: &[u8],
        wait: Duration,
    ) -> Result<AckStatus, SinkError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let event_loop = &mut self.event_loop;
        let acked = tokio::time::timeout(wait, async {
            let mut pkid = None;
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(id))) => pkid = Some(id),
                    Ok(Event::Incoming(Packet::PubAck(ack))) if Some(ack.pkid) == pkid => {
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => return Err(SinkError::Transport(e.to_string())),
                }
            }
        })
        .await;

        match acked {
            Ok(Ok(())) => Ok(AckStatus::Confirmed),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(AckStatus::TimedOut),
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!("Error queueing MQTT disconnect: {}", e);
            return;
        }

        let event_loop = &mut self.event_loop;
        let _ = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
    }
}
