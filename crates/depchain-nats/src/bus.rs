//! NATS JetStream event bus.

use async_nats::jetstream::{
    self, consumer::DeliverPolicy, consumer::pull::Config as ConsumerConfig,
    stream::Config as StreamConfig,
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use depchain_core::events::Event;
use depchain_core::ports::{EventBus, EventStream};
use depchain_core::{Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::NatsConfig;
use crate::health::HealthCheck;
use crate::metrics::{EventKind, NatsMetrics};

/// NATS-based event bus using JetStream for durability.
#[derive(Clone)]
pub struct NatsEventBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
    metrics: Arc<NatsMetrics>,
    shutdown: Arc<AtomicBool>,
}

impl NatsEventBus {
    /// Connect to a single NATS server with default settings.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(NatsConfig::new(url)).await
    }

    /// Connect with custom configuration.
    pub async fn connect_with_config(config: NatsConfig) -> Result<Self> {
        let urls = config.urls.join(",");
        info!("Connecting to NATS at {}", urls);

        let metrics = NatsMetrics::new();
        let callback_metrics = metrics.clone();

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(config.connection_timeout)
            .request_timeout(Some(config.request_timeout))
            .max_reconnects(config.max_reconnect_attempts)
            .event_callback(move |event| {
                let metrics = callback_metrics.clone();
                async move {
                    match event {
                        async_nats::Event::Connected => {
                            info!("NATS connection established");
                            metrics.set_connected(true);
                        }
                        async_nats::Event::Disconnected => {
                            warn!("NATS connection lost");
                            metrics.set_connected(false);
                            metrics.record_disconnect();
                        }
                        other => debug!(event = ?other, "NATS client event"),
                    }
                }
            })
            .retry_on_initial_connect()
            .connect(&urls)
            .await
            .map_err(|e| Error::EventBus(format!("Failed to connect to NATS: {}", e)))?;

        metrics.set_connected(true);

        let jetstream = jetstream::new(client.clone());

        let stream_config = StreamConfig {
            name: config.stream_name.clone(),
            subjects: config.subjects(),
            retention: jetstream::stream::RetentionPolicy::Limits,
            max_age: config.max_age,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| Error::EventBus(format!("Failed to create stream: {}", e)))?;

        if config.enable_dlq {
            let dlq_config = StreamConfig {
                name: config.dlq_stream_name.clone(),
                subjects: vec!["dlq.>".to_string()],
                retention: jetstream::stream::RetentionPolicy::Limits,
                max_age: Duration::from_secs(86400 * 30),
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            };

            jetstream
                .get_or_create_stream(dlq_config)
                .await
                .map_err(|e| Error::EventBus(format!("Failed to create DLQ stream: {}", e)))?;

            info!("Dead letter queue stream initialized");
        }

        info!(stream = %config.stream_name, "Connected to NATS and initialized JetStream");

        Ok(Self {
            client,
            jetstream,
            config,
            metrics,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn metrics(&self) -> &Arc<NatsMetrics> {
        &self.metrics
    }

    /// Check connection health.
    pub fn health_check(&self) -> HealthCheck {
        HealthCheck::from_metrics(&self.metrics, self.is_connected())
    }

    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Send a message to the dead letter queue.
    pub async fn send_to_dlq(&self, subject: &str, payload: &[u8], reason: &str) -> Result<()> {
        dead_letter(
            &self.jetstream,
            &self.metrics,
            self.config.enable_dlq,
            subject,
            payload,
            reason,
        )
        .await
    }

    /// Graceful shutdown - drain all connections.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown");
        self.shutdown.store(true, Ordering::SeqCst);

        if let Err(e) = self.client.drain().await {
            error!("Error draining NATS connection: {}", e);
        }

        self.metrics.set_connected(false);
        info!("NATS connection drained");

        Ok(())
    }

    /// Get stream info.
    pub async fn stream_info(&self) -> Result<StreamInfo> {
        let mut stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| Error::EventBus(format!("Failed to get stream: {}", e)))?;

        let info = stream
            .info()
            .await
            .map_err(|e| Error::EventBus(format!("Failed to get stream info: {}", e)))?;

        Ok(StreamInfo {
            name: info.config.name.clone(),
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_seq: info.state.first_sequence,
            last_seq: info.state.last_sequence,
            consumer_count: info.state.consumer_count,
        })
    }

    async fn create_event_stream(
        &self,
        consumer: jetstream::consumer::Consumer<ConsumerConfig>,
    ) -> Result<EventStream> {
        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::EventBus(format!("Failed to get messages: {}", e)))?;

        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();
        let jetstream = self.jetstream.clone();
        let enable_dlq = self.config.enable_dlq;

        let stream = messages
            .take_while(move |_| {
                let running = !shutdown.load(Ordering::SeqCst);
                async move { running }
            })
            .then(move |msg_result| {
                let metrics = metrics.clone();
                let jetstream = jetstream.clone();
                async move {
                    let msg = msg_result
                        .map_err(|e| Error::EventBus(format!("Message error: {}", e)))?;

                    if let Err(e) = msg.ack().await {
                        warn!(subject = %msg.subject, error = %e, "Failed to ack message");
                    }

                    match serde_json::from_slice::<Event>(&msg.payload) {
                        Ok(event) => {
                            metrics.record_receive(EventKind::of(&event));
                            Ok(event)
                        }
                        Err(e) => {
                            metrics.record_decode_failure();
                            let reason = format!("Undecodable event: {}", e);
                            if let Err(dlq_err) = dead_letter(
                                &jetstream,
                                &metrics,
                                enable_dlq,
                                msg.subject.as_str(),
                                &msg.payload,
                                &reason,
                            )
                            .await
                            {
                                error!(error = %dlq_err, "Failed to dead-letter message");
                            }
                            Err(Error::Serialization(reason))
                        }
                    }
                }
            });

        Ok(Box::pin(stream))
    }
}

async fn dead_letter(
    jetstream: &jetstream::Context,
    metrics: &NatsMetrics,
    enabled: bool,
    subject: &str,
    payload: &[u8],
    reason: &str,
) -> Result<()> {
    if !enabled {
        return Ok(());
    }

    let dlq_subject = format!("dlq.{}", subject);
    let dlq_payload = serde_json::json!({
        "original_subject": subject,
        "payload": STANDARD.encode(payload),
        "reason": reason,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    let payload_bytes = serde_json::to_vec(&dlq_payload)?;

    jetstream
        .publish(dlq_subject, payload_bytes.into())
        .await
        .map_err(|e| Error::EventBus(format!("Failed to publish to DLQ: {}", e)))?
        .await
        .map_err(|e| Error::EventBus(format!("Failed to confirm DLQ publish: {}", e)))?;

    metrics.record_dlq();
    warn!(subject, reason, "Message sent to DLQ");

    Ok(())
}

/// Information about a JetStream stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub name: String,
    pub messages: u64,
    pub bytes: u64,
    pub first_seq: u64,
    pub last_seq: u64,
    pub consumer_count: usize,
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::EventBus(
                "Cannot publish: shutdown in progress".to_string(),
            ));
        }

        let subject = event.subject();
        let kind = EventKind::of(&event);
        let payload = serde_json::to_vec(&event)?;
        debug!(subject = %subject, "Publishing event");

        match self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
        {
            Ok(ack_future) => {
                ack_future
                    .await
                    .map_err(|e| Error::EventBus(format!("Failed to confirm publish: {}", e)))?;
                self.metrics.record_publish(kind);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_publish_failure();
                Err(Error::EventBus(format!(
                    "Failed to publish to {}: {}",
                    subject, e
                )))
            }
        }
    }

    /// Ephemeral consumer delivering only events published after the call;
    /// schedulers reconcile anything older themselves.
    async fn subscribe(&self, pattern: &str) -> Result<EventStream> {
        debug!(pattern, "Subscribing");

        let consumer = self
            .jetstream
            .create_consumer_on_stream(
                ConsumerConfig {
                    filter_subject: pattern.to_string(),
                    deliver_policy: DeliverPolicy::New,
                    max_deliver: self.config.max_deliver,
                    ack_wait: Duration::from_secs(30),
                    ..Default::default()
                },
                &self.config.stream_name,
            )
            .await
            .map_err(|e| Error::EventBus(format!("Failed to create consumer: {}", e)))?;

        self.create_event_stream(consumer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = NatsConfig::new("nats://localhost:4222")
            .with_stream_name("TEST_STREAM")
            .with_max_reconnects(5)
            .with_dlq(false)
            .with_max_deliver(5);

        assert_eq!(config.stream_name, "TEST_STREAM");
        assert_eq!(config.max_reconnect_attempts, Some(5));
        assert!(!config.enable_dlq);
        assert_eq!(config.max_deliver, 5);
    }

    #[test]
    fn test_stream_covers_every_event_subject() {
        use depchain_core::events::subject_matches;

        let config = NatsConfig::default();
        for subject in [
            "sourcestamp.created.1",
            "pending.added.compile.1",
            "pending.cancelled.compile.1",
            "buildset.admitted.compile.7",
            "buildset.completed.7",
            "dependency.failed.compile.1",
        ] {
            assert!(
                config.subjects().iter().any(|p| subject_matches(p, subject)),
                "{subject} not captured"
            );
        }
    }

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_connect() {
        let bus = NatsEventBus::connect("nats://localhost:4222").await;
        assert!(bus.is_ok());
    }
}
