//! Reliable ingestion and publishing.
//!
//! [`AlertPipeline`] consumes observations from the classifier's input
//! queue, classifies them, and republishes the resulting alerts with
//! publisher confirms. Each delivery moves through
//!
//! ```text
//! received -> classified | failed -> acknowledged -> enqueued (if classified) -> flushed | still queued
//! ```
//!
//! Acknowledging before the flush means a crash loses at most the alerts of
//! the delivery being handled, and never publishes them twice. A delivery
//! that fails to classify is acknowledged and dropped.

use std::time::Duration;

use beacon_broker::{Broker, BrokerError, Delivery, ExchangeKind, QueueOptions};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::ObservationClassifier;
use crate::error::{AlerterError, PipelineError};
use crate::queue::{PublishQueue, QueuedAlert};
use crate::types::Alert;

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Exchange observations arrive on.
    pub observation_exchange: String,
    /// Exchange alerts are published to.
    pub alert_exchange: String,
    /// Capacity of the publish queue.
    pub max_queue_size: usize,
    /// Pause between attempts to delete the input queue on termination.
    pub retry_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            observation_exchange: "alert".to_string(),
            alert_exchange: "alert".to_string(),
            max_queue_size: 1000,
            retry_interval: Duration::from_secs(10),
        }
    }
}

impl PipelineConfig {
    /// Number of unacknowledged deliveries the broker may hand out.
    ///
    /// A fifth of the publish queue capacity, and at least one.
    #[must_use]
    pub fn prefetch_count(&self) -> u16 {
        let fifth = (self.max_queue_size as f64 / 5.0).round();
        u16::try_from(fifth as u64).unwrap_or(u16::MAX).max(1)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns `AlerterError::InvalidConfig` for empty exchange names or a zero queue size.
    pub fn validate(&self) -> Result<(), AlerterError> {
        if self.observation_exchange.is_empty() || self.alert_exchange.is_empty() {
            return Err(AlerterError::InvalidConfig {
                reason: "exchange names cannot be empty".to_string(),
            });
        }
        if self.max_queue_size == 0 {
            return Err(AlerterError::InvalidConfig {
                reason: "max_queue_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Counters describing what a pipeline has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Deliveries handled.
    pub received: u64,
    /// Deliveries that could not be classified.
    pub classification_failures: u64,
    /// Alerts placed on the publish queue.
    pub alerts_enqueued: u64,
    /// Alerts evicted from a full publish queue.
    pub alerts_evicted: u64,
    /// Alerts confirmed by the broker.
    pub alerts_published: u64,
    /// Publish attempts the broker did not confirm.
    pub delivery_failures: u64,
}

/// Consumes observations, classifies them and publishes alerts.
pub struct AlertPipeline<B, C> {
    broker: B,
    classifier: C,
    config: PipelineConfig,
    queue: PublishQueue,
    stats: PipelineStats,
}

impl<B: Broker, C: ObservationClassifier> AlertPipeline<B, C> {
    /// Creates a pipeline. Nothing touches the broker until [`Self::initialize`].
    pub fn new(broker: B, classifier: C, config: PipelineConfig) -> Self {
        let queue = PublishQueue::new(config.max_queue_size);
        Self {
            broker,
            classifier,
            config,
            queue,
            stats: PipelineStats::default(),
        }
    }

    /// Returns the settings.
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the counters.
    pub const fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Returns the alerts waiting to be published.
    pub const fn pending(&self) -> &PublishQueue {
        &self.queue
    }

    /// Returns the classifier.
    pub const fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Returns the broker connection.
    pub const fn broker(&self) -> &B {
        &self.broker
    }

    /// Connects and declares the topology: the alert exchange, the durable
    /// input queue and its binding. Also sets the prefetch count and turns
    /// on publisher confirms.
    ///
    /// Safe to call again after a reconnect.
    pub async fn initialize(&mut self) -> Result<(), PipelineError> {
        let input_queue = self.classifier.input_queue();
        let routing_key = self.classifier.input_routing_key();

        self.broker.connect().await?;
        self.broker
            .exchange_declare(&self.config.alert_exchange, ExchangeKind::Topic, true)
            .await?;
        if self.config.observation_exchange != self.config.alert_exchange {
            self.broker
                .exchange_declare(&self.config.observation_exchange, ExchangeKind::Topic, true)
                .await?;
        }
        self.broker
            .queue_declare(&input_queue, QueueOptions::default())
            .await?;
        self.broker
            .queue_bind(&input_queue, &self.config.observation_exchange, &routing_key)
            .await?;
        self.broker.basic_qos(self.config.prefetch_count()).await?;
        self.broker.confirm_delivery().await?;

        info!(
            alerter = self.classifier.name(),
            queue = %input_queue,
            routing_key = %routing_key,
            prefetch = self.config.prefetch_count(),
            "pipeline initialized"
        );
        Ok(())
    }

    /// Handles one delivery: classify, acknowledge, enqueue, flush.
    ///
    /// Classification failures and unconfirmed publishes are logged and
    /// swallowed. Broker errors from the acknowledgement or the flush are
    /// returned.
    pub async fn handle_delivery(&mut self, delivery: Delivery) -> Result<(), PipelineError> {
        self.stats.received += 1;

        let outcome = if self.classifier.accepts(&delivery.routing_key) {
            self.classifier.process(&delivery.body, Utc::now())
        } else {
            Err(AlerterError::unrecognized(format!(
                "routing key '{}' is not handled by {}",
                delivery.routing_key,
                self.classifier.name()
            )))
        };

        let alerts = match outcome {
            Ok(alerts) => Some(alerts),
            Err(err) => {
                self.stats.classification_failures += 1;
                error!(
                    alerter = self.classifier.name(),
                    error = %err,
                    routing_key = %delivery.routing_key,
                    redelivered = delivery.redelivered,
                    payload = %String::from_utf8_lossy(&delivery.body),
                    "failed to classify observation"
                );
                None
            }
        };

        self.broker.ack(delivery.delivery_tag).await?;

        if let Some(alerts) = alerts {
            for alert in alerts {
                self.enqueue(alert);
            }
        }

        match self.flush().await {
            Err(PipelineError::DeliveryFailed(err)) => {
                warn!(
                    error = %err,
                    pending = self.queue.len(),
                    "alert was not delivered, will retry on the next observation"
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Places an alert on the publish queue.
    pub fn enqueue(&mut self, alert: Alert) {
        let entry = QueuedAlert::new(
            self.config.alert_exchange.clone(),
            self.classifier.output_routing_key(),
            alert,
        );
        self.stats.alerts_enqueued += 1;
        if let Some(evicted) = self.queue.push(entry) {
            self.stats.alerts_evicted += 1;
            warn!(
                alert = %evicted.alert.alert_code(),
                origin_id = evicted.alert.origin_id(),
                "publish queue full, dropped oldest alert"
            );
        }
    }

    /// Publishes queued alerts oldest first.
    ///
    /// An entry leaves the queue only once the broker confirmed it. Stops at
    /// the first unconfirmed publish with `PipelineError::DeliveryFailed`.
    pub async fn flush(&mut self) -> Result<(), PipelineError> {
        while let Some(entry) = self.queue.front() {
            let message = match entry.to_message() {
                Ok(message) => message,
                Err(err) => {
                    self.queue.pop_front();
                    return Err(err.into());
                }
            };

            match self.broker.publish(&message).await {
                Ok(()) => {
                    self.queue.pop_front();
                    self.stats.alerts_published += 1;
                    debug!(
                        exchange = %message.exchange,
                        routing_key = %message.routing_key,
                        "published alert"
                    );
                }
                Err(err) if err.is_delivery_failure() => {
                    self.stats.delivery_failures += 1;
                    return Err(PipelineError::DeliveryFailed(err));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Runs until `cancel` fires or the input queue is closed, then
    /// terminates.
    ///
    /// Channel errors restart the receive loop. Connection errors and
    /// anything unexpected are returned without terminating, leaving the
    /// pending alerts in place for another call to `run`.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        self.initialize().await?;
        let input_queue = self.classifier.input_queue();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(alerter = self.classifier.name(), "termination requested");
                    break;
                }
                next = self.broker.next_delivery(&input_queue) => next,
            };

            let result = match next {
                Ok(Some(delivery)) => self.handle_delivery(delivery).await,
                Ok(None) => {
                    info!(queue = %input_queue, "input queue closed");
                    break;
                }
                Err(err) => Err(err.into()),
            };

            match result {
                Ok(()) => {}
                Err(err) if err.is_channel_error() => {
                    warn!(error = %err, "channel error, restarting receive loop");
                }
                Err(err) => {
                    error!(error = %err, "pipeline stopped");
                    return Err(err);
                }
            }
        }

        if !self.queue.is_empty() {
            if let Err(err) = self.flush().await {
                warn!(
                    error = %err,
                    dropped = self.queue.len(),
                    "could not flush pending alerts before termination"
                );
            }
        }
        self.terminate().await
    }

    /// Deletes the input queue and disconnects.
    ///
    /// Channel errors are retried and connection errors reconnect first,
    /// both without bound. Not being connected or any other error ends the
    /// attempt.
    pub async fn terminate(&mut self) -> Result<(), PipelineError> {
        let input_queue = self.classifier.input_queue();
        let mut reconnect = false;

        loop {
            if reconnect {
                match self.broker.connect().await {
                    Ok(()) => reconnect = false,
                    Err(err) if err.is_connection_error() => {
                        warn!(error = %err, "reconnect failed, retrying");
                        tokio::time::sleep(self.config.retry_interval).await;
                        continue;
                    }
                    Err(err) => {
                        error!(error = %err, "could not reconnect to delete input queue");
                        break;
                    }
                }
            }

            match self.broker.queue_delete(&input_queue, false, false).await {
                Ok(()) => {
                    info!(queue = %input_queue, "deleted input queue");
                    break;
                }
                Err(err) if err.is_channel_error() => {
                    warn!(queue = %input_queue, error = %err, "failed to delete input queue, retrying");
                }
                Err(err) if err.is_connection_error() => {
                    warn!(queue = %input_queue, error = %err, "connection lost while deleting input queue");
                    reconnect = true;
                }
                Err(BrokerError::NotConnected) => {
                    warn!(queue = %input_queue, "not connected, input queue left in place");
                    break;
                }
                Err(err) => {
                    error!(queue = %input_queue, error = %err, "unexpected error deleting input queue");
                    break;
                }
            }
            tokio::time::sleep(self.config.retry_interval).await;
        }

        self.broker.disconnect().await?;
        info!(alerter = self.classifier.name(), "pipeline terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemAlertsSettings;
    use crate::engine::SystemAlerter;
    use beacon_broker::{FaultPoint, InMemoryBroker, InMemoryClient, OutboundMessage};
    use serde_json::{json, Value};

    const INPUT_QUEUE: &str = "system_alerter_queue_chain_1";
    const ROUTING_KEY: &str = "alerter.system.chain_1";
    const SINK: &str = "alert_sink";

    fn config() -> PipelineConfig {
        PipelineConfig {
            max_queue_size: 10,
            retry_interval: Duration::from_millis(1),
            ..PipelineConfig::default()
        }
    }

    fn pipeline(broker: &InMemoryBroker) -> AlertPipeline<InMemoryClient, SystemAlerter> {
        let alerter = SystemAlerter::from_settings(&SystemAlertsSettings::new("chain_1"))
            .expect("valid settings");
        AlertPipeline::new(broker.client(), alerter, config())
    }

    async fn producer(broker: &InMemoryBroker, with_sink: bool) -> InMemoryClient {
        let mut client = broker.client();
        client.connect().await.expect("connect");
        if with_sink {
            bind_sink(&mut client).await;
        }
        client
    }

    async fn bind_sink(client: &mut InMemoryClient) {
        client
            .queue_declare(SINK, QueueOptions::default())
            .await
            .expect("declare sink");
        client
            .queue_bind(SINK, "alert", "alert_router.#")
            .await
            .expect("bind sink");
    }

    fn invalid_url(message: &str) -> Vec<u8> {
        json!({"error": {
            "code": 5009,
            "message": message,
            "meta_data": {
                "system_name": "validator-1",
                "system_id": "sys_1",
                "system_parent_id": "chain_1",
                "time": 1_000.0
            }
        }})
        .to_string()
        .into_bytes()
    }

    async fn send(client: &mut InMemoryClient, routing_key: &str, body: Vec<u8>) {
        client
            .publish(&OutboundMessage::new("alert", routing_key, body))
            .await
            .expect("publish");
    }

    async fn take(client: &mut InMemoryClient, broker: &InMemoryBroker, queue: &str) -> Delivery {
        assert!(broker.queue_len(queue).unwrap_or(0) > 0, "queue {queue} is empty");
        let delivery = client
            .next_delivery(queue)
            .await
            .expect("receive")
            .expect("delivery");
        client.ack(delivery.delivery_tag).await.expect("ack");
        delivery
    }

    async fn sink_messages(client: &mut InMemoryClient, broker: &InMemoryBroker) -> Vec<String> {
        let mut messages = Vec::new();
        while broker.queue_len(SINK).unwrap_or(0) > 0 {
            let delivery = take(client, broker, SINK).await;
            let value: Value = serde_json::from_slice(&delivery.body).expect("alert json");
            messages.push(value["message"].as_str().unwrap_or_default().to_string());
        }
        messages
    }

    mod config_tests {
        use super::*;

        #[test]
        fn prefetch_is_a_fifth_of_capacity() {
            assert_eq!(PipelineConfig::default().prefetch_count(), 200);
            let small = PipelineConfig {
                max_queue_size: 2,
                ..PipelineConfig::default()
            };
            assert_eq!(small.prefetch_count(), 1);
            let huge = PipelineConfig {
                max_queue_size: usize::MAX,
                ..PipelineConfig::default()
            };
            assert_eq!(huge.prefetch_count(), u16::MAX);
        }

        #[test]
        fn validation() {
            assert!(PipelineConfig::default().validate().is_ok());
            let empty = PipelineConfig {
                alert_exchange: String::new(),
                ..PipelineConfig::default()
            };
            assert!(empty.validate().is_err());
            let zero = PipelineConfig {
                max_queue_size: 0,
                ..PipelineConfig::default()
            };
            assert!(zero.validate().is_err());
        }
    }

    mod delivery_tests {
        use super::*;

        #[tokio::test]
        async fn initialize_declares_topology() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            assert!(broker.exchange_exists("alert"));
            assert!(broker.queue_exists(INPUT_QUEUE));
            assert!(pipeline.broker().is_connected());

            pipeline.initialize().await.expect("initialize is idempotent");
        }

        #[tokio::test]
        async fn classified_alert_is_published() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            let mut producer = producer(&broker, true).await;

            send(&mut producer, ROUTING_KEY, invalid_url("bad url")).await;
            let delivery = pipeline
                .broker
                .next_delivery(INPUT_QUEUE)
                .await
                .expect("receive")
                .expect("delivery");
            pipeline.handle_delivery(delivery).await.expect("handle");

            assert_eq!(broker.unacked_count(), 0);
            assert!(pipeline.pending().is_empty());
            assert_eq!(sink_messages(&mut producer, &broker).await, vec!["bad url"]);
            let stats = pipeline.stats();
            assert_eq!(stats.received, 1);
            assert_eq!(stats.alerts_published, 1);
        }

        #[tokio::test]
        async fn malformed_redelivery_never_enqueues() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            let mut producer = producer(&broker, true).await;

            for _ in 0..5 {
                send(&mut producer, ROUTING_KEY, b"{\"garbage\": true}".to_vec()).await;
                let mut delivery = pipeline
                    .broker
                    .next_delivery(INPUT_QUEUE)
                    .await
                    .expect("receive")
                    .expect("delivery");
                delivery.redelivered = true;
                pipeline.handle_delivery(delivery).await.expect("handle");
            }

            assert_eq!(broker.unacked_count(), 0);
            assert!(pipeline.pending().is_empty());
            assert_eq!(pipeline.stats().classification_failures, 5);
            assert_eq!(pipeline.stats().alerts_enqueued, 0);
            assert_eq!(broker.queue_len(SINK), Some(0));
        }

        #[tokio::test]
        async fn foreign_routing_key_is_acked_and_dropped() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            let mut producer = producer(&broker, true).await;
            producer
                .queue_bind(INPUT_QUEUE, "alert", "alerter.system.*")
                .await
                .expect("wide binding");

            send(&mut producer, "alerter.system.chain_2", invalid_url("not mine")).await;
            let delivery = pipeline
                .broker
                .next_delivery(INPUT_QUEUE)
                .await
                .expect("receive")
                .expect("delivery");
            pipeline.handle_delivery(delivery).await.expect("handle");

            assert_eq!(broker.unacked_count(), 0);
            assert_eq!(pipeline.stats().classification_failures, 1);
            assert!(pipeline.pending().is_empty());
            assert_eq!(broker.queue_len(SINK), Some(0));
        }

        #[tokio::test]
        async fn unconfirmed_alerts_stay_queued_in_order() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            let mut producer = producer(&broker, false).await;

            for message in ["first", "second"] {
                send(&mut producer, ROUTING_KEY, invalid_url(message)).await;
                let delivery = pipeline
                    .broker
                    .next_delivery(INPUT_QUEUE)
                    .await
                    .expect("receive")
                    .expect("delivery");
                pipeline.handle_delivery(delivery).await.expect("delivery failure is swallowed");
            }
            assert_eq!(pipeline.pending().len(), 2);
            assert_eq!(pipeline.stats().delivery_failures, 2);

            bind_sink(&mut producer).await;
            send(&mut producer, ROUTING_KEY, invalid_url("third")).await;
            let delivery = pipeline
                .broker
                .next_delivery(INPUT_QUEUE)
                .await
                .expect("receive")
                .expect("delivery");
            pipeline.handle_delivery(delivery).await.expect("handle");

            assert!(pipeline.pending().is_empty());
            assert_eq!(
                sink_messages(&mut producer, &broker).await,
                vec!["first", "second", "third"]
            );
        }

        #[tokio::test]
        async fn publish_channel_error_is_returned_and_alert_kept() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            let mut producer = producer(&broker, true).await;

            send(&mut producer, ROUTING_KEY, invalid_url("kept")).await;
            let delivery = pipeline
                .broker
                .next_delivery(INPUT_QUEUE)
                .await
                .expect("receive")
                .expect("delivery");
            broker.fail_next(FaultPoint::Publish, BrokerError::channel("closed"));
            let err = pipeline.handle_delivery(delivery).await.unwrap_err();
            assert!(err.is_channel_error());
            assert_eq!(pipeline.pending().len(), 1);
            assert_eq!(broker.unacked_count(), 0);

            pipeline.flush().await.expect("flush");
            assert_eq!(sink_messages(&mut producer, &broker).await, vec!["kept"]);
        }

        #[tokio::test]
        async fn failed_ack_enqueues_nothing_and_redelivers() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            let mut producer = producer(&broker, true).await;

            send(&mut producer, ROUTING_KEY, invalid_url("once")).await;
            let delivery = pipeline
                .broker
                .next_delivery(INPUT_QUEUE)
                .await
                .expect("receive")
                .expect("delivery");
            assert!(!delivery.redelivered);
            broker.fail_next(FaultPoint::Ack, BrokerError::channel("ack lost"));
            let err = pipeline.handle_delivery(delivery).await.unwrap_err();
            assert!(err.is_channel_error());
            assert!(pipeline.pending().is_empty());
            assert_eq!(pipeline.stats().alerts_enqueued, 0);
            assert_eq!(broker.queue_len(INPUT_QUEUE), Some(1));
            assert_eq!(broker.queue_len(SINK), Some(0));

            let redelivery = pipeline
                .broker
                .next_delivery(INPUT_QUEUE)
                .await
                .expect("receive")
                .expect("delivery");
            assert!(redelivery.redelivered);
            pipeline.handle_delivery(redelivery).await.expect("handle");
            assert_eq!(sink_messages(&mut producer, &broker).await, vec!["once"]);
        }

        #[tokio::test]
        async fn unexpected_publish_error_is_returned_and_alert_kept() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            let mut producer = producer(&broker, true).await;

            send(&mut producer, ROUTING_KEY, invalid_url("held")).await;
            let delivery = pipeline
                .broker
                .next_delivery(INPUT_QUEUE)
                .await
                .expect("receive")
                .expect("delivery");
            broker.fail_next(FaultPoint::Publish, BrokerError::Serialization("boom".into()));
            let err = pipeline.handle_delivery(delivery).await.unwrap_err();
            assert!(matches!(err, PipelineError::Broker(BrokerError::Serialization(_))));
            assert_eq!(pipeline.pending().len(), 1);
            assert_eq!(broker.unacked_count(), 0);
            assert_eq!(broker.queue_len(SINK), Some(0));
        }

        #[tokio::test]
        async fn full_queue_evicts_oldest() {
            let broker = InMemoryBroker::new();
            let alerter = SystemAlerter::from_settings(&SystemAlertsSettings::new("chain_1"))
                .expect("valid settings");
            let mut pipeline = AlertPipeline::new(
                broker.client(),
                alerter,
                PipelineConfig {
                    max_queue_size: 2,
                    ..config()
                },
            );
            pipeline.initialize().await.expect("initialize");
            let mut producer = producer(&broker, false).await;

            for message in ["a", "b", "c"] {
                send(&mut producer, ROUTING_KEY, invalid_url(message)).await;
                let delivery = pipeline
                    .broker
                    .next_delivery(INPUT_QUEUE)
                    .await
                    .expect("receive")
                    .expect("delivery");
                pipeline.handle_delivery(delivery).await.expect("handle");
            }

            let pending: Vec<_> = pipeline.pending().iter().map(|e| e.alert.message()).collect();
            assert_eq!(pending, vec!["b", "c"]);
            assert_eq!(pipeline.stats().alerts_evicted, 1);
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test]
        async fn sealed_queue_drains_and_terminates() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            let mut producer = producer(&broker, true).await;
            for message in ["one", "two"] {
                send(&mut producer, ROUTING_KEY, invalid_url(message)).await;
            }
            broker.seal_queue(INPUT_QUEUE);

            pipeline.run(CancellationToken::new()).await.expect("run");

            assert!(!broker.queue_exists(INPUT_QUEUE));
            assert!(!pipeline.broker().is_connected());
            assert_eq!(sink_messages(&mut producer, &broker).await, vec!["one", "two"]);
        }

        #[tokio::test]
        async fn cancellation_terminates() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();

            let (result, ()) = tokio::join!(pipeline.run(cancel), async {
                tokio::task::yield_now().await;
                trigger.cancel();
            });

            result.expect("run");
            assert!(!broker.queue_exists(INPUT_QUEUE));
            assert!(!pipeline.broker().is_connected());
        }

        #[tokio::test]
        async fn receive_channel_error_restarts_loop() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            let mut producer = producer(&broker, true).await;
            send(&mut producer, ROUTING_KEY, invalid_url("after restart")).await;
            broker.seal_queue(INPUT_QUEUE);
            broker.fail_next(FaultPoint::Receive, BrokerError::channel("reset"));

            pipeline.run(CancellationToken::new()).await.expect("run");
            assert_eq!(
                sink_messages(&mut producer, &broker).await,
                vec!["after restart"]
            );
        }

        #[tokio::test]
        async fn connection_error_is_returned_and_run_resumes() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            let mut producer = producer(&broker, true).await;
            send(&mut producer, ROUTING_KEY, invalid_url("survives")).await;
            broker.fail_next(FaultPoint::Receive, BrokerError::connection("gone"));

            let err = pipeline.run(CancellationToken::new()).await.unwrap_err();
            assert!(err.is_connection_error());
            assert!(broker.queue_exists(INPUT_QUEUE));
            assert_eq!(broker.queue_len(INPUT_QUEUE), Some(1));

            broker.seal_queue(INPUT_QUEUE);
            pipeline.run(CancellationToken::new()).await.expect("second run");
            assert_eq!(sink_messages(&mut producer, &broker).await, vec!["survives"]);
        }
    }

    mod terminate_tests {
        use super::*;

        #[tokio::test]
        async fn retries_channel_errors() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            broker.fail_next(FaultPoint::QueueDelete, BrokerError::channel("busy"));
            broker.fail_next(FaultPoint::QueueDelete, BrokerError::channel("busy"));

            pipeline.terminate().await.expect("terminate");
            assert!(!broker.queue_exists(INPUT_QUEUE));
            assert!(!pipeline.broker().is_connected());
        }

        #[tokio::test]
        async fn reconnects_after_connection_error() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            broker.fail_next(FaultPoint::QueueDelete, BrokerError::connection("gone"));
            broker.fail_next(FaultPoint::Connect, BrokerError::connection("refused"));

            pipeline.terminate().await.expect("terminate");
            assert!(!broker.queue_exists(INPUT_QUEUE));
        }

        #[tokio::test]
        async fn gives_up_when_never_connected() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            let mut setup = producer(&broker, false).await;
            setup
                .queue_declare(INPUT_QUEUE, QueueOptions::default())
                .await
                .expect("declare");

            pipeline.terminate().await.expect("terminate");
            assert!(broker.queue_exists(INPUT_QUEUE));
        }

        #[tokio::test]
        async fn gives_up_on_unexpected_error() {
            let broker = InMemoryBroker::new();
            let mut pipeline = pipeline(&broker);
            pipeline.initialize().await.expect("initialize");
            broker.fail_next(
                FaultPoint::QueueDelete,
                BrokerError::Serialization("bad frame".to_string()),
            );

            pipeline.terminate().await.expect("terminate");
            assert!(broker.queue_exists(INPUT_QUEUE));
            assert!(!pipeline.broker().is_connected());
        }
    }
}
