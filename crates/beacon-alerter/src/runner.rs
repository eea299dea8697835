//! Standalone runner.
//!
//! Runs one alerter against an in-process broker. Observations are read as
//! newline separated byte lines and published the way a monitor would
//! publish them. Every
//! alert the pipeline publishes is written out as one JSON line. End of
//! input seals the alerter's input queue, so the pipeline drains what is
//! left and terminates.

use std::time::Duration;

use beacon_alerts::{
    AlertPipeline, CancellationToken, GithubAlerter, ObservationClassifier, PipelineError,
    PipelineStats, SystemAlerter,
};
use beacon_broker::{Broker, ExchangeKind, InMemoryBroker, OutboundMessage, QueueOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::config::{AlerterConfig, AlerterSettings, PipelineSettings};
use crate::error::RunError;

/// Queue the runner collects published alerts from.
pub const OUTPUT_QUEUE: &str = "beacon_alerter_output";

/// What a standalone run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Observation lines published to the broker.
    pub observations: u64,
    /// Alerts written to the output.
    pub alerts: u64,
    /// Pipeline counters at the end of the run.
    pub pipeline: PipelineStats,
}

/// Runs an alerter against an [`InMemoryBroker`].
#[derive(Debug, Clone)]
pub struct Standalone {
    broker: InMemoryBroker,
    settings: PipelineSettings,
}

impl Standalone {
    /// Creates a runner with a fresh broker.
    #[must_use]
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            broker: InMemoryBroker::new(),
            settings,
        }
    }

    /// The broker the runner publishes to.
    #[must_use]
    pub const fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Runs the configured alerter.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are invalid or the run fails.
    pub async fn run_config<R, W>(
        &self,
        alerter: &AlerterSettings,
        input: R,
        output: W,
        cancel: CancellationToken,
    ) -> Result<RunSummary, RunError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match alerter {
            AlerterSettings::System(settings) => {
                let classifier = SystemAlerter::from_settings(settings)?;
                self.run(classifier, input, output, cancel).await
            }
            AlerterSettings::Github(settings) => {
                let classifier = GithubAlerter::new(settings.clone());
                self.run(classifier, input, output, cancel).await
            }
        }
    }

    /// Feeds `input` to `classifier` and writes its alerts to `output`.
    ///
    /// Returns once the input is exhausted and the pipeline has terminated,
    /// or once `cancel` fires and the pipeline has terminated.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable error of the feeder, the pipeline or
    /// the output writer.
    pub async fn run<C, R, W>(
        &self,
        classifier: C,
        input: R,
        output: W,
        cancel: CancellationToken,
    ) -> Result<RunSummary, RunError>
    where
        C: ObservationClassifier,
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let pipeline_config = self.settings.pipeline_config();
        let input_queue = classifier.input_queue();
        let input_routing_key = classifier.input_routing_key();
        let output_routing_key = classifier.output_routing_key().to_string();

        let mut feeder = self.broker.client();
        feeder.connect().await?;
        feeder
            .exchange_declare(&pipeline_config.observation_exchange, ExchangeKind::Topic, true)
            .await?;
        feeder
            .queue_declare(&input_queue, QueueOptions::default())
            .await?;
        feeder
            .queue_bind(&input_queue, &pipeline_config.observation_exchange, &input_routing_key)
            .await?;

        let mut sink = self.broker.client();
        sink.connect().await?;
        sink.exchange_declare(&pipeline_config.alert_exchange, ExchangeKind::Topic, true)
            .await?;
        sink.queue_declare(
            OUTPUT_QUEUE,
            QueueOptions {
                durable: false,
                exclusive: true,
                auto_delete: true,
            },
        )
        .await?;
        sink.queue_bind(OUTPUT_QUEUE, &pipeline_config.alert_exchange, &output_routing_key)
            .await?;

        info!(
            alerter = classifier.name(),
            queue = %input_queue,
            routing_key = %input_routing_key,
            "starting standalone alerter"
        );

        let shutdown = cancel.child_token();
        let mut pipeline = AlertPipeline::new(self.broker.client(), classifier, pipeline_config.clone());
        let reconnect_delay = self.settings.reconnect_delay();

        let feed = async {
            let result = feed_observations(
                &mut feeder,
                input,
                &pipeline_config.observation_exchange,
                &input_routing_key,
                &shutdown,
            )
            .await;
            match &result {
                Ok(_) => {
                    if !self.broker.seal_queue(&input_queue) {
                        debug!(queue = %input_queue, "input queue already deleted");
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to feed observations");
                    shutdown.cancel();
                }
            }
            if let Err(err) = feeder.disconnect().await {
                warn!(error = %err, "failed to disconnect feeder");
            }
            result
        };

        let process = async {
            let result = run_with_reconnect(&mut pipeline, shutdown.clone(), reconnect_delay).await;
            shutdown.cancel();
            self.broker.seal_queue(OUTPUT_QUEUE);
            result
        };

        let collect = async {
            let result = write_alerts(&mut sink, output).await;
            if let Err(err) = &result {
                error!(error = %err, "failed to write alerts");
                shutdown.cancel();
            }
            result
        };

        let (fed, processed, written) = tokio::join!(feed, process, collect);
        if let Err(err) = sink.disconnect().await {
            warn!(error = %err, "failed to disconnect alert sink");
        }

        processed?;
        let alerts = written?;
        let observations = fed?;

        let summary = RunSummary {
            observations,
            alerts,
            pipeline: pipeline.stats(),
        };
        info!(
            observations = summary.observations,
            alerts = summary.alerts,
            failures = summary.pipeline.classification_failures,
            "standalone alerter finished"
        );
        Ok(summary)
    }
}

/// Runs `pipeline` until it finishes, reconnecting after connection errors.
///
/// The same pipeline is resumed so alerts waiting in its publish queue are
/// kept. Any other error is returned.
///
/// # Errors
///
/// Returns the first error that is not a connection error, or a connection
/// error that occurs after `cancel` fired.
pub async fn run_with_reconnect<B, C>(
    pipeline: &mut AlertPipeline<B, C>,
    cancel: CancellationToken,
    reconnect_delay: Duration,
) -> Result<(), PipelineError>
where
    B: Broker,
    C: ObservationClassifier,
{
    loop {
        match pipeline.run(cancel.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_connection_error() && !cancel.is_cancelled() => {
                error!(error = %err, pending = pipeline.pending().len(), "lost connection to broker");
                info!(delay_secs = reconnect_delay.as_secs(), "reconnecting");
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(reconnect_delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

async fn feed_observations<B, R>(
    broker: &mut B,
    mut input: R,
    exchange: &str,
    routing_key: &str,
    cancel: &CancellationToken,
) -> Result<u64, RunError>
where
    B: Broker,
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut published = 0;

    loop {
        line.clear();
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(published, "stopped reading observations");
                return Ok(published);
            }
            read = input.read_until(b'\n', &mut line) => read?,
        };
        if read == 0 {
            info!(published, "end of observations");
            return Ok(published);
        }

        // Bodies go out as read; the pipeline rejects what it cannot decode.
        let body = line.trim_ascii();
        if body.is_empty() {
            continue;
        }
        let message = OutboundMessage::new(exchange, routing_key, body.to_vec());
        broker.publish(&message).await?;
        published += 1;
    }
}

async fn write_alerts<B, W>(broker: &mut B, mut output: W) -> Result<u64, RunError>
where
    B: Broker,
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(delivery) = broker.next_delivery(OUTPUT_QUEUE).await? {
        output.write_all(&delivery.body).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
        broker.ack(delivery.delivery_tag).await?;
        written += 1;
    }
    Ok(written)
}

/// Runs the alerter described by `config`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the run fails.
pub async fn run<R, W>(
    config: &AlerterConfig,
    input: R,
    output: W,
    cancel: CancellationToken,
) -> Result<RunSummary, RunError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    config.validate()?;
    Standalone::new(config.pipeline.clone())
        .run_config(&config.alerter, input, output, cancel)
        .await
}
