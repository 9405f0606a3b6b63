//! RabbitMQ transport.
//!
//! One connection, one channel. The job queue is consumed with a prefetch
//! of one, so a worker holds at most one unacknowledged job; running more
//! worker processes is how throughput scales. Outcomes and dead letters
//! are published to the default exchange with the queue name as routing
//! key.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use slicefarm_pipeline::{CompletionSink, JobHandler, PublishError};
use tokio_util::sync::CancellationToken;

use crate::config::AmqpSettings;

/// Tag identifying this consumer on the broker.
const CONSUMER_TAG: &str = "slicefarm-worker";

/// Messages that may be in flight to this worker without an ack.
const PREFETCH_COUNT: u16 = 1;

/// Errors from the broker connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("consumer stream for {0} ended")]
    ConsumerClosed(String),
}

/// An open broker connection with every queue the worker uses declared.
pub struct AmqpTransport {
    connection: Connection,
    channel: Channel,
}

impl AmqpTransport {
    /// Connect, open a channel in confirm mode, declare the queues, and set
    /// the prefetch.
    pub async fn connect(settings: &AmqpSettings) -> Result<Self, TransportError> {
        let connection = Connection::connect(&settings.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        declare_queue(&channel, &settings.job_queue).await?;
        declare_queue(&channel, &settings.done_queue).await?;
        if let Some(queue) = &settings.dead_letter_queue {
            declare_queue(&channel, queue).await?;
        }

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;

        tracing::info!(
            job_queue = %settings.job_queue,
            done_queue = %settings.done_queue,
            dead_letter_queue = settings.dead_letter_queue.as_deref().unwrap_or("-"),
            "Connected to message broker",
        );

        Ok(Self {
            connection,
            channel,
        })
    }

    /// A sink publishing to `queue` over this transport's channel.
    pub fn sink(&self, queue: &str) -> Arc<dyn CompletionSink> {
        Arc::new(AmqpSink {
            channel: self.channel.clone(),
            queue: queue.to_string(),
        })
    }

    /// Consume `queue` until `cancel` fires or the broker closes the stream.
    ///
    /// Each delivery is handled to completion and then acknowledged,
    /// whatever its outcome. Cancellation is only observed between
    /// deliveries, so a job in progress is finished and acked first.
    pub async fn consume(
        &self,
        queue: &str,
        handler: &JobHandler,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        tracing::info!(queue, "Waiting for jobs");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Consumer shutting down");
                    return Ok(());
                }
                next = consumer.next() => {
                    let delivery = match next {
                        Some(delivery) => delivery?,
                        None => return Err(TransportError::ConsumerClosed(queue.to_string())),
                    };
                    tracing::debug!(delivery_tag = delivery.delivery_tag, "Message received");

                    handler.handle(&delivery.data).await;
                    delivery.ack(BasicAckOptions::default()).await?;
                }
            }
        }
    }

    /// Close the channel and the connection.
    pub async fn close(self) {
        if let Err(e) = self.channel.close(200, "worker shutdown").await {
            tracing::warn!(error = %e, "Failed to close channel cleanly");
        }
        if let Err(e) = self.connection.close(200, "worker shutdown").await {
            tracing::warn!(error = %e, "Failed to close connection cleanly");
        }
    }
}

/// Declare `name` as a non-durable, non-exclusive queue.
async fn declare_queue(channel: &Channel, name: &str) -> Result<(), lapin::Error> {
    channel
        .queue_declare(name, QueueDeclareOptions::default(), FieldTable::default())
        .await?;
    Ok(())
}

/// [`CompletionSink`] publishing JSON bodies to one queue.
struct AmqpSink {
    channel: Channel,
    queue: String,
}

#[async_trait]
impl CompletionSink for AmqpSink {
    async fn send(&self, body: Vec<u8>) -> Result<(), PublishError> {
        let confirm = self
            .channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        let confirmation = confirm
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        check_confirmation(&self.queue, confirmation)
    }
}

/// Only a broker ack counts as delivered.
fn check_confirmation(queue: &str, confirmation: Confirmation) -> Result<(), PublishError> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(PublishError::Transport(format!(
            "broker rejected message for {queue}"
        ))),
        Confirmation::NotRequested => Err(PublishError::Transport(format!(
            "no publisher confirm for {queue}; channel is not in confirm mode"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
