//! RabbitMQ transport over a pooled `lapin` connection.

use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use deadpool_lapin::{Manager, Pool, PoolError};
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, ExchangeKind,
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    Acknowledger, ConsumeOptions, Delivery, JSON_CONTENT_TYPE, OutboundMessage, QueueOptions,
    Subscription, Transport,
};
use crate::{BrokerConfig, MessagingError, Result};

const CONNECT_ATTEMPTS: usize = 5;

/// Transport backed by RabbitMQ.
///
/// Connections come from a `deadpool-lapin` pool. Declarations and
/// publishes share one long-lived control channel that is reopened when
/// the broker closes it; every subscription gets a dedicated channel.
pub struct AmqpTransport {
    pool: Pool,
    control: Mutex<Option<Channel>>,
}

impl AmqpTransport {
    /// Builds the connection pool and verifies the broker is reachable.
    ///
    /// The first connection is retried a few times with exponential backoff;
    /// if the broker is still unreachable the error is returned.
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| MessagingError::Connection(format!("Failed to create pool: {e}")))?;

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(CONNECT_ATTEMPTS)
            .with_jitter()
            .build();

        let mut last_error = None;
        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }
            match pool.get().await {
                Ok(_) => {
                    info!(pool_size = config.pool_size, "Connected to AMQP broker");
                    return Ok(Self {
                        pool,
                        control: Mutex::new(None),
                    });
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "AMQP connection attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(MessagingError::Connection(format!(
            "Failed to connect to {}: {}",
            redact(&config.url),
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn open_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            MessagingError::Connection(format!("Failed to get connection from pool: {e}"))
        })?;
        Ok(conn.create_channel().await?)
    }

    /// Returns the control channel, reopening it if the broker closed it.
    async fn control_channel(&self) -> Result<Channel> {
        let mut control = self.control.lock().await;
        if let Some(channel) = control.as_ref()
            && channel.status().connected()
        {
            return Ok(channel.clone());
        }
        debug!("Opening AMQP control channel");
        let channel = self.open_channel().await?;
        *control = Some(channel.clone());
        Ok(channel)
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn declare_exchange(&self, exchange: &str, durable: bool) -> Result<()> {
        let channel = self.control_channel().await?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> Result<String> {
        let channel = self.control_channel().await?;
        let declared = channel
            .queue_declare(queue, declare_options(options), FieldTable::default())
            .await?;
        Ok(declared.name().as_str().to_string())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> Result<()> {
        let channel = self.control_channel().await?;
        channel
            .queue_bind(
                queue,
                exchange,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<()> {
        let mut properties = BasicProperties::default().with_content_type(JSON_CONTENT_TYPE.into());
        if let Some(correlation_id) = message.correlation_id {
            properties = properties.with_correlation_id(correlation_id.into());
        }
        if let Some(reply_to) = message.reply_to {
            properties = properties.with_reply_to(reply_to.into());
        }

        let channel = self.control_channel().await?;
        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        queue_options: QueueOptions,
        consume_options: ConsumeOptions,
    ) -> Result<Subscription> {
        let channel = self.open_channel().await?;
        if let Some(prefetch) = consume_options.prefetch {
            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await?;
        }

        let declared = channel
            .queue_declare(queue, declare_options(queue_options), FieldTable::default())
            .await?;
        let queue = declared.name().as_str().to_string();

        let consumer_tag = format!("{queue}.{}", uuid::Uuid::new_v4().simple());
        let consumer = channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        debug!(queue = %queue, consumer_tag = %consumer_tag, "AMQP consumer started");

        let state = (ConsumerChannel(channel), consumer);
        let deliveries = futures_util::stream::unfold(state, |(channel, mut consumer)| async move {
            let Some(next) = consumer.next().await else {
                return None;
            };
            let item = next.map(into_delivery).map_err(MessagingError::from);
            Some((item, (channel, consumer)))
        });

        Ok(Subscription {
            queue,
            deliveries: Box::pin(deliveries),
        })
    }
}

fn declare_options(options: QueueOptions) -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: options.durable,
        exclusive: options.exclusive,
        auto_delete: options.auto_delete,
        ..Default::default()
    }
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let correlation_id = delivery
        .properties
        .correlation_id()
        .as_ref()
        .map(|id| id.as_str().to_string());
    let reply_to = delivery
        .properties
        .reply_to()
        .as_ref()
        .map(|queue| queue.as_str().to_string());

    Delivery::new(
        delivery.routing_key.as_str().to_string(),
        delivery.data,
        correlation_id,
        reply_to,
        delivery.redelivered,
        Box::new(AmqpAcker(delivery.acker)),
    )
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(MessagingError::from)
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                multiple: false,
            })
            .await
            .map_err(MessagingError::from)
    }
}

/// Consumer channel closed when its subscription is dropped, which cancels
/// the consumer and releases exclusive queues.
struct ConsumerChannel(Channel);

impl Drop for ConsumerChannel {
    fn drop(&mut self) {
        if !self.0.status().connected() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let channel = self.0.clone();
            handle.spawn(async move {
                if let Err(e) = channel.close(200, "consumer dropped").await {
                    debug!(error = %e, "Failed to close consumer channel");
                }
            });
        }
    }
}

/// Strips credentials from a connection URL before it is logged.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
