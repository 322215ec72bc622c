//! Topic events: JSON payloads published to a shared topic exchange and
//! consumed from named queues bound with a routing pattern.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::supervisor::panic_message;
use crate::transport::{ConsumeOptions, Delivery, OutboundMessage, QueueOptions, Transport};
use crate::{MessagingError, Result};

/// Error returned by an [`EventHandler`]. The delivery is left unacknowledged.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Publishes encoded events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes a JSON payload to `exchange` under `routing_key`.
    async fn publish_json(&self, exchange: &str, routing_key: &str, payload: Vec<u8>)
    -> Result<()>;
}

/// Typed helpers over [`EventPublisher`].
#[async_trait]
pub trait EventPublisherExt: EventPublisher {
    /// JSON-encodes `event` and publishes it.
    async fn publish<E>(&self, exchange: &str, routing_key: &str, event: &E) -> Result<()>
    where
        E: Serialize + Sync + ?Sized,
    {
        let payload = serde_json::to_vec(event)?;
        self.publish_json(exchange, routing_key, payload).await
    }
}

impl<P: EventPublisher + ?Sized> EventPublisherExt for P {}

/// Event publisher over a [`Transport`].
///
/// The non-durable topic exchange is declared before every publish. There
/// are no publisher confirms and no retries.
pub struct BrokerEventPublisher<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> BrokerEventPublisher<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl<T: Transport> EventPublisher for BrokerEventPublisher<T> {
    #[tracing::instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn publish_json(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<()> {
        crate::rpc::ensure_json(routing_key, &payload)?;
        self.transport.declare_exchange(exchange, false).await?;
        self.transport
            .publish(exchange, routing_key, OutboundMessage::json(payload))
            .await?;

        metrics::counter!("events_published_total", "routing_key" => routing_key.to_string())
            .increment(1);
        debug!("Event published");
        Ok(())
    }
}

/// Handles one event payload.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, payload: &str) -> std::result::Result<(), HandlerError>;
}

/// Where a consumer reads its events from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub exchange: String,
    pub queue: String,
    pub routing_pattern: String,
}

impl ConsumerConfig {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_pattern: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_pattern: routing_pattern.into(),
        }
    }
}

/// Consumes events from a queue bound to a topic exchange.
pub struct EventConsumer<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> Clone for EventConsumer<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
        }
    }
}

impl<T: Transport> EventConsumer<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Declares the exchange and queue, binds them and runs `handler` for
    /// each delivery.
    ///
    /// A delivery is acked only when the handler returns `Ok`. Failed or
    /// panicking handlers leave it unacknowledged for the broker to
    /// redeliver once the channel closes.
    #[tracing::instrument(skip(self, handler), fields(queue = %config.queue))]
    pub async fn consume<H>(&self, config: &ConsumerConfig, handler: &H) -> Result<()>
    where
        H: EventHandler + ?Sized,
    {
        self.transport
            .declare_exchange(&config.exchange, false)
            .await?;
        let mut subscription = self
            .transport
            .subscribe(
                &config.queue,
                QueueOptions::transient(),
                ConsumeOptions::default(),
            )
            .await?;
        self.transport
            .bind_queue(&config.queue, &config.exchange, &config.routing_pattern)
            .await?;
        info!(
            exchange = %config.exchange,
            pattern = %config.routing_pattern,
            "Consuming events"
        );

        while let Some(delivery) = subscription.deliveries.next().await {
            process_delivery(&config.queue, handler, delivery?).await;
        }

        Err(MessagingError::ConsumerClosed {
            queue: subscription.queue,
        })
    }
}

async fn process_delivery<H>(queue: &str, handler: &H, delivery: Delivery)
where
    H: EventHandler + ?Sized,
{
    let payload = delivery.body_text();
    let outcome = AssertUnwindSafe(handler.handle(&payload))
        .catch_unwind()
        .await;

    metrics::counter!("events_consumed_total", "queue" => queue.to_string()).increment(1);
    match outcome {
        Ok(Ok(())) => {
            if let Err(e) = delivery.ack().await {
                warn!(queue, error = %e, "Failed to ack event");
            }
        }
        Ok(Err(e)) => {
            metrics::counter!("event_handler_failures_total", "queue" => queue.to_string())
                .increment(1);
            warn!(
                queue,
                routing_key = %delivery.routing_key,
                error = %e,
                "Event handler failed, leaving delivery unacknowledged"
            );
        }
        Err(panic) => {
            metrics::counter!("event_handler_failures_total", "queue" => queue.to_string())
                .increment(1);
            error!(
                queue,
                routing_key = %delivery.routing_key,
                panic = %panic_message(panic.as_ref()),
                "Event handler panicked, leaving delivery unacknowledged"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::transport::InMemoryBroker;

    #[derive(Default)]
    struct Recorder {
        seen: tokio::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, payload: &str) -> std::result::Result<(), HandlerError> {
            self.seen.lock().await.push(payload.to_string());
            Ok(())
        }
    }

    struct Failing {
        calls: AtomicUsize,
        panic: bool,
    }

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _payload: &str) -> std::result::Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("boom");
            }
            Err("not yet".into())
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn consumer_receives_matching_events_and_acks() {
        let broker = Arc::new(InMemoryBroker::new());
        let consumer = EventConsumer::new(broker.clone());
        let handler = Arc::new(Recorder::default());
        let config = ConsumerConfig::new("you_shop", "payments", "payment.status.*");

        let task_handler = handler.clone();
        let task_config = config.clone();
        tokio::spawn(async move { consumer.consume(&task_config, task_handler.as_ref()).await });
        wait_until(|| broker.consumer_count("payments") == 1).await;

        let publisher = BrokerEventPublisher::new(broker.clone());
        publisher
            .publish("you_shop", "payment.status.success", &serde_json::json!({"status": 2}))
            .await
            .unwrap();
        publisher
            .publish("you_shop", "order.updated", &serde_json::json!({"status": 2}))
            .await
            .unwrap();

        wait_until(|| broker.message_count("payments") == 0).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handler.seen.lock().await.as_slice(), [r#"{"status":2}"#]);
        assert_eq!(broker.unacked_count("payments"), 0);
    }

    #[tokio::test]
    async fn failed_handler_leaves_delivery_unacked() {
        for panic in [false, true] {
            let broker = Arc::new(InMemoryBroker::new());
            let consumer = EventConsumer::new(broker.clone());
            let handler = Arc::new(Failing {
                calls: AtomicUsize::new(0),
                panic,
            });
            let config = ConsumerConfig::new("you_shop", "q", "#");

            let task_handler = handler.clone();
            tokio::spawn(async move { consumer.consume(&config, task_handler.as_ref()).await });
            wait_until(|| broker.consumer_count("q") == 1).await;

            BrokerEventPublisher::new(broker.clone())
                .publish("you_shop", "order.updated", &serde_json::json!({}))
                .await
                .unwrap();
            wait_until(|| handler.calls.load(Ordering::SeqCst) == 1).await;
            wait_until(|| broker.unacked_count("q") == 1).await;
        }
    }

    #[tokio::test]
    async fn publisher_rejects_non_json_payload() {
        let broker = Arc::new(InMemoryBroker::new());
        let publisher = BrokerEventPublisher::new(broker);
        let result = publisher
            .publish_json("you_shop", "order.updated", b"nope".to_vec())
            .await;
        assert!(matches!(result, Err(MessagingError::InvalidPayload { .. })));
    }
}
