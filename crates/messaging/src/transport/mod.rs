//! Broker transport abstraction.
//!
//! The RPC and event patterns only need a handful of AMQP primitives:
//! declare, bind, publish and consume with manual acknowledgement. The
//! [`Transport`] trait captures exactly those so the patterns run unchanged
//! against RabbitMQ and against the in-process broker used in tests.

mod amqp;
mod memory;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::Stream;

use crate::Result;

pub use amqp::AmqpTransport;
pub use memory::InMemoryBroker;

/// Content type stamped on every message.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Queue declaration flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Non-durable, shared queue. Used for RPC and event queues.
    pub fn transient() -> Self {
        Self::default()
    }

    /// Exclusive, auto-deleted queue owned by a single consumer.
    pub fn private() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// Consumer settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumeOptions {
    /// Maximum unacknowledged deliveries in flight; `None` leaves it unbounded.
    pub prefetch: Option<u16>,
}

impl ConsumeOptions {
    pub fn with_prefetch(prefetch: u16) -> Self {
        Self {
            prefetch: Some(prefetch),
        }
    }
}

/// A message about to be published.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    /// Creates a JSON message with no correlation metadata.
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            correlation_id: None,
            reply_to: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A message received from a queue.
///
/// Dropping a delivery without settling it leaves it unacknowledged; the
/// broker hands it out again once the consuming channel closes.
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        routing_key: String,
        body: Vec<u8>,
        correlation_id: Option<String>,
        reply_to: Option<String>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            routing_key,
            body,
            correlation_id,
            reply_to,
            redelivered,
            acker,
        }
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Positively acknowledges the delivery.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    /// Negatively acknowledges the delivery, optionally putting it back on the queue.
    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("correlation_id", &self.correlation_id)
            .field("reply_to", &self.reply_to)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// A stream of deliveries from one consumer.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// An active consumer on a queue.
pub struct Subscription {
    /// Name of the consumed queue. Server-generated when declared with an empty name.
    pub queue: String,
    pub deliveries: DeliveryStream,
}

/// The broker primitives the messaging patterns are built from.
///
/// Implementations must be safe to share between tasks; every operation
/// is independent and may run concurrently with the others.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Declares a topic exchange. Idempotent for matching flags.
    async fn declare_exchange(&self, exchange: &str, durable: bool) -> Result<()>;

    /// Declares a queue and returns its name. An empty name asks the
    /// broker to generate one.
    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> Result<String>;

    /// Binds a queue to an exchange with a routing pattern.
    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> Result<()>;

    /// Publishes a message. The empty exchange routes straight to the queue
    /// named by `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<()>;

    /// Declares `queue` and starts consuming it with manual acknowledgement.
    ///
    /// Declaration and consumption share one channel so exclusive queues
    /// stay usable. The consumer is cancelled when the returned
    /// subscription is dropped.
    async fn subscribe(
        &self,
        queue: &str,
        queue_options: QueueOptions,
        consume_options: ConsumeOptions,
    ) -> Result<Subscription>;
}
