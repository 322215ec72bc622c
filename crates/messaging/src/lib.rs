//! Broker messaging for the you-shop services.
//!
//! Two interaction styles ride on the same broker:
//!
//! - **Request/reply** ([`rpc`]): a caller publishes a JSON request to
//!   `<endpoint>.rpc.request` tagged with a correlation id and waits for the
//!   matching reply; a server consumes the request queue, runs a handler and
//!   publishes the result back.
//! - **Publish/subscribe** ([`events`]): JSON events on a topic exchange,
//!   consumed from named queues bound with a routing pattern.
//!
//! Both are written against the [`Transport`] trait, implemented for RabbitMQ
//! by [`AmqpTransport`] and in process by [`InMemoryBroker`].

pub mod config;
pub mod error;
pub mod events;
pub mod rpc;
pub mod supervisor;
pub mod topic;
pub mod transport;

pub use config::BrokerConfig;
pub use error::{MessagingError, Result};
pub use events::{
    BrokerEventPublisher, ConsumerConfig, EventConsumer, EventHandler, EventPublisher,
    EventPublisherExt, HandlerError,
};
pub use rpc::{
    BrokerRpcClient, ReplyMode, RpcClient, RpcClientExt, RpcHandler, RpcServer, request_queue,
    response_queue,
};
pub use supervisor::{RestartPolicy, Supervisor};
pub use transport::{
    AmqpTransport, ConsumeOptions, Delivery, InMemoryBroker, OutboundMessage, QueueOptions,
    Subscription, Transport,
};

/// Name of the topic exchange shared by every service.
pub const DEFAULT_EXCHANGE: &str = "you_shop";
