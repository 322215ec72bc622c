//! Background broker jobs of the order service.

use std::sync::Arc;

use domain::events::PAYMENT_STATUS_PATTERN;
use messaging::{ConsumerConfig, EventConsumer, RpcServer, Supervisor, Transport};
use saga::{CreateOrderRpcHandler, OrderCoordinator, PAYMENT_STATUS_QUEUE, PaymentStatusHandler};

use crate::config::Config;

/// Starts the `create_order` RPC server and the payment-status consumer
/// under `supervisor`. Both restart with backoff when they fail.
pub fn spawn_jobs<T: Transport>(
    supervisor: &mut Supervisor,
    transport: Arc<T>,
    coordinator: Arc<OrderCoordinator>,
    config: &Config,
) {
    let server = RpcServer::new(transport.clone());
    let handler = Arc::new(CreateOrderRpcHandler::new(coordinator.clone()));
    let endpoint = config.endpoints.create_order.clone();
    supervisor.spawn(format!("rpc:{endpoint}"), move || {
        let server = server.clone();
        let handler = handler.clone();
        let endpoint = endpoint.clone();
        async move { server.serve(&endpoint, handler.as_ref()).await }
    });

    let consumer = EventConsumer::new(transport);
    let handler = Arc::new(PaymentStatusHandler::new(coordinator));
    let consumer_config = ConsumerConfig::new(
        config.broker.exchange.clone(),
        PAYMENT_STATUS_QUEUE,
        PAYMENT_STATUS_PATTERN,
    );
    supervisor.spawn(format!("consumer:{PAYMENT_STATUS_QUEUE}"), move || {
        let consumer = consumer.clone();
        let handler = handler.clone();
        let consumer_config = consumer_config.clone();
        async move { consumer.consume(&consumer_config, handler.as_ref()).await }
    });
}
