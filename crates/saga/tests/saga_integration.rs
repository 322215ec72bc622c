//! End-to-end order choreography over the in-memory broker.
//!
//! The order coordinator, the catalog handlers and a stand-in for the
//! payment service all talk through one `InMemoryBroker`, exactly as the
//! deployed services talk through RabbitMQ.

use std::sync::Arc;
use std::time::Duration;

use catalog::{
    CheckQuantityRpcHandler, InMemoryInventoryStore, InMemoryPriceBook, InventoryService,
    InventoryStore, ORDER_UPDATED_QUEUE, OrderUpdatedHandler, PriceBook, TotalPriceRpcHandler,
    VariantKey,
};
use common::{ColorId, OrderId, OwnerId, PaymentId, ProductId, SizeId};
use domain::contracts::{
    CHECK_PRODUCT_QUANTITY, CREATE_ORDER, CreateOrderItem, CreateOrderRequest, GET_TOTAL_PRICE,
};
use domain::events::{ORDER_UPDATED, PAYMENT_STATUS_PATTERN};
use domain::{Money, OrderStatus, PaymentStatus, PaymentStatusChangedEvent};
use messaging::{
    BrokerEventPublisher, BrokerRpcClient, ConsumerConfig, DEFAULT_EXCHANGE, EventConsumer,
    EventHandler, EventPublisherExt, InMemoryBroker, QueueOptions, RpcClient, RpcHandler,
    RpcServer, Transport,
};
use saga::{
    CoordinatorConfig, CreateOrderRpcHandler, InMemoryOrderRepository, OrderCoordinator,
    OrderError, PAYMENT_STATUS_QUEUE, PaymentStatusHandler,
};

/// Queue that records every `order.updated` the test publishes.
const PROBE_QUEUE: &str = "test_order_updated_probe";

struct TestHarness {
    broker: Arc<InMemoryBroker>,
    coordinator: Arc<OrderCoordinator>,
    repository: InMemoryOrderRepository,
    stock: InMemoryInventoryStore,
    prices: InMemoryPriceBook,
    inventory: Arc<InventoryService>,
}

impl TestHarness {
    async fn new() -> Self {
        let broker = Arc::new(InMemoryBroker::new());
        let publisher = Arc::new(BrokerEventPublisher::new(broker.clone()));
        let repository = InMemoryOrderRepository::new();
        let rpc = Arc::new(
            BrokerRpcClient::new(broker.clone()).with_timeout(Duration::from_millis(500)),
        );
        let coordinator = Arc::new(OrderCoordinator::new(
            Arc::new(repository.clone()),
            rpc,
            publisher.clone(),
            CoordinatorConfig::default(),
        ));

        let stock = InMemoryInventoryStore::new();
        let prices = InMemoryPriceBook::new();
        let inventory = Arc::new(InventoryService::new(Arc::new(stock.clone()), publisher));

        let h = Self {
            broker,
            coordinator,
            repository,
            stock,
            prices,
            inventory,
        };
        h.bind(PROBE_QUEUE, ORDER_UPDATED).await;
        h.serve(
            CHECK_PRODUCT_QUANTITY,
            CheckQuantityRpcHandler::new(h.inventory.clone()),
        );
        h.serve(
            GET_TOTAL_PRICE,
            TotalPriceRpcHandler::new(Arc::new(h.prices.clone())),
        );
        h
    }

    async fn bind(&self, queue: &str, pattern: &str) {
        self.broker
            .declare_exchange(DEFAULT_EXCHANGE, false)
            .await
            .unwrap();
        self.broker
            .declare_queue(queue, QueueOptions::transient())
            .await
            .unwrap();
        self.broker
            .bind_queue(queue, DEFAULT_EXCHANGE, pattern)
            .await
            .unwrap();
    }

    async fn consume<H: EventHandler + 'static>(&self, queue: &str, pattern: &str, handler: H) {
        self.bind(queue, pattern).await;
        let consumer = EventConsumer::new(self.broker.clone());
        let config = ConsumerConfig::new(DEFAULT_EXCHANGE, queue, pattern);
        tokio::spawn(async move { consumer.consume(&config, &handler).await });
    }

    fn serve<H: RpcHandler + 'static>(&self, endpoint: &str, handler: H) {
        let server = RpcServer::new(self.broker.clone());
        let endpoint = endpoint.to_string();
        tokio::spawn(async move { server.serve(&endpoint, &handler).await });
    }

    /// Stocks and prices a new variant.
    async fn variant(&self, quantity: i64, price: Option<Money>) -> VariantKey {
        let key = VariantKey::new(ProductId::new(), ColorId::new(), SizeId::new());
        self.stock.add(key, quantity).await.unwrap();
        if let Some(price) = price {
            self.prices.set_price(key, price).await.unwrap();
        }
        key
    }

    fn published_updates(&self) -> usize {
        self.broker.message_count(PROBE_QUEUE)
    }
}

fn line(key: VariantKey, quantity: i32) -> CreateOrderItem {
    CreateOrderItem {
        product_id: key.product_id,
        color_id: key.color_id,
        size_id: key.size_id,
        quantity,
    }
}

fn order_request(items: Vec<CreateOrderItem>) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id: None,
        description: "birthday".into(),
        items,
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn test_paid_two_item_order_is_confirmed_and_destocked() {
    let h = TestHarness::new().await;
    let shirt = h.variant(5, Some(Money::from_units(10))).await;
    let hat = h.variant(3, Some(Money::from_units(5))).await;
    h.consume(
        PAYMENT_STATUS_QUEUE,
        PAYMENT_STATUS_PATTERN,
        PaymentStatusHandler::new(h.coordinator.clone()),
    )
    .await;
    h.consume(
        ORDER_UPDATED_QUEUE,
        ORDER_UPDATED,
        OrderUpdatedHandler::new(h.inventory.clone()),
    )
    .await;

    let owner = OwnerId::new();
    let order = h
        .coordinator
        .create_order(owner, order_request(vec![line(shirt, 2), line(hat, 1)]))
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_price, Money::from_units(25));
    assert_eq!(order.items.len(), 2);
    assert!(order.order_code.starts_with("ORDER-"));

    let payment = PaymentStatusChangedEvent {
        payment_id: PaymentId::new(),
        order_id: order.id,
        status: PaymentStatus::Success,
    };
    BrokerEventPublisher::new(h.broker.clone())
        .publish(DEFAULT_EXCHANGE, payment.status.routing_key(), &payment)
        .await
        .unwrap();

    let (h, id) = (&h, order.id);
    eventually("order confirmation", move || async move {
        h.repository.snapshot(id).map(|o| o.status) == Some(OrderStatus::Confirmed)
    })
    .await;
    eventually("stock decrement", move || async move {
        h.stock.quantity(&shirt).await.unwrap() == Some(3)
            && h.stock.quantity(&hat).await.unwrap() == Some(2)
    })
    .await;
    assert_eq!(h.published_updates(), 1);
}

#[tokio::test]
async fn test_out_of_stock_persists_nothing() {
    let h = TestHarness::new().await;
    let scarce = h.variant(1, Some(Money::from_units(10))).await;

    let err = h
        .coordinator
        .create_order(OwnerId::new(), order_request(vec![line(scarce, 2)]))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::OutOfStock { product_id } if product_id == scarce.product_id));
    assert_eq!(h.repository.order_count(), 0);
}

#[tokio::test]
async fn test_zero_price_persists_nothing() {
    let h = TestHarness::new().await;
    let unpriced = h.variant(10, None).await;

    let err = h
        .coordinator
        .create_order(OwnerId::new(), order_request(vec![line(unpriced, 1)]))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::Pricing(_)));
    assert_eq!(h.repository.order_count(), 0);
}

#[tokio::test]
async fn test_same_status_twice_publishes_once() {
    let h = TestHarness::new().await;
    let key = h.variant(5, Some(Money::from_units(3))).await;
    let order = h
        .coordinator
        .create_order(OwnerId::new(), order_request(vec![line(key, 1)]))
        .await
        .unwrap();

    for _ in 0..2 {
        let updated = h
            .coordinator
            .update_order_status(order.id, OrderStatus::Confirmed, false)
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Confirmed);
    }
    assert_eq!(h.published_updates(), 1);
}

#[tokio::test]
async fn test_courier_transitions_need_privilege() {
    let h = TestHarness::new().await;
    let key = h.variant(5, Some(Money::from_units(3))).await;
    let order = h
        .coordinator
        .create_order(OwnerId::new(), order_request(vec![line(key, 1)]))
        .await
        .unwrap();
    for status in [
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
    ] {
        h.coordinator
            .update_order_status(order.id, status, false)
            .await
            .unwrap();
    }

    let err = h
        .coordinator
        .update_order_status(order.id, OrderStatus::OutForDelivery, false)
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::TransitionRejected { .. }));
    assert_eq!(h.published_updates(), 3);

    h.coordinator
        .update_order_status(order.id, OrderStatus::OutForDelivery, true)
        .await
        .unwrap();
    assert_eq!(h.published_updates(), 4);
}

#[tokio::test]
async fn test_unknown_order_keeps_payment_event_unacked() {
    let h = TestHarness::new().await;
    h.consume(
        PAYMENT_STATUS_QUEUE,
        PAYMENT_STATUS_PATTERN,
        PaymentStatusHandler::new(h.coordinator.clone()),
    )
    .await;

    let payment = PaymentStatusChangedEvent {
        payment_id: PaymentId::new(),
        order_id: OrderId::new(),
        status: PaymentStatus::Success,
    };
    BrokerEventPublisher::new(h.broker.clone())
        .publish(DEFAULT_EXCHANGE, "payment.status.success", &payment)
        .await
        .unwrap();

    let h = &h;
    eventually("unacked payment event", move || async move {
        h.broker.unacked_count(PAYMENT_STATUS_QUEUE) == 1
    })
    .await;
    assert_eq!(h.published_updates(), 0);
}

#[tokio::test]
async fn test_create_order_over_rpc() {
    let h = TestHarness::new().await;
    h.serve(
        CREATE_ORDER,
        CreateOrderRpcHandler::new(h.coordinator.clone()),
    );
    let key = h.variant(5, Some(Money::from_units(7))).await;
    let payment_side = BrokerRpcClient::new(h.broker.clone());

    let mut request = order_request(vec![line(key, 2)]);
    request.user_id = Some(OwnerId::new());
    let reply = payment_side
        .call(CREATE_ORDER, &serde_json::to_string(&request).unwrap())
        .await
        .unwrap();
    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["totalPrice"], 14.0);
    let id = OrderId::parse(reply["id"].as_str().unwrap()).unwrap();
    assert!(h.repository.snapshot(id).is_some());

    request.items = vec![line(key, 50)];
    let reply = payment_side
        .call(CREATE_ORDER, &serde_json::to_string(&request).unwrap())
        .await
        .unwrap();
    assert_eq!(reply, "{}");
    assert_eq!(h.repository.order_count(), 1);
}
