//! Inventory and price flows over the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use catalog::{
    CheckQuantityRpcHandler, INVENTORY_CREATED_QUEUE, InMemoryInventoryStore, InMemoryPriceBook,
    InventoriesCreatedHandler, InventoryService, ORDER_UPDATED_QUEUE, OrderUpdatedHandler,
    TotalPriceRpcHandler, VariantKey,
};
use common::{ColorId, OrderId, OwnerId, ProductId, SizeId};
use domain::contracts::{
    CHECK_PRODUCT_QUANTITY, CheckProductQuantityRequest, CheckProductQuantityResponse,
    GET_TOTAL_PRICE, TotalPriceItem, TotalPriceRequest, TotalPriceResponse,
};
use domain::events::{INVENTORY_CREATED, ORDER_UPDATED};
use domain::{CreatedInventory, Money, OrderStatus, UpdatedOrderEvent, UpdatedOrderItem};
use messaging::{
    BrokerEventPublisher, BrokerRpcClient, ConsumerConfig, DEFAULT_EXCHANGE, EventConsumer,
    EventHandler, EventPublisherExt, InMemoryBroker, QueueOptions, RpcClientExt, RpcHandler,
    RpcServer, Transport,
};

struct Harness {
    broker: Arc<InMemoryBroker>,
    store: InMemoryInventoryStore,
    prices: InMemoryPriceBook,
    inventory: Arc<InventoryService>,
}

impl Harness {
    fn new() -> Self {
        let broker = Arc::new(InMemoryBroker::new());
        let store = InMemoryInventoryStore::new();
        let publisher = Arc::new(BrokerEventPublisher::new(broker.clone()));
        let inventory = Arc::new(InventoryService::new(Arc::new(store.clone()), publisher));
        Self {
            broker,
            store,
            prices: InMemoryPriceBook::new(),
            inventory,
        }
    }

    /// Binds the queue up front so nothing published before the consumer
    /// task starts is lost.
    async fn consume<H: EventHandler + 'static>(&self, queue: &str, pattern: &str, handler: H) {
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

        let consumer = EventConsumer::new(self.broker.clone());
        let config = ConsumerConfig::new(DEFAULT_EXCHANGE, queue, pattern);
        tokio::spawn(async move { consumer.consume(&config, &handler).await });
    }

    fn serve<H: RpcHandler + 'static>(&self, endpoint: &str, handler: H) {
        let server = RpcServer::new(self.broker.clone());
        let endpoint = endpoint.to_string();
        tokio::spawn(async move { server.serve(&endpoint, &handler).await });
    }
}

fn variant() -> VariantKey {
    VariantKey::new(ProductId::new(), ColorId::new(), SizeId::new())
}

fn created(key: VariantKey, price: Money, quantity: i64) -> CreatedInventory {
    CreatedInventory {
        product_id: key.product_id,
        color_id: key.color_id,
        size_id: key.size_id,
        price,
        quantity,
    }
}

fn order_event(key: VariantKey, quantity: u32, status: OrderStatus) -> UpdatedOrderEvent {
    let order_id = OrderId::new();
    UpdatedOrderEvent {
        id: order_id,
        description: String::new(),
        order_code: "ORDER-TESTTESTTE1".into(),
        total_price: Money::from_units(30),
        status,
        owner_id: OwnerId::new(),
        items: vec![UpdatedOrderItem {
            quantity,
            product_id: key.product_id,
            color_id: key.color_id,
            size_id: key.size_id,
            order_id: Some(order_id),
            price: Money::from_units(10),
        }],
    }
}

async fn wait_for_quantity(inventory: &InventoryService, key: &VariantKey, expected: i64) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if inventory.quantity(key).await.unwrap() == Some(expected) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("stock never reached {expected}"));
}

#[tokio::test]
async fn confirmed_then_returned_order_restores_stock() {
    let h = Harness::new();
    let key = variant();
    h.inventory
        .add_inventories(vec![created(key, Money::from_units(10), 10)])
        .await
        .unwrap();
    h.consume(
        ORDER_UPDATED_QUEUE,
        ORDER_UPDATED,
        OrderUpdatedHandler::new(h.inventory.clone()),
    )
    .await;

    let publisher = BrokerEventPublisher::new(h.broker.clone());
    publisher
        .publish(
            DEFAULT_EXCHANGE,
            ORDER_UPDATED,
            &order_event(key, 3, OrderStatus::Confirmed),
        )
        .await
        .unwrap();
    wait_for_quantity(&h.inventory, &key, 7).await;

    publisher
        .publish(
            DEFAULT_EXCHANGE,
            ORDER_UPDATED,
            &order_event(key, 3, OrderStatus::Shipped),
        )
        .await
        .unwrap();
    publisher
        .publish(
            DEFAULT_EXCHANGE,
            ORDER_UPDATED,
            &order_event(key, 3, OrderStatus::Returned),
        )
        .await
        .unwrap();
    wait_for_quantity(&h.inventory, &key, 10).await;
}

#[tokio::test]
async fn failed_stock_update_leaves_event_unacked() {
    let h = Harness::new();
    let key = variant();
    h.inventory
        .add_inventories(vec![created(key, Money::from_units(1), 5)])
        .await
        .unwrap();
    h.consume(
        ORDER_UPDATED_QUEUE,
        ORDER_UPDATED,
        OrderUpdatedHandler::new(h.inventory.clone()),
    )
    .await;
    h.store.set_fail(true);

    BrokerEventPublisher::new(h.broker.clone())
        .publish(
            DEFAULT_EXCHANGE,
            ORDER_UPDATED,
            &order_event(key, 1, OrderStatus::Confirmed),
        )
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while h.broker.unacked_count(ORDER_UPDATED_QUEUE) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(h.broker.message_count(ORDER_UPDATED_QUEUE), 0);
}

#[tokio::test]
async fn order_with_unknown_variant_is_acked_and_applied_once() {
    let h = Harness::new();
    let (stocked, unknown) = (variant(), variant());
    h.inventory
        .add_inventories(vec![created(stocked, Money::from_units(10), 10)])
        .await
        .unwrap();
    h.consume(
        ORDER_UPDATED_QUEUE,
        ORDER_UPDATED,
        OrderUpdatedHandler::new(h.inventory.clone()),
    )
    .await;

    let mut event = order_event(stocked, 3, OrderStatus::Confirmed);
    let mut extra = event.items[0].clone();
    extra.product_id = unknown.product_id;
    extra.color_id = unknown.color_id;
    extra.size_id = unknown.size_id;
    event.items.push(extra);

    BrokerEventPublisher::new(h.broker.clone())
        .publish(DEFAULT_EXCHANGE, ORDER_UPDATED, &event)
        .await
        .unwrap();
    wait_for_quantity(&h.inventory, &stocked, 7).await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while h.broker.unacked_count(ORDER_UPDATED_QUEUE) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.inventory.quantity(&stocked).await.unwrap(), Some(7));
    assert_eq!(h.inventory.quantity(&unknown).await.unwrap(), None);
}

#[tokio::test]
async fn new_inventory_is_priced_and_answered_over_rpc() {
    let h = Harness::new();
    let (shirt, hat) = (variant(), variant());
    let prices = Arc::new(h.prices.clone());
    h.consume(
        INVENTORY_CREATED_QUEUE,
        INVENTORY_CREATED,
        InventoriesCreatedHandler::new(prices.clone()),
    )
    .await;
    h.serve(
        CHECK_PRODUCT_QUANTITY,
        CheckQuantityRpcHandler::new(h.inventory.clone()),
    );
    h.serve(GET_TOTAL_PRICE, TotalPriceRpcHandler::new(prices));

    h.inventory
        .add_inventories(vec![
            created(shirt, Money::from_units(10), 4),
            created(hat, Money::from_units(5), 1),
        ])
        .await
        .unwrap();

    let client = BrokerRpcClient::new(h.broker.clone());

    let check = |key: VariantKey, require_quantity| CheckProductQuantityRequest {
        product_id: key.product_id,
        size_id: key.size_id,
        color_id: key.color_id,
        require_quantity,
    };
    let enough: CheckProductQuantityResponse = client
        .call_json(CHECK_PRODUCT_QUANTITY, &check(shirt, 2))
        .await
        .unwrap();
    assert!(enough.is_enough);
    let short: CheckProductQuantityResponse = client
        .call_json(CHECK_PRODUCT_QUANTITY, &check(hat, 2))
        .await
        .unwrap();
    assert!(!short.is_enough);

    let request = TotalPriceRequest {
        items: vec![
            TotalPriceItem {
                product_id: shirt.product_id,
                size_id: shirt.size_id,
                color_id: shirt.color_id,
                quantity: 2,
            },
            TotalPriceItem {
                product_id: hat.product_id,
                size_id: hat.size_id,
                color_id: hat.color_id,
                quantity: 1,
            },
        ],
    };
    let priced = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let reply: TotalPriceResponse =
                client.call_json(GET_TOTAL_PRICE, &request).await.unwrap();
            if reply.total_price == Money::from_units(25) {
                break reply;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(priced.items.len(), 2);
    assert!(priced.items.iter().all(|item| !item.price_id.as_uuid().is_nil()));
}
