//! Broker-facing entry points of the inventory and price services.

use std::sync::Arc;

use async_trait::async_trait;
use domain::contracts::{
    CheckProductQuantityRequest, CheckProductQuantityResponse, TotalPriceRequest,
    TotalPriceResponse,
};
use domain::{InventoriesCreatedEvent, UpdatedOrderEvent};
use messaging::{EventHandler, HandlerError, RpcHandler};
use tracing::{info, warn};

use crate::inventory::{InventoryService, VariantKey};
use crate::prices::{self, PriceBook};

/// Queue the inventory side reads `order.updated` from.
pub const ORDER_UPDATED_QUEUE: &str = "product_consumer_updated_order";

/// Queue the price side reads `inventory.created` from.
pub const INVENTORY_CREATED_QUEUE: &str = "inventory_created_price_consumer";

fn encode<T: serde::Serialize + Default>(reply: &T) -> String {
    serde_json::to_string(reply)
        .or_else(|_| serde_json::to_string(&T::default()))
        .unwrap_or_else(|_| "{}".to_string())
}

/// Keeps stock in step with order status changes.
pub struct OrderUpdatedHandler {
    inventory: Arc<InventoryService>,
}

impl OrderUpdatedHandler {
    pub fn new(inventory: Arc<InventoryService>) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl EventHandler for OrderUpdatedHandler {
    async fn handle(&self, payload: &str) -> Result<(), HandlerError> {
        let event: UpdatedOrderEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed order.updated event");
                return Ok(());
            }
        };
        self.inventory.apply_order_update(&event).await?;
        Ok(())
    }
}

/// Answers `check_product_quantity`. Any failure answers "not enough".
pub struct CheckQuantityRpcHandler {
    inventory: Arc<InventoryService>,
}

impl CheckQuantityRpcHandler {
    pub fn new(inventory: Arc<InventoryService>) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl RpcHandler for CheckQuantityRpcHandler {
    async fn handle(&self, request: String) -> String {
        let is_enough = match serde_json::from_str::<CheckProductQuantityRequest>(&request) {
            Ok(request) => self.inventory.has_enough(&request).await.unwrap_or_else(|e| {
                warn!(error = %e, "Stock lookup failed");
                false
            }),
            Err(e) => {
                warn!(error = %e, "Malformed check_product_quantity request");
                false
            }
        };
        encode(&CheckProductQuantityResponse { is_enough })
    }
}

/// Answers `get_total_price`. Any failure answers a zero total.
pub struct TotalPriceRpcHandler {
    prices: Arc<dyn PriceBook>,
}

impl TotalPriceRpcHandler {
    pub fn new(prices: Arc<dyn PriceBook>) -> Self {
        Self { prices }
    }
}

#[async_trait]
impl RpcHandler for TotalPriceRpcHandler {
    async fn handle(&self, request: String) -> String {
        let request: TotalPriceRequest = match serde_json::from_str(&request) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Malformed get_total_price request");
                return encode(&TotalPriceResponse::default());
            }
        };

        match prices::total_price(self.prices.as_ref(), &request).await {
            Ok(response) => encode(&response),
            Err(e) => {
                warn!(error = %e, "Pricing failed");
                encode(&TotalPriceResponse::default())
            }
        }
    }
}

/// Prices newly created inventory rows.
pub struct InventoriesCreatedHandler {
    prices: Arc<dyn PriceBook>,
}

impl InventoriesCreatedHandler {
    pub fn new(prices: Arc<dyn PriceBook>) -> Self {
        Self { prices }
    }
}

#[async_trait]
impl EventHandler for InventoriesCreatedHandler {
    async fn handle(&self, payload: &str) -> Result<(), HandlerError> {
        let event: InventoriesCreatedEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed inventory.created event");
                return Ok(());
            }
        };

        for row in &event.created_inventories {
            let key = VariantKey::new(row.product_id, row.color_id, row.size_id);
            let price_id = self.prices.set_price(key, row.price).await?;
            info!(%key, %price_id, price = %row.price, "Variant priced");
        }
        Ok(())
    }
}
