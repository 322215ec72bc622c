//! Request and reply bodies of the RPC endpoints.
//!
//! Reply fields carry `#[serde(default)]` so that the empty object `{}`
//! a failing peer replies with decodes to the fail-closed value.

use chrono::{DateTime, Utc};
use common::{ColorId, OrderId, OwnerId, PriceId, ProductId, SizeId};
use serde::{Deserialize, Serialize};

use crate::{Money, Order, OrderItem, OrderStatus};

/// Endpoint answered by the inventory side.
pub const CHECK_PRODUCT_QUANTITY: &str = "check_product_quantity";

/// Endpoint answered by the price side.
pub const GET_TOTAL_PRICE: &str = "get_total_price";

/// Endpoint answered by the order service, called by payment.
pub const CREATE_ORDER: &str = "create_order";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckProductQuantityRequest {
    pub product_id: ProductId,
    pub size_id: SizeId,
    pub color_id: ColorId,
    pub require_quantity: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckProductQuantityResponse {
    #[serde(default)]
    pub is_enough: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalPriceRequest {
    pub items: Vec<TotalPriceItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalPriceItem {
    pub product_id: ProductId,
    pub size_id: SizeId,
    pub color_id: ColorId,
    pub quantity: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalPriceResponse {
    #[serde(default)]
    pub total_price: Money,
    #[serde(default)]
    pub items: Vec<PricedItem>,
}

/// A priced line as returned by the price side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedItem {
    /// Unit price.
    pub amount: Money,
    pub quantity: i32,
    pub product_id: ProductId,
    pub color_id: ColorId,
    pub size_id: SizeId,
    pub price_id: PriceId,
}

impl PricedItem {
    /// Converts to an order item, or `None` when the quantity is not positive.
    pub fn to_order_item(&self) -> Option<OrderItem> {
        let quantity = u32::try_from(self.quantity).ok().filter(|q| *q > 0)?;
        Some(OrderItem::new(
            self.product_id,
            self.color_id,
            self.size_id,
            quantity,
            self.amount,
            self.price_id,
        ))
    }
}

/// Body of the `create_order` call and of `POST /orders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    /// Present on the RPC path only; HTTP callers are identified by header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<OwnerId>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub items: Vec<CreateOrderItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderItem {
    pub product_id: ProductId,
    pub color_id: ColorId,
    pub size_id: SizeId,
    pub quantity: i32,
}

/// Order as rendered to HTTP clients and to the `create_order` caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: OrderId,
    pub description: String,
    pub order_code: String,
    pub total_price: Money,
    pub status: OrderStatus,
    pub owner_id: OwnerId,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            description: order.description.clone(),
            order_code: order.order_code.clone(),
            total_price: order.total_price,
            status: order.status,
            owner_id: order.owner_id,
            items: order.items.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}
