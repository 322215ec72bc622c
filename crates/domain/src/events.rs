//! Events exchanged over the `you_shop` topic exchange.
//!
//! Field names follow the JSON the existing services produce and consume,
//! including a couple of historical misspellings that are accepted on input.

use common::{ColorId, OrderId, OwnerId, PaymentId, ProductId, SizeId};
use serde::{Deserialize, Serialize};

use crate::{DomainError, Money, Order, OrderStatus};

/// Routing key of [`UpdatedOrderEvent`].
pub const ORDER_UPDATED: &str = "order.updated";

/// Binding pattern for every [`PaymentStatusChangedEvent`].
pub const PAYMENT_STATUS_PATTERN: &str = "payment.status.*";

/// Routing key of [`InventoriesCreatedEvent`].
pub const INVENTORY_CREATED: &str = "inventory.created";

/// Published by the order service after every accepted status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedOrderEvent {
    pub id: OrderId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub order_code: String,
    #[serde(default)]
    pub total_price: Money,
    pub status: OrderStatus,
    pub owner_id: OwnerId,
    #[serde(default, alias = "Items")]
    pub items: Vec<UpdatedOrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedOrderItem {
    pub quantity: u32,
    pub product_id: ProductId,
    pub color_id: ColorId,
    pub size_id: SizeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(default)]
    pub price: Money,
}

impl From<&Order> for UpdatedOrderEvent {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            description: order.description.clone(),
            order_code: order.order_code.clone(),
            total_price: order.total_price,
            status: order.status,
            owner_id: order.owner_id,
            items: order
                .items
                .iter()
                .map(|item| UpdatedOrderItem {
                    quantity: item.quantity,
                    product_id: item.product_id,
                    color_id: item.color_id,
                    size_id: item.size_id,
                    order_id: Some(item.order_id),
                    price: item.price,
                })
                .collect(),
        }
    }
}

/// Payment outcome as carried on the wire (`1..=3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum PaymentStatus {
    Pending = 1,
    Success = 2,
    Failed = 3,
}

impl PaymentStatus {
    /// Routing key the payment service publishes this status under.
    pub fn routing_key(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "payment.status.pending",
            PaymentStatus::Success => "payment.status.success",
            PaymentStatus::Failed => "payment.status.failed",
        }
    }
}

impl TryFrom<u8> for PaymentStatus {
    type Error = DomainError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(PaymentStatus::Pending),
            2 => Ok(PaymentStatus::Success),
            3 => Ok(PaymentStatus::Failed),
            other => Err(DomainError::UnknownPaymentStatus(other)),
        }
    }
}

impl From<PaymentStatus> for u8 {
    fn from(status: PaymentStatus) -> Self {
        status as u8
    }
}

/// Published by the payment service when a payment settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusChangedEvent {
    #[serde(alias = "payementId")]
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub status: PaymentStatus,
}

/// Published by the inventory side when stock rows are created; the price
/// book prices each new variant from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InventoriesCreatedEvent {
    #[serde(default)]
    pub created_inventories: Vec<CreatedInventory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreatedInventory {
    pub product_id: ProductId,
    pub color_id: ColorId,
    pub size_id: SizeId,
    pub price: Money,
    pub quantity: i64,
}
