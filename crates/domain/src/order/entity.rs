//! Order entity.

use chrono::{DateTime, Utc};
use common::{ColorId, OrderId, OwnerId, PriceId, ProductId, SizeId};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Money, OrderStatus};

/// Length of the random part of an order code.
const ORDER_CODE_LETTERS: usize = 10;

/// A priced line of an order.
///
/// Items are priced once at creation and never repriced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub quantity: u32,
    pub product_id: ProductId,
    pub color_id: ColorId,
    pub size_id: SizeId,
    pub order_id: OrderId,
    /// Unit price captured when the order was placed.
    pub price: Money,
    pub price_id: PriceId,
}

impl OrderItem {
    /// Creates an item not yet attached to an order.
    pub fn new(
        product_id: ProductId,
        color_id: ColorId,
        size_id: SizeId,
        quantity: u32,
        price: Money,
        price_id: PriceId,
    ) -> Self {
        Self {
            quantity,
            product_id,
            color_id,
            size_id,
            order_id: OrderId::from_uuid(uuid::Uuid::nil()),
            price,
            price_id,
        }
    }

    /// Returns the line total (quantity * unit price).
    pub fn line_total(&self) -> Money {
        self.price.multiply(self.quantity)
    }
}

/// An order placed by a user.
///
/// Orders are never hard-deleted; [`Order::soft_delete`] flags them instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub description: String,
    pub order_code: String,
    /// Total returned by pricing; never recomputed from current prices.
    pub total_price: Money,
    pub status: OrderStatus,
    pub owner_id: OwnerId,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Creates a `Pending` order with a fresh id and order code, attaching
    /// every item to it.
    pub fn new(
        description: impl Into<String>,
        total_price: Money,
        owner_id: OwnerId,
        mut items: Vec<OrderItem>,
    ) -> Self {
        let id = OrderId::new();
        for item in &mut items {
            item.order_id = id;
        }
        let now = Utc::now();

        Self {
            id,
            description: description.into(),
            order_code: generate_order_code(),
            total_price,
            status: OrderStatus::Pending,
            owner_id,
            items,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// Returns true if `owner_id` placed this order.
    pub fn is_owned_by(&self, owner_id: OwnerId) -> bool {
        self.owner_id == owner_id
    }

    /// Sets the status without checking the transition table.
    pub fn set_status(&mut self, status: OrderStatus) {
        self.status = status;
        self.touch();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.touch();
    }

    /// Flags the order as deleted.
    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Generates `ORDER-<10 uppercase letters><unix nanos>`.
pub fn generate_order_code() -> String {
    let mut rng = rand::rng();
    let letters: String = (0..ORDER_CODE_LETTERS)
        .map(|_| char::from(rng.random_range(b'A'..=b'Z')))
        .collect();
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("ORDER-{letters}{nanos}")
}
