//! On-hand stock per product variant.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{ColorId, ProductId, SizeId};
use domain::contracts::CheckProductQuantityRequest;
use domain::events::INVENTORY_CREATED;
use domain::{CreatedInventory, InventoriesCreatedEvent, OrderStatus, UpdatedOrderEvent};
use messaging::{DEFAULT_EXCHANGE, EventPublisher, EventPublisherExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{CatalogError, Result};

/// A product in one color and size; the unit stock and prices are kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub product_id: ProductId,
    pub color_id: ColorId,
    pub size_id: SizeId,
}

impl VariantKey {
    pub fn new(product_id: ProductId, color_id: ColorId, size_id: SizeId) -> Self {
        Self {
            product_id,
            color_id,
            size_id,
        }
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "product {} color {} size {}",
            self.product_id, self.color_id, self.size_id
        )
    }
}

/// Storage of on-hand quantities.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn quantity(&self, key: &VariantKey) -> Result<Option<i64>>;

    /// Applies every delta in one write. Rows that do not exist are left
    /// alone and reported as `None`; the others report their new quantity.
    async fn adjust_all(&self, deltas: &[(VariantKey, i64)]) -> Result<Vec<Option<i64>>>;

    /// Creates the row if missing and adds `quantity` to it.
    async fn add(&self, key: VariantKey, quantity: i64) -> Result<i64>;
}

/// In-memory inventory store.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    rows: Arc<RwLock<HashMap<VariantKey, i64>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CatalogError::Storage("injected inventory failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn quantity(&self, key: &VariantKey) -> Result<Option<i64>> {
        self.check()?;
        Ok(self.rows.read().await.get(key).copied())
    }

    async fn adjust_all(&self, deltas: &[(VariantKey, i64)]) -> Result<Vec<Option<i64>>> {
        self.check()?;
        let mut rows = self.rows.write().await;
        Ok(deltas
            .iter()
            .map(|(key, delta)| {
                rows.get_mut(key).map(|quantity| {
                    *quantity = quantity.saturating_add(*delta);
                    *quantity
                })
            })
            .collect())
    }

    async fn add(&self, key: VariantKey, quantity: i64) -> Result<i64> {
        self.check()?;
        let mut rows = self.rows.write().await;
        let row = rows.entry(key).or_default();
        *row += quantity;
        Ok(*row)
    }
}

/// Stock operations of the inventory service.
pub struct InventoryService {
    store: Arc<dyn InventoryStore>,
    publisher: Arc<dyn EventPublisher>,
    exchange: String,
}

impl InventoryService {
    pub fn new(store: Arc<dyn InventoryStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            exchange: DEFAULT_EXCHANGE.to_string(),
        }
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Stores new stock rows and announces them on `inventory.created` so
    /// the price side can price the variants.
    #[tracing::instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn add_inventories(&self, rows: Vec<CreatedInventory>) -> Result<()> {
        for row in &rows {
            let key = VariantKey::new(row.product_id, row.color_id, row.size_id);
            self.store.add(key, row.quantity).await?;
        }

        let event = InventoriesCreatedEvent {
            created_inventories: rows,
        };
        self.publisher
            .publish(&self.exchange, INVENTORY_CREATED, &event)
            .await?;
        info!("Inventories created");
        Ok(())
    }

    /// Returns true when the variant has at least the required quantity.
    /// Unknown variants have no stock.
    pub async fn has_enough(&self, request: &CheckProductQuantityRequest) -> Result<bool> {
        let key = VariantKey::new(request.product_id, request.color_id, request.size_id);
        let on_hand = self.store.quantity(&key).await?.unwrap_or(0);
        Ok(on_hand >= i64::from(request.require_quantity))
    }

    pub async fn quantity(&self, key: &VariantKey) -> Result<Option<i64>> {
        self.store.quantity(key).await
    }

    /// Takes stock out for confirmed orders and puts it back for returned
    /// ones. Other statuses leave stock alone.
    ///
    /// All items are applied together or not at all. Items for variants
    /// with no inventory row are skipped with a warning, since a redelivery
    /// would not make them appear.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.id, status = %event.status))]
    pub async fn apply_order_update(&self, event: &UpdatedOrderEvent) -> Result<()> {
        let sign = match event.status {
            OrderStatus::Confirmed => -1,
            OrderStatus::Returned => 1,
            _ => {
                debug!("No stock change for status");
                return Ok(());
            }
        };
        let direction = if sign < 0 { "decrement" } else { "increment" };

        let deltas: Vec<(VariantKey, i64)> = event
            .items
            .iter()
            .map(|item| {
                (
                    VariantKey::new(item.product_id, item.color_id, item.size_id),
                    sign * i64::from(item.quantity),
                )
            })
            .collect();

        let outcome = self.store.adjust_all(&deltas).await?;
        for ((key, _), remaining) in deltas.iter().zip(outcome) {
            match remaining {
                Some(remaining) => {
                    metrics::counter!("inventory_adjustments_total", "direction" => direction)
                        .increment(1);
                    if remaining < 0 {
                        warn!(%key, remaining, "Stock went negative");
                    }
                }
                None => warn!(%key, "No inventory for variant, item skipped"),
            }
        }
        Ok(())
    }
}
