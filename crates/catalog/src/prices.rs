//! Unit prices per product variant.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::PriceId;
use domain::Money;
use domain::contracts::{PricedItem, TotalPriceRequest, TotalPriceResponse};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{CatalogError, Result};
use crate::inventory::VariantKey;

/// The current price of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceRow {
    pub id: PriceId,
    pub amount: Money,
}

#[async_trait]
pub trait PriceBook: Send + Sync {
    /// Records a new price row for `key`; the latest row is the current one.
    async fn set_price(&self, key: VariantKey, amount: Money) -> Result<PriceId>;

    async fn price_of(&self, key: &VariantKey) -> Result<Option<PriceRow>>;
}

/// In-memory price book.
#[derive(Clone, Default)]
pub struct InMemoryPriceBook {
    rows: Arc<RwLock<HashMap<VariantKey, PriceRow>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryPriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CatalogError::Storage("injected price book failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PriceBook for InMemoryPriceBook {
    async fn set_price(&self, key: VariantKey, amount: Money) -> Result<PriceId> {
        self.check()?;
        let id = PriceId::new();
        self.rows.write().await.insert(key, PriceRow { id, amount });
        Ok(id)
    }

    async fn price_of(&self, key: &VariantKey) -> Result<Option<PriceRow>> {
        self.check()?;
        Ok(self.rows.read().await.get(key).copied())
    }
}

/// Prices every requested item at its variant's current unit price.
///
/// Unpriced variants count as zero and carry a nil price id. Negative
/// quantities count as zero. A total that does not fit in `i64` cents is an
/// [`CatalogError::Overflow`].
pub async fn total_price(book: &dyn PriceBook, request: &TotalPriceRequest) -> Result<TotalPriceResponse> {
    let mut response = TotalPriceResponse::default();

    for item in &request.items {
        let key = VariantKey::new(item.product_id, item.color_id, item.size_id);
        let row = match book.price_of(&key).await? {
            Some(row) => row,
            None => {
                debug!(%key, "No price for variant");
                PriceRow {
                    id: PriceId::from_uuid(uuid::Uuid::nil()),
                    amount: Money::zero(),
                }
            }
        };

        let quantity = u32::try_from(item.quantity).unwrap_or(0);
        response.total_price = row
            .amount
            .checked_multiply(quantity)
            .and_then(|line| response.total_price.checked_add(line))
            .ok_or(CatalogError::Overflow(key))?;
        response.items.push(PricedItem {
            amount: row.amount,
            quantity: item.quantity,
            product_id: item.product_id,
            color_id: item.color_id,
            size_id: item.size_id,
            price_id: row.id,
        });
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ColorId, ProductId, SizeId};
    use domain::contracts::TotalPriceItem;

    fn item(key: VariantKey, quantity: i32) -> TotalPriceItem {
        TotalPriceItem {
            product_id: key.product_id,
            size_id: key.size_id,
            color_id: key.color_id,
            quantity,
        }
    }

    fn key() -> VariantKey {
        VariantKey::new(ProductId::new(), ColorId::new(), SizeId::new())
    }

    #[tokio::test]
    async fn test_two_items_total_twenty_five() {
        let book = InMemoryPriceBook::new();
        let (a, b) = (key(), key());
        book.set_price(a, Money::from_units(10)).await.unwrap();
        book.set_price(b, Money::from_units(5)).await.unwrap();

        let request = TotalPriceRequest {
            items: vec![item(a, 2), item(b, 1)],
        };
        let response = total_price(&book, &request).await.unwrap();
        assert_eq!(response.total_price, Money::from_units(25));
        assert_eq!(response.items[0].amount, Money::from_units(10));
        assert_eq!(response.items[1].quantity, 1);
    }

    #[tokio::test]
    async fn test_unpriced_variant_counts_as_zero() {
        let book = InMemoryPriceBook::new();
        let request = TotalPriceRequest {
            items: vec![item(key(), 3)],
        };
        let response = total_price(&book, &request).await.unwrap();
        assert!(response.total_price.is_zero());
        assert_eq!(response.items[0].price_id.as_uuid(), uuid::Uuid::nil());
    }

    #[tokio::test]
    async fn test_overflowing_total_is_an_error() {
        let book = InMemoryPriceBook::new();
        let k = key();
        book.set_price(k, Money::from_decimal(9.0e15).unwrap())
            .await
            .unwrap();

        let request = TotalPriceRequest {
            items: vec![item(k, i32::MAX)],
        };
        assert!(matches!(
            total_price(&book, &request).await,
            Err(CatalogError::Overflow(_))
        ));
    }

    #[tokio::test]
    async fn test_latest_price_wins() {
        let book = InMemoryPriceBook::new();
        let k = key();
        let first = book.set_price(k, Money::from_units(1)).await.unwrap();
        let second = book.set_price(k, Money::from_units(2)).await.unwrap();

        let row = book.price_of(&k).await.unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(row, PriceRow { id: second, amount: Money::from_units(2) });
    }
}
