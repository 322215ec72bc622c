//! Order persistence trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{OrderId, OwnerId};
use domain::Order;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Order already exists: {0}")]
    Duplicate(OrderId),

    #[error("Order does not exist: {0}")]
    Missing(OrderId),
}

/// Storage of orders owned by the order service.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Loads an order, including soft-deleted ones.
    async fn get_order_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn create_order(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Replaces a stored order.
    async fn update_order(&self, order: &Order) -> Result<(), RepositoryError>;

    async fn is_order_exist_by_id(&self, id: OrderId) -> Result<bool, RepositoryError>;

    /// Lists an owner's live orders, newest first. `page` is 1-based.
    async fn get_orders_by_user_id(
        &self,
        owner_id: OwnerId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Order>, RepositoryError>;
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: HashMap<OrderId, Order>,
    fail_on_create: bool,
    fail_on_update: bool,
    fail_on_read: bool,
}

/// In-memory order repository for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<RwLock<InMemoryOrderState>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `create_order` call fail.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.write().fail_on_create = fail;
    }

    /// Makes every `update_order` call fail.
    pub fn set_fail_on_update(&self, fail: bool) {
        self.write().fail_on_update = fail;
    }

    /// Makes every read fail.
    pub fn set_fail_on_read(&self, fail: bool) {
        self.write().fail_on_read = fail;
    }

    /// Number of stored orders, soft-deleted ones included.
    pub fn order_count(&self) -> usize {
        self.read().orders.len()
    }

    /// Returns a stored order regardless of injected failures.
    pub fn snapshot(&self, id: OrderId) -> Option<Order> {
        self.read().orders.get(&id).cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryOrderState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryOrderState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_read(state: &InMemoryOrderState) -> Result<(), RepositoryError> {
        if state.fail_on_read {
            return Err(RepositoryError::Storage("injected read failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn get_order_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let state = self.read();
        Self::check_read(&state)?;
        Ok(state.orders.get(&id).cloned())
    }

    async fn create_order(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut state = self.write();
        if state.fail_on_create {
            return Err(RepositoryError::Storage("injected create failure".into()));
        }
        if state.orders.contains_key(&order.id) {
            return Err(RepositoryError::Duplicate(order.id));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut state = self.write();
        if state.fail_on_update {
            return Err(RepositoryError::Storage("injected update failure".into()));
        }
        match state.orders.get_mut(&order.id) {
            Some(stored) => {
                *stored = order.clone();
                Ok(())
            }
            None => Err(RepositoryError::Missing(order.id)),
        }
    }

    async fn is_order_exist_by_id(&self, id: OrderId) -> Result<bool, RepositoryError> {
        let state = self.read();
        Self::check_read(&state)?;
        Ok(state.orders.get(&id).is_some_and(|order| !order.is_deleted))
    }

    async fn get_orders_by_user_id(
        &self,
        owner_id: OwnerId,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Order>, RepositoryError> {
        let state = self.read();
        Self::check_read(&state)?;

        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| order.is_owned_by(owner_id) && !order.is_deleted)
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.order_code.cmp(&b.order_code))
        });

        let skip = page.saturating_sub(1).saturating_mul(page_size);
        Ok(orders.into_iter().skip(skip).take(page_size).collect())
    }
}
