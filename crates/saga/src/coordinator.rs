//! Order saga coordinator.
//!
//! Validates and prices new orders over RPC, owns the order status machine
//! and announces every accepted status change on `order.updated`. The other
//! services react to those events; nothing here waits for them.

use std::sync::Arc;

use common::{OrderId, OwnerId};
use domain::contracts::{
    CHECK_PRODUCT_QUANTITY, CheckProductQuantityRequest, CheckProductQuantityResponse,
    CreateOrderRequest, GET_TOTAL_PRICE, TotalPriceItem, TotalPriceRequest, TotalPriceResponse,
};
use domain::events::ORDER_UPDATED;
use domain::{Order, OrderItem, OrderStatus, UpdatedOrderEvent};
use messaging::{DEFAULT_EXCHANGE, EventPublisher, EventPublisherExt, RpcClient, RpcClientExt};
use tracing::{debug, error, info, warn};

use crate::error::{OrderError, Result};
use crate::repository::OrderRepository;

/// Default page size of [`OrderCoordinator::get_user_orders`].
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Names of the exchange and RPC endpoints the coordinator talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub exchange: String,
    pub check_quantity_endpoint: String,
    pub total_price_endpoint: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            exchange: DEFAULT_EXCHANGE.to_string(),
            check_quantity_endpoint: CHECK_PRODUCT_QUANTITY.to_string(),
            total_price_endpoint: GET_TOTAL_PRICE.to_string(),
        }
    }
}

/// Coordinates the order side of the choreographed order saga.
pub struct OrderCoordinator {
    repository: Arc<dyn OrderRepository>,
    rpc: Arc<dyn RpcClient>,
    publisher: Arc<dyn EventPublisher>,
    config: CoordinatorConfig,
}

impl OrderCoordinator {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        rpc: Arc<dyn RpcClient>,
        publisher: Arc<dyn EventPublisher>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            repository,
            rpc,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Validates, stock-checks and prices a new order, then persists it as
    /// `Pending`.
    ///
    /// Nothing is persisted unless every item is in stock and the priced
    /// total is positive. Any RPC failure fails the whole call.
    #[tracing::instrument(skip(self, request), fields(items = request.items.len()))]
    pub async fn create_order(&self, owner_id: OwnerId, request: CreateOrderRequest) -> Result<Order> {
        validate_items(&request)?;

        for item in &request.items {
            let check = CheckProductQuantityRequest {
                product_id: item.product_id,
                size_id: item.size_id,
                color_id: item.color_id,
                require_quantity: item.quantity,
            };
            let reply: CheckProductQuantityResponse = self
                .rpc
                .call_json(&self.config.check_quantity_endpoint, &check)
                .await
                .map_err(|source| {
                    warn!(error = %source, product_id = %item.product_id, "Stock check failed");
                    OrderError::Unavailable {
                        service: self.config.check_quantity_endpoint.clone(),
                        source,
                    }
                })?;

            if !reply.is_enough {
                info!(product_id = %item.product_id, "Insufficient stock");
                return Err(OrderError::OutOfStock {
                    product_id: item.product_id,
                });
            }
        }

        let pricing = TotalPriceRequest {
            items: request
                .items
                .iter()
                .map(|item| TotalPriceItem {
                    product_id: item.product_id,
                    size_id: item.size_id,
                    color_id: item.color_id,
                    quantity: item.quantity,
                })
                .collect(),
        };
        let priced: TotalPriceResponse = self
            .rpc
            .call_json(&self.config.total_price_endpoint, &pricing)
            .await
            .map_err(|source| {
                warn!(error = %source, "Pricing call failed");
                OrderError::Unavailable {
                    service: self.config.total_price_endpoint.clone(),
                    source,
                }
            })?;

        if !priced.total_price.is_positive() {
            return Err(OrderError::Pricing(format!(
                "total price is {}",
                priced.total_price
            )));
        }
        let items: Vec<OrderItem> = priced
            .items
            .iter()
            .filter_map(|item| item.to_order_item())
            .collect();
        if items.is_empty() || items.len() != request.items.len() {
            return Err(OrderError::Pricing(format!(
                "{} of {} items priced",
                items.len(),
                request.items.len()
            )));
        }

        let order = Order::new(request.description, priced.total_price, owner_id, items);
        self.repository.create_order(&order).await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to persist order");
            OrderError::Internal(e)
        })?;

        metrics::counter!("orders_created_total").increment(1);
        info!(
            order_id = %order.id,
            order_code = %order.order_code,
            total = %order.total_price,
            "Order created"
        );
        Ok(order)
    }

    /// Moves an order to `status`.
    ///
    /// Requesting the current status is a no-op. Accepted changes are
    /// persisted first and then published on `order.updated`.
    #[tracing::instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        privileged: bool,
    ) -> Result<Order> {
        let mut order = self.load_live(order_id).await?;
        let from = order.status;

        if from == status {
            debug!(%status, "Order already in requested status");
            return Ok(order);
        }
        if !from.can_transition_to(status, privileged) {
            metrics::counter!(
                "order_transitions_rejected_total",
                "from" => from.as_str(),
                "to" => status.as_str()
            )
            .increment(1);
            return Err(OrderError::TransitionRejected { from, to: status });
        }

        order.set_status(status);
        self.persist(&order).await?;

        metrics::counter!(
            "order_status_transitions_total",
            "from" => from.as_str(),
            "to" => status.as_str()
        )
        .increment(1);
        info!(%from, to = %status, "Order status changed");

        self.announce(&order).await;
        Ok(order)
    }

    /// Edits the description of an owner's order and optionally cancels it.
    ///
    /// Only `Pending` and `Processing` orders can be edited.
    #[tracing::instrument(skip(self, description))]
    pub async fn update_order(
        &self,
        order_id: OrderId,
        description: Option<String>,
        is_cancel: bool,
        owner_id: OwnerId,
    ) -> Result<Order> {
        let mut order = self.load_live(order_id).await?;

        if !order.is_owned_by(owner_id) {
            return Err(OrderError::validation(
                "Forbidden",
                "order belongs to another user",
            ));
        }
        if !order.status.is_editable() {
            return Err(OrderError::validation(
                "Order cannot be updated",
                format!("order is {}", order.status),
            )
            .with_field("status", order.status.as_str()));
        }

        if let Some(description) = description {
            order.set_description(description);
        }
        let canceled_from = is_cancel.then_some(order.status);
        if is_cancel {
            order.set_status(OrderStatus::Canceled);
        }
        self.persist(&order).await?;

        if let Some(from) = canceled_from {
            metrics::counter!(
                "order_status_transitions_total",
                "from" => from.as_str(),
                "to" => OrderStatus::Canceled.as_str()
            )
            .increment(1);
            info!(%from, "Order canceled by owner");
            self.announce(&order).await;
        }
        Ok(order)
    }

    /// Returns an owner's order. Foreign orders look missing.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId, owner_id: OwnerId) -> Result<Order> {
        let order = self.load_live(order_id).await?;
        if !order.is_owned_by(owner_id) {
            return Err(OrderError::order_not_found(order_id));
        }
        Ok(order)
    }

    /// Lists an owner's orders. Storage failures yield an empty page.
    #[tracing::instrument(skip(self))]
    pub async fn get_user_orders(
        &self,
        owner_id: OwnerId,
        page: usize,
        page_size: usize,
    ) -> Vec<Order> {
        let page = page.max(1);
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };

        match self
            .repository
            .get_orders_by_user_id(owner_id, page, page_size)
            .await
        {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "Failed to list orders");
                Vec::new()
            }
        }
    }

    /// Soft-deletes an owner's order.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId, owner_id: OwnerId) -> Result<()> {
        let mut order = self.get_order(order_id, owner_id).await?;
        order.soft_delete();
        self.persist(&order).await?;
        info!("Order deleted");
        Ok(())
    }

    /// Returns true once the order is visible in storage.
    pub async fn order_exists(&self, order_id: OrderId) -> Result<bool> {
        self.repository
            .is_order_exist_by_id(order_id)
            .await
            .map_err(|e| {
                error!(error = %e, %order_id, "Failed to check order existence");
                OrderError::Internal(e)
            })
    }

    async fn load_live(&self, order_id: OrderId) -> Result<Order> {
        let order = self
            .repository
            .get_order_by_id(order_id)
            .await
            .map_err(|e| {
                error!(error = %e, %order_id, "Failed to load order");
                OrderError::Internal(e)
            })?;

        match order {
            Some(order) if !order.is_deleted => Ok(order),
            _ => Err(OrderError::order_not_found(order_id)),
        }
    }

    async fn persist(&self, order: &Order) -> Result<()> {
        self.repository.update_order(order).await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to persist order");
            OrderError::Internal(e)
        })
    }

    /// Publishes `order.updated`. Failures are logged and swallowed.
    async fn announce(&self, order: &Order) {
        let event = UpdatedOrderEvent::from(order);
        if let Err(e) = self
            .publisher
            .publish(&self.config.exchange, ORDER_UPDATED, &event)
            .await
        {
            warn!(error = %e, order_id = %order.id, "Failed to publish order.updated");
        }
    }
}

fn validate_items(request: &CreateOrderRequest) -> Result<()> {
    if request.items.is_empty() {
        return Err(OrderError::validation(
            "Invalid order",
            "an order needs at least one item",
        )
        .with_field("items", "must not be empty"));
    }

    let mut error: Option<OrderError> = None;
    for (index, item) in request.items.iter().enumerate() {
        if item.quantity <= 0 {
            error = Some(
                error
                    .unwrap_or_else(|| {
                        OrderError::validation("Invalid order", "quantities must be positive")
                    })
                    .with_field(format!("items[{index}].quantity"), "must be positive"),
            );
        }
    }
    match error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
