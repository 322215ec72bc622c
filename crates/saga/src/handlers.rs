//! Broker-facing entry points of the order service.

use std::sync::Arc;

use async_trait::async_trait;
use domain::contracts::{CreateOrderRequest, OrderResponse};
use domain::{OrderStatus, PaymentStatus, PaymentStatusChangedEvent};
use messaging::{EventHandler, HandlerError, RpcHandler};
use tracing::{debug, info, warn};

use crate::coordinator::OrderCoordinator;
use crate::error::OrderError;

/// Queue the payment-status consumer reads from.
pub const PAYMENT_STATUS_QUEUE: &str = "payment_status_changed_event";

/// Reply sent when an order cannot be created; callers read it as failure.
pub const EMPTY_REPLY: &str = "{}";

/// Confirms orders whose payment succeeded.
pub struct PaymentStatusHandler {
    coordinator: Arc<OrderCoordinator>,
}

impl PaymentStatusHandler {
    pub fn new(coordinator: Arc<OrderCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl EventHandler for PaymentStatusHandler {
    async fn handle(&self, payload: &str) -> Result<(), HandlerError> {
        let event: PaymentStatusChangedEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                // Redelivery cannot fix a malformed payload.
                warn!(error = %e, "Dropping malformed payment status event");
                return Ok(());
            }
        };

        if event.status != PaymentStatus::Success {
            debug!(order_id = %event.order_id, status = ?event.status, "Ignoring payment status");
            return Ok(());
        }

        if !self.coordinator.order_exists(event.order_id).await? {
            return Err(format!("order {} is not visible yet", event.order_id).into());
        }

        match self
            .coordinator
            .update_order_status(event.order_id, OrderStatus::Confirmed, false)
            .await
        {
            Ok(_) => {
                info!(order_id = %event.order_id, payment_id = %event.payment_id, "Order paid");
                Ok(())
            }
            Err(OrderError::TransitionRejected { from, to }) => {
                warn!(order_id = %event.order_id, %from, %to, "Payment arrived for an order that cannot be confirmed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Serves `create_order` for the payment service.
pub struct CreateOrderRpcHandler {
    coordinator: Arc<OrderCoordinator>,
}

impl CreateOrderRpcHandler {
    pub fn new(coordinator: Arc<OrderCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl RpcHandler for CreateOrderRpcHandler {
    async fn handle(&self, request: String) -> String {
        let request: CreateOrderRequest = match serde_json::from_str(&request) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Malformed create_order request");
                return EMPTY_REPLY.to_string();
            }
        };
        let Some(owner_id) = request.user_id else {
            warn!("create_order request without userId");
            return EMPTY_REPLY.to_string();
        };

        match self.coordinator.create_order(owner_id, request).await {
            Ok(order) => serde_json::to_string(&OrderResponse::from(&order))
                .unwrap_or_else(|_| EMPTY_REPLY.to_string()),
            Err(e) => {
                info!(error = %e, "create_order rejected");
                EMPTY_REPLY.to_string()
            }
        }
    }
}
