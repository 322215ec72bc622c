//! Order side of the you-shop order saga.
//!
//! The saga is choreographed rather than orchestrated:
//! 1. `create_order` checks stock and prices items over RPC, then persists
//!    the order as `Pending`
//! 2. the payment service publishes `payment.status.success`
//! 3. the payment-status consumer confirms the order, which publishes
//!    `order.updated`
//! 4. the inventory side reacts to `order.updated` on its own
//!
//! There is no compensation step here; each consuming service owns its own.

pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod repository;

pub use coordinator::{CoordinatorConfig, DEFAULT_PAGE_SIZE, OrderCoordinator};
pub use error::{OrderError, Result};
pub use handlers::{CreateOrderRpcHandler, PAYMENT_STATUS_QUEUE, PaymentStatusHandler};
pub use repository::{InMemoryOrderRepository, OrderRepository, RepositoryError};
