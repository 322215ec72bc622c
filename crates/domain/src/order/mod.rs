//! The order entity and its lifecycle.

mod entity;
mod money;
mod state;

pub use entity::{Order, OrderItem, generate_order_code};
pub use money::Money;
pub use state::OrderStatus;
