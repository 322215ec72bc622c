//! Domain layer for the you-shop order services.
//!
//! This crate provides:
//! - the `Order` entity and its items, with the `OrderStatus` state machine
//! - `Money`, kept in integer cents and carried as a decimal on the wire
//! - the JSON events exchanged over the topic exchange
//! - the request/reply contracts of the RPC endpoints

pub mod contracts;
pub mod error;
pub mod events;
pub mod order;

pub use error::DomainError;
pub use events::{
    CreatedInventory, InventoriesCreatedEvent, PaymentStatus, PaymentStatusChangedEvent,
    UpdatedOrderEvent, UpdatedOrderItem,
};
pub use order::{Money, Order, OrderItem, OrderStatus};
