//! Inventory and price side of the you-shop order saga.
//!
//! Answers the stock and pricing RPCs the order service makes while creating
//! an order, and keeps on-hand quantities in step with `order.updated`.

pub mod error;
pub mod handlers;
pub mod inventory;
pub mod prices;

pub use error::{CatalogError, Result};
pub use handlers::{
    CheckQuantityRpcHandler, INVENTORY_CREATED_QUEUE, InventoriesCreatedHandler,
    ORDER_UPDATED_QUEUE, OrderUpdatedHandler, TotalPriceRpcHandler,
};
pub use inventory::{InMemoryInventoryStore, InventoryService, InventoryStore, VariantKey};
pub use prices::{InMemoryPriceBook, PriceBook, PriceRow, total_price};
