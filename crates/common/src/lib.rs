//! Shared identifier types.
//!
//! Every entity that crosses a service boundary is addressed by a UUID. The
//! newtypes here keep an order id from being passed where a product id is
//! expected while still serializing as a bare UUID string on the wire.

mod ids;

pub use ids::{ColorId, OrderId, OwnerId, PaymentId, PriceId, ProductId, SizeId};
