//! Order service error taxonomy.

use std::collections::BTreeMap;

use common::ProductId;
use domain::OrderStatus;
use messaging::MessagingError;
use thiserror::Error;

use crate::repository::RepositoryError;

/// Errors returned by [`crate::OrderCoordinator`] operations.
///
/// Transport and storage details never reach callers: they are logged where
/// they happen and surface as [`OrderError::Unavailable`] or
/// [`OrderError::Internal`].
#[derive(Debug, Error)]
pub enum OrderError {
    /// The request itself is invalid.
    #[error("{title}: {detail}")]
    Validation {
        title: String,
        detail: String,
        /// Offending field name mapped to a message.
        fields: BTreeMap<String, String>,
    },

    /// The status machine does not allow this change.
    #[error("Cannot change order status from {from} to {to}")]
    TransitionRejected { from: OrderStatus, to: OrderStatus },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Product {product_id} does not have enough stock")]
    OutOfStock { product_id: ProductId },

    /// Pricing returned nothing usable.
    #[error("Pricing failed: {0}")]
    Pricing(String),

    /// A downstream service could not be reached or gave an unusable reply.
    #[error("Service {service} is unavailable")]
    Unavailable {
        service: String,
        #[source]
        source: MessagingError,
    },

    #[error("Internal error")]
    Internal(#[source] RepositoryError),
}

impl OrderError {
    pub fn validation(title: impl Into<String>, detail: impl Into<String>) -> Self {
        OrderError::Validation {
            title: title.into(),
            detail: detail.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field message to a [`OrderError::Validation`]; other variants
    /// are returned unchanged.
    pub fn with_field(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        if let OrderError::Validation { fields, .. } = &mut self {
            fields.insert(field.into(), message.into());
        }
        self
    }

    pub fn order_not_found(id: impl ToString) -> Self {
        OrderError::NotFound {
            entity: "Order",
            id: id.to_string(),
        }
    }
}

/// Convenience type alias for order results.
pub type Result<T> = std::result::Result<T, OrderError>;
