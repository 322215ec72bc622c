//! Catalog error types.

use messaging::MessagingError;
use thiserror::Error;

use crate::inventory::VariantKey;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Price total overflows at {0}")]
    Overflow(VariantKey),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for catalog results.
pub type Result<T> = std::result::Result<T, CatalogError>;
