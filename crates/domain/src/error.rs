//! Domain error types.

use thiserror::Error;

/// Errors raised while decoding or constructing domain values.
#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    /// Status ordinal outside `1..=11`.
    #[error("Unknown order status code: {0}")]
    UnknownOrderStatus(u8),

    /// Payment status ordinal outside `1..=3`.
    #[error("Unknown payment status code: {0}")]
    UnknownPaymentStatus(u8),

    /// Amount that is not a finite number or does not fit in cents.
    #[error("Invalid money amount: {0}")]
    InvalidAmount(f64),
}
