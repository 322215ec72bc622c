//! Order status state machine.

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// The status of an order in its lifecycle.
///
/// On the wire a status is its ordinal, starting at 1 for `Pending`.
///
/// ```text
/// Pending ──► Confirmed ──► Processing ──► Shipped ══► OutForDelivery ══► Delivered ──► Completed
///    │            │             │             ║              ║                │
///    ├──► Failed  └─────────────┴──► Canceled ╚══► Returned ◄╝                └──► Refunded
///    └──► Canceled
/// ```
///
/// Transitions drawn with `═` are only allowed for a privileged
/// (delivery) actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum OrderStatus {
    /// Created but not yet paid for.
    #[default]
    Pending = 1,
    /// Payment succeeded.
    Confirmed = 2,
    /// Being prepared.
    Processing = 3,
    /// Handed over to the courier.
    Shipped = 4,
    /// On its way to the customer.
    OutForDelivery = 5,
    /// Received by the customer.
    Delivered = 6,
    /// Money returned to the customer (terminal).
    Refunded = 7,
    /// Sent back by the customer (terminal).
    Returned = 8,
    /// Payment or processing failed (terminal).
    Failed = 9,
    /// Canceled by the customer or the system (terminal).
    Canceled = 10,
    /// Fully processed and closed (terminal).
    Completed = 11,
}

impl OrderStatus {
    /// Every status in ordinal order.
    pub const ALL: [OrderStatus; 11] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::Refunded,
        OrderStatus::Returned,
        OrderStatus::Failed,
        OrderStatus::Canceled,
        OrderStatus::Completed,
    ];

    /// Wire ordinal of the status.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Statuses reachable from this one in a single step.
    ///
    /// Leaving `Shipped` or `OutForDelivery` needs a privileged actor; for
    /// anyone else those statuses have no outgoing transitions.
    pub fn allowed_transitions(&self, privileged: bool) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Canceled, Failed],
            Confirmed => &[Processing, Canceled],
            Processing => &[Shipped, Canceled],
            Shipped if privileged => &[OutForDelivery, Returned],
            OutForDelivery if privileged => &[Delivered, Returned],
            Shipped | OutForDelivery => &[],
            Delivered => &[Refunded, Completed],
            Refunded | Returned | Failed | Canceled | Completed => &[],
        }
    }

    /// Returns true if the order may move from this status to `next`.
    ///
    /// Staying in the same status is not a transition and returns false;
    /// callers treat it as a no-op.
    pub fn can_transition_to(&self, next: OrderStatus, privileged: bool) -> bool {
        self.allowed_transitions(privileged).contains(&next)
    }

    /// Returns true if leaving this status needs a privileged actor.
    pub fn requires_privilege(&self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::OutForDelivery)
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Refunded
                | OrderStatus::Returned
                | OrderStatus::Failed
                | OrderStatus::Canceled
                | OrderStatus::Completed
        )
    }

    /// Returns true if the owner may still edit the order.
    pub fn is_editable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Processing => "Processing",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::OutForDelivery => "OutForDelivery",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Refunded => "Refunded",
            OrderStatus::Returned => "Returned",
            OrderStatus::Failed => "Failed",
            OrderStatus::Canceled => "Canceled",
            OrderStatus::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<u8> for OrderStatus {
    type Error = DomainError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        OrderStatus::ALL
            .get(usize::from(code).wrapping_sub(1))
            .copied()
            .ok_or(DomainError::UnknownOrderStatus(code))
    }
}

impl From<OrderStatus> for u8 {
    fn from(status: OrderStatus) -> Self {
        status.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    /// The full table, spelled out pair by pair.
    fn expected(from: OrderStatus, to: OrderStatus, privileged: bool) -> bool {
        matches!(
            (from, to, privileged),
            (Pending, Confirmed | Canceled | Failed, _)
                | (Confirmed, Processing | Canceled, _)
                | (Processing, Shipped | Canceled, _)
                | (Shipped, OutForDelivery | Returned, true)
                | (OutForDelivery, Delivered | Returned, true)
                | (Delivered, Refunded | Completed, _)
        )
    }

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), Pending);
    }

    #[test]
    fn test_exhaustive_transition_matrix() {
        for privileged in [false, true] {
            for from in OrderStatus::ALL {
                for to in OrderStatus::ALL {
                    assert_eq!(
                        from.can_transition_to(to, privileged),
                        expected(from, to, privileged),
                        "{from} -> {to} (privileged: {privileged})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_same_status_is_not_a_transition() {
        for status in OrderStatus::ALL {
            assert!(!status.can_transition_to(status, true));
        }
    }

    #[test]
    fn test_delivery_transitions_need_privilege() {
        assert!(!Shipped.can_transition_to(OutForDelivery, false));
        assert!(Shipped.can_transition_to(OutForDelivery, true));
        assert!(!OutForDelivery.can_transition_to(Delivered, false));
        assert!(OutForDelivery.can_transition_to(Returned, true));
        assert!(Shipped.requires_privilege());
        assert!(!Delivered.requires_privilege());
    }

    #[test]
    fn test_terminal_statuses_have_no_transitions() {
        for status in OrderStatus::ALL {
            if status.is_terminal() {
                assert!(status.allowed_transitions(true).is_empty());
            }
        }
        assert!(!Delivered.is_terminal());
        assert!(Completed.is_terminal());
    }

    #[test]
    fn test_editable_statuses() {
        let editable: Vec<_> = OrderStatus::ALL
            .into_iter()
            .filter(OrderStatus::is_editable)
            .collect();
        assert_eq!(editable, vec![Pending, Processing]);
    }

    #[test]
    fn test_wire_ordinals() {
        assert_eq!(Pending.code(), 1);
        assert_eq!(Confirmed.code(), 2);
        assert_eq!(Returned.code(), 8);
        assert_eq!(Completed.code(), 11);
        for (index, status) in OrderStatus::ALL.iter().enumerate() {
            assert_eq!(usize::from(status.code()), index + 1);
        }
    }

    #[test]
    fn test_try_from_rejects_out_of_range() {
        assert_eq!(OrderStatus::try_from(5), Ok(OutForDelivery));
        assert_eq!(
            OrderStatus::try_from(0),
            Err(DomainError::UnknownOrderStatus(0))
        );
        assert_eq!(
            OrderStatus::try_from(12),
            Err(DomainError::UnknownOrderStatus(12))
        );
    }

    #[test]
    fn test_serializes_as_ordinal() {
        assert_eq!(serde_json::to_string(&Confirmed).unwrap(), "2");
        let status: OrderStatus = serde_json::from_str("8").unwrap();
        assert_eq!(status, Returned);
        assert!(serde_json::from_str::<OrderStatus>("42").is_err());
        assert!(serde_json::from_str::<OrderStatus>("\"Pending\"").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(OutForDelivery.to_string(), "OutForDelivery");
        assert_eq!(Canceled.to_string(), "Canceled");
    }
}
