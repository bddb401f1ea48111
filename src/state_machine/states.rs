use serde::{Deserialize, Serialize};
use std::fmt;

/// Order lifecycle as reported by the order source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    /// Order received, not yet accepted by the merchant
    Pending,
    /// Merchant accepted the order
    Accepted,
    /// Kitchen is working on the order
    Preparing,
    /// Order is packed and waiting for the courier
    ReadyForPickup,
    /// Courier picked the order up
    OutForDelivery,
    /// Order reached the customer
    Delivered,
    /// Order was cancelled by any party
    Cancelled,
}

impl LifecycleStatus {
    /// Check if this is a terminal status (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Position in the forward progression; cancellation sits outside it
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Accepted => 1,
            Self::Preparing => 2,
            Self::ReadyForPickup => 3,
            Self::OutForDelivery => 4,
            Self::Delivered => 5,
            Self::Cancelled => u8::MAX,
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Preparing => write!(f, "preparing"),
            Self::ReadyForPickup => write!(f, "ready_for_pickup"),
            Self::OutForDelivery => write!(f, "out_for_delivery"),
            Self::Delivered => write!(f, "delivered"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for LifecycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "preparing" => Ok(Self::Preparing),
            "ready_for_pickup" => Ok(Self::ReadyForPickup),
            "out_for_delivery" => Ok(Self::OutForDelivery),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid lifecycle status: {s}")),
        }
    }
}

impl Default for LifecycleStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Dispatch progress of an order; the single source of truth for idempotency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// No courier call has succeeded (or one is allowed to be retried)
    NotDispatched,
    /// A dispatch attempt claimed the order and is talking to the courier
    DispatchPending,
    /// The courier accepted the order
    Dispatched,
    /// The courier rejected the order permanently
    DispatchFailed,
}

impl DispatchState {
    /// Whether a courier call has been claimed or completed for this order
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::DispatchPending | Self::Dispatched)
    }

    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::NotDispatched)
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotDispatched => write!(f, "not_dispatched"),
            Self::DispatchPending => write!(f, "dispatch_pending"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::DispatchFailed => write!(f, "dispatch_failed"),
        }
    }
}

impl std::str::FromStr for DispatchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_dispatched" => Ok(Self::NotDispatched),
            "dispatch_pending" => Ok(Self::DispatchPending),
            "dispatched" => Ok(Self::Dispatched),
            "dispatch_failed" => Ok(Self::DispatchFailed),
            _ => Err(format!("Invalid dispatch state: {s}")),
        }
    }
}

impl Default for DispatchState {
    fn default() -> Self {
        Self::NotDispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_terminal_check() {
        assert!(LifecycleStatus::Delivered.is_terminal());
        assert!(LifecycleStatus::Cancelled.is_terminal());
        assert!(!LifecycleStatus::Pending.is_terminal());
        assert!(!LifecycleStatus::Accepted.is_terminal());
        assert!(!LifecycleStatus::OutForDelivery.is_terminal());
    }

    #[test]
    fn test_dispatch_state_claims() {
        assert!(DispatchState::Dispatched.is_claimed());
        assert!(DispatchState::DispatchPending.is_claimed());
        assert!(!DispatchState::NotDispatched.is_claimed());
        assert!(!DispatchState::DispatchFailed.is_claimed());
        assert!(DispatchState::NotDispatched.is_dispatchable());
        assert!(!DispatchState::DispatchFailed.is_dispatchable());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(LifecycleStatus::ReadyForPickup.to_string(), "ready_for_pickup");
        assert_eq!(
            "cancelled".parse::<LifecycleStatus>().unwrap(),
            LifecycleStatus::Cancelled
        );
        assert_eq!(DispatchState::DispatchPending.to_string(), "dispatch_pending");
        assert_eq!(
            "dispatch_failed".parse::<DispatchState>().unwrap(),
            DispatchState::DispatchFailed
        );
        assert!("shipped".parse::<DispatchState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&DispatchState::NotDispatched).unwrap();
        assert_eq!(json, "\"not_dispatched\"");

        let status: LifecycleStatus = serde_json::from_str("\"out_for_delivery\"").unwrap();
        assert_eq!(status, LifecycleStatus::OutForDelivery);
    }
}
