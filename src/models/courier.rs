//! Courier-side values recorded against an order.

use serde::{Deserialize, Serialize};

/// Reference to the courier's copy of an order, set once dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierRef {
    pub external_id: String,
    pub tracking_url: Option<String>,
}

impl CourierRef {
    pub fn new(external_id: impl Into<String>, tracking_url: Option<String>) -> Self {
        Self {
            external_id: external_id.into(),
            tracking_url,
        }
    }
}

/// Courier response to a successful create call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub external_id: String,
    pub tracking_url: Option<String>,
}

impl From<DispatchReceipt> for CourierRef {
    fn from(receipt: DispatchReceipt) -> Self {
        Self {
            external_id: receipt.external_id,
            tracking_url: receipt.tracking_url,
        }
    }
}

/// Courier-side status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierStatus {
    /// Courier's identifier for the delivery, when the lookup reveals it
    pub external_id: Option<String>,
    /// Raw status string as reported by the courier
    pub status: String,
    pub tracking_url: Option<String>,
}
