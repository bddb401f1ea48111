//! Error types for the dispatch core.

use crate::models::OrderKey;
use thiserror::Error;

/// Errors reported by a [`CourierClient`](crate::courier::CourierClient).
///
/// The variants mirror how the coordinator reacts: transient failures are
/// reverted for a later retry, duplicates are treated as success, permanent
/// failures stop automatic retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CourierError {
    /// Timeouts, 5xx responses, rate limiting
    #[error("Transient courier error: {reason}")]
    Transient {
        reason: String,
        status_code: Option<u16>,
    },
    /// The courier already holds this order under its idempotency key
    #[error("Courier already has this order (existing reference: {existing_id:?})")]
    PermanentDuplicate { existing_id: Option<String> },
    /// Validation failure or order not eligible at the courier
    #[error("Permanent courier error: {reason}")]
    Permanent {
        reason: String,
        status_code: Option<u16>,
    },
    /// Lookup key unknown to the courier
    #[error("Courier has no record for '{courier_id}'")]
    NotFound { courier_id: String },
}

impl CourierError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            status_code: None,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent {
            reason: reason.into(),
            status_code: None,
        }
    }

    pub fn not_found(courier_id: impl Into<String>) -> Self {
        Self::NotFound {
            courier_id: courier_id.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Courier error: {0}")]
    Courier(#[from] CourierError),
    #[error("Scheduling error: {0}")]
    Scheduling(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Order {0} not found")]
    OrderNotFound(OrderKey),
    #[error("Invalid state transition for order {order_key}: {from} -> {to}")]
    InvalidStateTransition {
        order_key: OrderKey,
        from: String,
        to: String,
    },
}

impl DispatchError {
    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence(reason.into())
    }

    pub fn scheduling(reason: impl Into<String>) -> Self {
        Self::Scheduling(reason.into())
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        DispatchError::Persistence(err.to_string())
    }
}

impl From<crate::config::ConfigurationError> for DispatchError {
    fn from(err: crate::config::ConfigurationError) -> Self {
        DispatchError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
