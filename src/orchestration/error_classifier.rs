//! # Courier Error Classification
//!
//! Maps courier failures onto a category and the action the coordinator
//! takes for the order.
//!
//! ```text
//! ┌──────────────┐     ┌────────────────────────┐     ┌─────────────────────┐
//! │ CourierError │────▶│ CourierErrorClassifier │────▶│ ErrorClassification │
//! │              │     │                        │     │ (category + action) │
//! └──────────────┘     └────────────────────────┘     └─────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use dispatch_core::error::CourierError;
//! use dispatch_core::orchestration::error_classifier::{
//!     CourierErrorClassifier, DispatchFailureAction, ErrorCategory,
//! };
//!
//! let classifier = CourierErrorClassifier::new();
//! let error = CourierError::Transient {
//!     reason: "too many requests".to_string(),
//!     status_code: Some(429),
//! };
//!
//! let classification = classifier.classify(&error);
//! assert_eq!(classification.category, ErrorCategory::RateLimit);
//! assert_eq!(classification.action, DispatchFailureAction::RetryLater);
//! ```

use crate::error::CourierError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Primary error categories for courier failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Will never succeed if retried
    Permanent,

    /// May succeed on retry
    Transient,

    /// Courier did not answer in time
    Timeout,

    /// Courier is throttling us
    RateLimit,

    /// Connection-level failure before a response
    Network,

    /// Courier already holds the order
    Duplicate,

    /// Courier has no record of the order
    NotFound,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Permanent => write!(f, "Permanent"),
            ErrorCategory::Transient => write!(f, "Transient"),
            ErrorCategory::Timeout => write!(f, "Timeout"),
            ErrorCategory::RateLimit => write!(f, "Rate Limit"),
            ErrorCategory::Network => write!(f, "Network"),
            ErrorCategory::Duplicate => write!(f, "Duplicate"),
            ErrorCategory::NotFound => write!(f, "Not Found"),
        }
    }
}

/// What the coordinator does with the order after a failed create call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchFailureAction {
    /// Release the claim; a later trigger may try again
    RetryLater,
    /// Park the order in `dispatch_failed` for an operator
    MarkFailed,
    /// Recover the courier's existing reference and record success
    TreatAsDispatched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub action: DispatchFailureAction,
    /// Suggested wait before the next automatic attempt
    pub retry_delay: Option<Duration>,
    pub error_code: String,
    pub message: String,
}

impl ErrorClassification {
    pub fn is_retryable(&self) -> bool {
        self.action == DispatchFailureAction::RetryLater
    }
}

#[derive(Debug, Clone)]
pub struct ErrorClassifierConfig {
    /// Delay suggested for plain transient failures
    pub transient_delay: Duration,
    pub timeout_delay: Duration,
    pub rate_limit_delay: Duration,
    pub network_error_delay: Duration,
}

impl Default for ErrorClassifierConfig {
    fn default() -> Self {
        Self {
            transient_delay: Duration::from_secs(30),
            timeout_delay: Duration::from_secs(30),
            rate_limit_delay: Duration::from_secs(60),
            network_error_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CourierErrorClassifier {
    config: ErrorClassifierConfig,
}

impl CourierErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ErrorClassifierConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, error: &CourierError) -> ErrorClassification {
        match error {
            CourierError::Transient {
                reason,
                status_code,
            } => self.classify_transient(reason, *status_code),
            CourierError::PermanentDuplicate { existing_id } => ErrorClassification {
                category: ErrorCategory::Duplicate,
                action: DispatchFailureAction::TreatAsDispatched,
                retry_delay: None,
                error_code: "COURIER_DUPLICATE".to_string(),
                message: match existing_id {
                    Some(id) => format!("Courier already holds the order as '{id}'"),
                    None => "Courier already holds the order".to_string(),
                },
            },
            CourierError::Permanent {
                reason,
                status_code,
            } => ErrorClassification {
                category: ErrorCategory::Permanent,
                action: DispatchFailureAction::MarkFailed,
                retry_delay: None,
                error_code: status_code
                    .map(|code| format!("COURIER_REJECTED_{code}"))
                    .unwrap_or_else(|| "COURIER_REJECTED".to_string()),
                message: reason.clone(),
            },
            // A create call answered with "not found" will not improve on retry
            CourierError::NotFound { courier_id } => ErrorClassification {
                category: ErrorCategory::NotFound,
                action: DispatchFailureAction::MarkFailed,
                retry_delay: None,
                error_code: "COURIER_NOT_FOUND".to_string(),
                message: format!("Courier has no record for '{courier_id}'"),
            },
        }
    }

    fn classify_transient(&self, reason: &str, status_code: Option<u16>) -> ErrorClassification {
        let lowered = reason.to_lowercase();
        let (category, retry_delay, error_code) = match status_code {
            Some(429) => (
                ErrorCategory::RateLimit,
                self.config.rate_limit_delay,
                "COURIER_RATE_LIMITED",
            ),
            Some(408) | Some(504) => (
                ErrorCategory::Timeout,
                self.config.timeout_delay,
                "COURIER_TIMEOUT",
            ),
            Some(_) => (
                ErrorCategory::Transient,
                self.config.transient_delay,
                "COURIER_UNAVAILABLE",
            ),
            None if lowered.contains("timeout") || lowered.contains("timed out") => (
                ErrorCategory::Timeout,
                self.config.timeout_delay,
                "COURIER_TIMEOUT",
            ),
            None if lowered.contains("connection") || lowered.contains("network") => (
                ErrorCategory::Network,
                self.config.network_error_delay,
                "COURIER_NETWORK_ERROR",
            ),
            None => (
                ErrorCategory::Transient,
                self.config.transient_delay,
                "COURIER_TRANSIENT",
            ),
        };

        ErrorClassification {
            category,
            action: DispatchFailureAction::RetryLater,
            retry_delay: Some(retry_delay),
            error_code: error_code.to_string(),
            message: reason.to_string(),
        }
    }
}
