//! # Orchestration Types
//!
//! Shared vocabulary of the dispatch core: what started an attempt, what the
//! trigger calculator decided, which timers exist per order and how an
//! attempt ended.

use crate::models::{CourierRef, OrderKey};
use crate::orchestration::error_classifier::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The path that initiated a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTrigger {
    /// Dispatched at ingestion or restore because no wait was possible
    Immediate,
    /// Delivery-time job fired
    Scheduled,
    /// Post-acceptance fallback job fired
    PostAcceptance,
    /// Operator or merchant action
    Manual,
    /// Follow-up after a transient courier or store failure
    Retry,
}

impl DispatchTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Scheduled => "scheduled",
            Self::PostAcceptance => "post_acceptance",
            Self::Manual => "manual",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for DispatchTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of timers the registry keeps per order. At most one of each is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DeliveryTimeTrigger,
    PostAcceptanceTrigger,
    DispatchRetry,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::DeliveryTimeTrigger,
        JobKind::PostAcceptanceTrigger,
        JobKind::DispatchRetry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeliveryTimeTrigger => "delivery_time",
            Self::PostAcceptanceTrigger => "post_acceptance",
            Self::DispatchRetry => "dispatch_retry",
        }
    }

    /// Trigger reported to the coordinator when a job of this kind fires
    pub fn trigger(&self) -> DispatchTrigger {
        match self {
            Self::DeliveryTimeTrigger => DispatchTrigger::Scheduled,
            Self::PostAcceptanceTrigger => DispatchTrigger::PostAcceptance,
            Self::DispatchRetry => DispatchTrigger::Retry,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the calculator chose to dispatch right away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImmediateReason {
    NoDeliveryTime,
    ScheduledTimePassed,
    TooSoon,
}

impl fmt::Display for ImmediateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoDeliveryTime => "no_delivery_time",
            Self::ScheduledTimePassed => "scheduled_time_passed",
            Self::TooSoon => "too_soon",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerDecision {
    Immediate { reason: ImmediateReason },
    ScheduledAt(DateTime<Utc>),
}

impl TriggerDecision {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate { .. })
    }
}

/// Why an attempt stopped before calling the courier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    OrderNotFound,
    NotDelivery,
    LifecycleTerminal,
    /// Earlier attempt failed permanently and the trigger is automatic
    PreviouslyFailed,
    /// Post-acceptance fire found the order no longer in `accepted`
    NotAccepted,
    /// A concurrent attempt held the claim and released it without dispatching
    ClaimLost,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OrderNotFound => "order_not_found",
            Self::NotDelivery => "not_delivery",
            Self::LifecycleTerminal => "lifecycle_terminal",
            Self::PreviouslyFailed => "previously_failed",
            Self::NotAccepted => "not_accepted",
            Self::ClaimLost => "claim_lost",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// This attempt created the courier dispatch (or recovered a duplicate)
    Dispatched,
    /// Another attempt already owns or finished the dispatch
    AlreadyDispatched,
    Skipped(SkipReason),
    /// Courier failed retryably; order is back in `not_dispatched`
    TransientFailure,
    /// Courier rejected the order; order is in `dispatch_failed`
    PermanentFailure,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::AlreadyDispatched => "already_dispatched",
            Self::Skipped(_) => "skipped",
            Self::TransientFailure => "transient_failure",
            Self::PermanentFailure => "permanent_failure",
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped(reason) => write!(f, "skipped ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Result of one pass through the dispatch coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchAttemptResult {
    pub order_key: OrderKey,
    pub trigger: DispatchTrigger,
    pub outcome: DispatchOutcome,
    /// True when the order is dispatched after this attempt, by us or earlier
    pub success: bool,
    pub external_id: Option<String>,
    pub tracking_url: Option<String>,
    pub error_class: Option<ErrorCategory>,
}

impl DispatchAttemptResult {
    pub fn dispatched(order_key: OrderKey, trigger: DispatchTrigger, courier_ref: &CourierRef) -> Self {
        Self {
            order_key,
            trigger,
            outcome: DispatchOutcome::Dispatched,
            success: true,
            external_id: Some(courier_ref.external_id.clone()),
            tracking_url: courier_ref.tracking_url.clone(),
            error_class: None,
        }
    }

    pub fn already_dispatched(
        order_key: OrderKey,
        trigger: DispatchTrigger,
        courier_ref: Option<&CourierRef>,
    ) -> Self {
        Self {
            order_key,
            trigger,
            outcome: DispatchOutcome::AlreadyDispatched,
            success: true,
            external_id: courier_ref.map(|r| r.external_id.clone()),
            tracking_url: courier_ref.and_then(|r| r.tracking_url.clone()),
            error_class: None,
        }
    }

    pub fn skipped(order_key: OrderKey, trigger: DispatchTrigger, reason: SkipReason) -> Self {
        Self {
            order_key,
            trigger,
            outcome: DispatchOutcome::Skipped(reason),
            success: false,
            external_id: None,
            tracking_url: None,
            error_class: None,
        }
    }

    pub fn failed(
        order_key: OrderKey,
        trigger: DispatchTrigger,
        outcome: DispatchOutcome,
        category: ErrorCategory,
    ) -> Self {
        Self {
            order_key,
            trigger,
            outcome,
            success: false,
            external_id: None,
            tracking_url: None,
            error_class: Some(category),
        }
    }

    /// True only for the attempt that actually handed the order over
    pub fn created_dispatch(&self) -> bool {
        self.outcome == DispatchOutcome::Dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_maps_to_trigger() {
        assert_eq!(JobKind::DeliveryTimeTrigger.trigger(), DispatchTrigger::Scheduled);
        assert_eq!(
            JobKind::PostAcceptanceTrigger.trigger(),
            DispatchTrigger::PostAcceptance
        );
        assert_eq!(JobKind::DispatchRetry.trigger(), DispatchTrigger::Retry);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(DispatchOutcome::Dispatched.to_string(), "dispatched");
        assert_eq!(
            DispatchOutcome::Skipped(SkipReason::NotDelivery).to_string(),
            "skipped (not_delivery)"
        );
    }

    #[test]
    fn test_result_constructors() {
        let key = OrderKey::new();
        let courier_ref = CourierRef::new("c-1", Some("https://t/track/c-1".to_string()));

        let ok = DispatchAttemptResult::dispatched(key, DispatchTrigger::Scheduled, &courier_ref);
        assert!(ok.success);
        assert!(ok.created_dispatch());
        assert_eq!(ok.external_id.as_deref(), Some("c-1"));

        let noop = DispatchAttemptResult::already_dispatched(key, DispatchTrigger::Manual, None);
        assert!(noop.success);
        assert!(!noop.created_dispatch());

        let skipped =
            DispatchAttemptResult::skipped(key, DispatchTrigger::Immediate, SkipReason::NotDelivery);
        assert!(!skipped.success);
        assert_eq!(skipped.error_class, None);
    }

    #[test]
    fn test_trigger_serde() {
        let json = serde_json::to_string(&DispatchTrigger::PostAcceptance).unwrap();
        assert_eq!(json, "\"post_acceptance\"");
    }
}
