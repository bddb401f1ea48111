//! # Order Model
//!
//! Persisted order as seen by the dispatch core.
//!
//! ## Overview
//!
//! An `Order` is created when the order source delivers it and is owned by the
//! [`OrderStore`](crate::database::OrderStore). Everything else in the crate
//! works with copies read back from the store; the store's copy is the only
//! one whose `dispatch_state` may be trusted.
//!
//! ## Identity
//!
//! - `key`: stable internal key. Timers, store lookups and logs use it.
//! - `external_id`: identifier handed out by the order source. It may be
//!   reused or malformed across tenants, so it never keys in-memory state.
//!
//! ## Delivery time
//!
//! `declared_delivery_time` is already normalized by the ingestion boundary;
//! heterogeneous payload fields are resolved before an `Order` is built.

use super::courier::CourierRef;
use crate::state_machine::{DispatchState, LifecycleStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable internal order key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderKey(Uuid);

impl OrderKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OrderKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fulfillment kind; only deliveries are handed to the courier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Pickup,
    Delivery,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pickup => write!(f, "pickup"),
            Self::Delivery => write!(f, "delivery"),
        }
    }
}

impl std::str::FromStr for OrderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pickup" => Ok(Self::Pickup),
            "delivery" => Ok(Self::Delivery),
            _ => Err(format!("Invalid order kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub key: OrderKey,
    pub external_id: String,
    pub kind: OrderKind,
    pub lifecycle_status: LifecycleStatus,
    pub declared_delivery_time: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub dispatch_state: DispatchState,
    pub courier_ref: Option<CourierRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// New order as it arrives from the order source
    pub fn new(external_id: impl Into<String>, kind: OrderKind) -> Self {
        let now = Utc::now();
        Self {
            key: OrderKey::new(),
            external_id: external_id.into(),
            kind,
            lifecycle_status: LifecycleStatus::Pending,
            declared_delivery_time: None,
            accepted_at: None,
            dispatch_state: DispatchState::NotDispatched,
            courier_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_delivery_time(mut self, delivery_time: DateTime<Utc>) -> Self {
        self.declared_delivery_time = Some(delivery_time);
        self
    }

    pub fn is_delivery(&self) -> bool {
        self.kind == OrderKind::Delivery
    }

    /// Delivery order that has not reached a terminal lifecycle status
    pub fn is_dispatch_eligible(&self) -> bool {
        self.is_delivery() && !self.lifecycle_status.is_terminal()
    }

    /// Eligible and nothing has been claimed or failed yet
    pub fn awaits_dispatch(&self) -> bool {
        self.is_dispatch_eligible() && self.dispatch_state.is_dispatchable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_order_defaults() {
        let order = Order::new("ext-1", OrderKind::Delivery);
        assert_eq!(order.lifecycle_status, LifecycleStatus::Pending);
        assert_eq!(order.dispatch_state, DispatchState::NotDispatched);
        assert!(order.courier_ref.is_none());
        assert!(order.awaits_dispatch());
    }

    #[test]
    fn test_pickup_orders_never_await_dispatch() {
        let order = Order::new("ext-2", OrderKind::Pickup);
        assert!(!order.is_dispatch_eligible());
        assert!(!order.awaits_dispatch());
    }

    #[test]
    fn test_terminal_orders_are_not_eligible() {
        let mut order = Order::new("ext-3", OrderKind::Delivery);
        order.lifecycle_status = LifecycleStatus::Cancelled;
        assert!(!order.is_dispatch_eligible());

        order.lifecycle_status = LifecycleStatus::Accepted;
        order.dispatch_state = DispatchState::Dispatched;
        assert!(order.is_dispatch_eligible());
        assert!(!order.awaits_dispatch());
    }

    #[test]
    fn test_order_keys_are_unique() {
        assert_ne!(OrderKey::new(), OrderKey::new());
    }
}
