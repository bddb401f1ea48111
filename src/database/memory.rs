//! In-memory [`OrderStore`].
//!
//! Each order lives in its own DashMap shard entry; holding the entry guard
//! while checking and writing makes every state change atomic per order.

use super::OrderStore;
use crate::error::{DispatchError, Result};
use crate::models::{CourierRef, Order, OrderKey};
use crate::state_machine::{
    can_transition_dispatch, can_transition_lifecycle, DispatchState, LifecycleStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<OrderKey, Order>,
    unavailable: AtomicBool,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with a persistence error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DispatchError::persistence("order store unavailable"));
        }
        Ok(())
    }

    /// Compare-and-set into `DispatchPending` under the entry guard
    fn claim_from(&self, key: OrderKey, expected: DispatchState) -> Result<bool> {
        self.ensure_available()?;
        let Some(mut entry) = self.orders.get_mut(&key) else {
            return Ok(false);
        };
        if entry.dispatch_state != expected {
            return Ok(false);
        }
        entry.dispatch_state = DispatchState::DispatchPending;
        entry.updated_at = Utc::now();
        Ok(true)
    }

    fn transition_dispatch(
        &self,
        key: OrderKey,
        to: DispatchState,
        apply: impl FnOnce(&mut Order),
    ) -> Result<()> {
        self.ensure_available()?;
        let mut entry = self
            .orders
            .get_mut(&key)
            .ok_or(DispatchError::OrderNotFound(key))?;

        let from = entry.dispatch_state;
        if !can_transition_dispatch(from, to) {
            return Err(DispatchError::InvalidStateTransition {
                order_key: key,
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        entry.dispatch_state = to;
        apply(entry.value_mut());
        entry.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn upsert_order(&self, order: &Order) -> Result<Order> {
        self.ensure_available()?;
        let mut entry = self.orders.entry(order.key).or_insert_with(|| order.clone());

        let stored = entry.value_mut();
        stored.external_id = order.external_id.clone();
        stored.kind = order.kind;
        stored.declared_delivery_time = order.declared_delivery_time;
        if stored.lifecycle_status != order.lifecycle_status
            && can_transition_lifecycle(stored.lifecycle_status, order.lifecycle_status)
        {
            stored.lifecycle_status = order.lifecycle_status;
        }
        if stored.accepted_at.is_none() {
            stored.accepted_at = order.accepted_at;
        }
        stored.updated_at = Utc::now();

        Ok(stored.clone())
    }

    async fn get_order(&self, key: OrderKey) -> Result<Option<Order>> {
        self.ensure_available()?;
        Ok(self.orders.get(&key).map(|entry| entry.value().clone()))
    }

    async fn get_dispatch_state(&self, key: OrderKey) -> Result<Option<DispatchState>> {
        self.ensure_available()?;
        Ok(self.orders.get(&key).map(|entry| entry.dispatch_state))
    }

    async fn try_set_dispatch_pending(&self, key: OrderKey) -> Result<bool> {
        self.claim_from(key, DispatchState::NotDispatched)
    }

    async fn try_reclaim_failed(&self, key: OrderKey) -> Result<bool> {
        self.claim_from(key, DispatchState::DispatchFailed)
    }

    async fn set_dispatched(&self, key: OrderKey, courier_ref: &CourierRef) -> Result<()> {
        self.transition_dispatch(key, DispatchState::Dispatched, |order| {
            order.courier_ref = Some(courier_ref.clone());
        })
    }

    async fn set_tracking_url(&self, key: OrderKey, tracking_url: &str) -> Result<()> {
        self.ensure_available()?;
        let mut entry = self
            .orders
            .get_mut(&key)
            .ok_or(DispatchError::OrderNotFound(key))?;
        if let Some(courier_ref) = entry.courier_ref.as_mut() {
            courier_ref.tracking_url = Some(tracking_url.to_string());
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_dispatch_failed(&self, key: OrderKey) -> Result<()> {
        self.transition_dispatch(key, DispatchState::DispatchFailed, |_| {})
    }

    async fn reset_not_dispatched(&self, key: OrderKey) -> Result<()> {
        self.transition_dispatch(key, DispatchState::NotDispatched, |_| {})
    }

    async fn set_lifecycle_status(&self, key: OrderKey, status: LifecycleStatus) -> Result<bool> {
        self.ensure_available()?;
        let mut entry = self
            .orders
            .get_mut(&key)
            .ok_or(DispatchError::OrderNotFound(key))?;

        if !can_transition_lifecycle(entry.lifecycle_status, status) {
            return Ok(false);
        }
        entry.lifecycle_status = status;
        if status == LifecycleStatus::Accepted && entry.accepted_at.is_none() {
            entry.accepted_at = Some(Utc::now());
        }
        entry.updated_at = Utc::now();
        Ok(true)
    }

    async fn query_pending_dispatch_candidates(&self, limit: usize) -> Result<Vec<Order>> {
        self.ensure_available()?;
        let mut candidates: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| {
                entry.dispatch_state.is_claimed() && !entry.lifecycle_status.is_terminal()
            })
            .map(|entry| entry.value().clone())
            .collect();
        candidates.sort_by_key(|order| order.updated_at);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn query_recent_orders(&self, limit: usize) -> Result<Vec<Order>> {
        self.ensure_available()?;
        let mut orders: Vec<Order> = self.orders.iter().map(|e| e.value().clone()).collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders.truncate(limit);
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderKind;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_dispatch_pending_claim_succeeds_once() {
        let store = InMemoryOrderStore::new();
        let order = store
            .upsert_order(&Order::new("ext-1", OrderKind::Delivery))
            .await
            .unwrap();

        assert!(store.try_set_dispatch_pending(order.key).await.unwrap());
        assert!(!store.try_set_dispatch_pending(order.key).await.unwrap());
        assert_eq!(
            store.get_dispatch_state(order.key).await.unwrap(),
            Some(DispatchState::DispatchPending)
        );
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = store
            .upsert_order(&Order::new("ext-2", OrderKind::Delivery))
            .await
            .unwrap();

        let claims = (0..16).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.try_set_dispatch_pending(order.key).await.unwrap() })
        });
        let results = futures::future::join_all(claims).await;
        let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_failed_order_is_reclaimed_once() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = store
            .upsert_order(&Order::new("ext-7", OrderKind::Delivery))
            .await
            .unwrap();
        assert!(!store.try_reclaim_failed(order.key).await.unwrap());

        store.try_set_dispatch_pending(order.key).await.unwrap();
        store.set_dispatch_failed(order.key).await.unwrap();

        let claims = (0..8).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.try_reclaim_failed(order.key).await.unwrap() })
        });
        let results = futures::future::join_all(claims).await;
        let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(winners, 1);
        assert_eq!(
            store.get_dispatch_state(order.key).await.unwrap(),
            Some(DispatchState::DispatchPending)
        );
        // a failed order is never released straight to not_dispatched
        store.set_dispatch_failed(order.key).await.unwrap();
        assert!(matches!(
            store.reset_not_dispatched(order.key).await,
            Err(DispatchError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_upsert_preserves_dispatch_state() {
        let store = InMemoryOrderStore::new();
        let order = store
            .upsert_order(&Order::new("ext-3", OrderKind::Delivery))
            .await
            .unwrap();
        store.try_set_dispatch_pending(order.key).await.unwrap();
        store
            .set_dispatched(order.key, &CourierRef::new("c-1", None))
            .await
            .unwrap();

        let mut refreshed = order.clone();
        refreshed.declared_delivery_time = Some(Utc::now());
        let stored = store.upsert_order(&refreshed).await.unwrap();

        assert_eq!(stored.dispatch_state, DispatchState::Dispatched);
        assert_eq!(stored.courier_ref.unwrap().external_id, "c-1");
        assert!(stored.declared_delivery_time.is_some());
    }

    #[tokio::test]
    async fn test_set_dispatched_requires_pending_claim() {
        let store = InMemoryOrderStore::new();
        let order = store
            .upsert_order(&Order::new("ext-4", OrderKind::Delivery))
            .await
            .unwrap();

        let result = store
            .set_dispatched(order.key, &CourierRef::new("c-2", None))
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_write_is_idempotent() {
        let store = InMemoryOrderStore::new();
        let order = store
            .upsert_order(&Order::new("ext-5", OrderKind::Delivery))
            .await
            .unwrap();

        assert!(store
            .set_lifecycle_status(order.key, LifecycleStatus::Cancelled)
            .await
            .unwrap());
        assert!(!store
            .set_lifecycle_status(order.key, LifecycleStatus::Cancelled)
            .await
            .unwrap());
        assert!(!store
            .set_lifecycle_status(order.key, LifecycleStatus::Delivered)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_accepting_sets_accepted_at_once() {
        let store = InMemoryOrderStore::new();
        let order = store
            .upsert_order(&Order::new("ext-6", OrderKind::Delivery))
            .await
            .unwrap();

        store
            .set_lifecycle_status(order.key, LifecycleStatus::Accepted)
            .await
            .unwrap();
        let accepted_at = store.get_order(order.key).await.unwrap().unwrap().accepted_at;
        assert!(accepted_at.is_some());

        store
            .set_lifecycle_status(order.key, LifecycleStatus::Preparing)
            .await
            .unwrap();
        let after = store.get_order(order.key).await.unwrap().unwrap().accepted_at;
        assert_eq!(accepted_at, after);
    }

    #[tokio::test]
    async fn test_candidates_exclude_terminal_and_undispatched() {
        let store = InMemoryOrderStore::new();
        let dispatched = store
            .upsert_order(&Order::new("a", OrderKind::Delivery))
            .await
            .unwrap();
        let delivered = store
            .upsert_order(&Order::new("b", OrderKind::Delivery))
            .await
            .unwrap();
        store
            .upsert_order(&Order::new("c", OrderKind::Delivery))
            .await
            .unwrap();

        for key in [dispatched.key, delivered.key] {
            store.try_set_dispatch_pending(key).await.unwrap();
            store
                .set_dispatched(key, &CourierRef::new(format!("c-{key}"), None))
                .await
                .unwrap();
        }
        store
            .set_lifecycle_status(delivered.key, LifecycleStatus::Delivered)
            .await
            .unwrap();

        let candidates = store.query_pending_dispatch_candidates(10).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].key, dispatched.key);
    }

    #[tokio::test]
    async fn test_unavailable_store_reports_persistence_errors() {
        let store = InMemoryOrderStore::new();
        store.set_unavailable(true);
        let err = store.query_recent_orders(5).await.unwrap_err();
        assert!(err.is_persistence());
    }
}
