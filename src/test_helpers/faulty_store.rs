//! # Faulty Order Store
//!
//! Wraps an [`InMemoryOrderStore`] and injects the two things an in-process
//! map never does on its own: latency on reads, so concurrent triggers really
//! interleave between their read and their claim, and failures on the
//! writes that record a courier outcome.

use crate::database::{InMemoryOrderStore, OrderStore};
use crate::error::{DispatchError, Result};
use crate::models::{CourierRef, Order, OrderKey};
use crate::state_machine::{DispatchState, LifecycleStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct FaultyOrderStore {
    inner: Arc<InMemoryOrderStore>,
    read_latency: Mutex<Option<Duration>>,
    failing_outcome_writes: AtomicUsize,
}

impl FaultyOrderStore {
    pub fn new(inner: Arc<InMemoryOrderStore>) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &Arc<InMemoryOrderStore> {
        &self.inner
    }

    /// Every `get_order` sleeps this long after reading, like a round trip
    pub fn set_read_latency(&self, latency: Duration) {
        *self.read_latency.lock() = Some(latency);
    }

    /// Fail the next `count` calls to `set_dispatched` or `reset_not_dispatched`
    pub fn fail_outcome_writes(&self, count: usize) {
        self.failing_outcome_writes.store(count, Ordering::SeqCst);
    }

    fn take_outcome_failure(&self) -> Result<()> {
        let failed = self
            .failing_outcome_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DispatchError::persistence("injected outcome write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for FaultyOrderStore {
    async fn upsert_order(&self, order: &Order) -> Result<Order> {
        self.inner.upsert_order(order).await
    }

    async fn get_order(&self, key: OrderKey) -> Result<Option<Order>> {
        let order = self.inner.get_order(key).await?;
        let latency = *self.read_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(order)
    }

    async fn get_dispatch_state(&self, key: OrderKey) -> Result<Option<DispatchState>> {
        self.inner.get_dispatch_state(key).await
    }

    async fn try_set_dispatch_pending(&self, key: OrderKey) -> Result<bool> {
        self.inner.try_set_dispatch_pending(key).await
    }

    async fn try_reclaim_failed(&self, key: OrderKey) -> Result<bool> {
        self.inner.try_reclaim_failed(key).await
    }

    async fn set_dispatched(&self, key: OrderKey, courier_ref: &CourierRef) -> Result<()> {
        self.take_outcome_failure()?;
        self.inner.set_dispatched(key, courier_ref).await
    }

    async fn set_tracking_url(&self, key: OrderKey, tracking_url: &str) -> Result<()> {
        self.inner.set_tracking_url(key, tracking_url).await
    }

    async fn set_dispatch_failed(&self, key: OrderKey) -> Result<()> {
        self.inner.set_dispatch_failed(key).await
    }

    async fn reset_not_dispatched(&self, key: OrderKey) -> Result<()> {
        self.take_outcome_failure()?;
        self.inner.reset_not_dispatched(key).await
    }

    async fn set_lifecycle_status(&self, key: OrderKey, status: LifecycleStatus) -> Result<bool> {
        self.inner.set_lifecycle_status(key, status).await
    }

    async fn query_pending_dispatch_candidates(&self, limit: usize) -> Result<Vec<Order>> {
        self.inner.query_pending_dispatch_candidates(limit).await
    }

    async fn query_recent_orders(&self, limit: usize) -> Result<Vec<Order>> {
        self.inner.query_recent_orders(limit).await
    }
}
