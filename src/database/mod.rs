//! # Order Persistence
//!
//! The [`OrderStore`] is the authoritative home of every order's
//! `dispatch_state`. The dispatch core never trusts a cached copy when it
//! matters: the coordinator re-reads through the store and claims the order
//! with [`OrderStore::try_set_dispatch_pending`], a compare-and-set that
//! succeeds for exactly one caller.
//!
//! Implementations:
//! - [`InMemoryOrderStore`]: DashMap-backed, used in tests and single-node setups
//! - `PgOrderStore` (feature `postgres`): conditional `UPDATE`s against Postgres

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::error::Result;
use crate::models::{CourierRef, Order, OrderKey};
use crate::state_machine::{DispatchState, LifecycleStatus};
use async_trait::async_trait;

pub use memory::InMemoryOrderStore;
#[cfg(feature = "postgres")]
pub use postgres::PgOrderStore;

#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    /// Insert a new order or refresh source-owned fields of an existing one.
    ///
    /// Never overwrites `dispatch_state`, `courier_ref` or an already-set
    /// `accepted_at`.
    async fn upsert_order(&self, order: &Order) -> Result<Order>;

    async fn get_order(&self, key: OrderKey) -> Result<Option<Order>>;

    async fn get_dispatch_state(&self, key: OrderKey) -> Result<Option<DispatchState>>;

    /// Atomically move `NotDispatched` to `DispatchPending`.
    ///
    /// Returns `false` when the order is missing or in any other state.
    async fn try_set_dispatch_pending(&self, key: OrderKey) -> Result<bool>;

    /// `DispatchPending` to `Dispatched`, recording the courier reference
    async fn set_dispatched(&self, key: OrderKey, courier_ref: &CourierRef) -> Result<()>;

    /// Backfill a tracking URL on an already dispatched order
    async fn set_tracking_url(&self, key: OrderKey, tracking_url: &str) -> Result<()>;

    /// `DispatchPending` to `DispatchFailed`
    async fn set_dispatch_failed(&self, key: OrderKey) -> Result<()>;

    /// Atomically move `DispatchFailed` to `DispatchPending` for a manual retry.
    ///
    /// Returns `false` when the order is missing or no longer failed, so two
    /// concurrent retries cannot both reach the courier.
    async fn try_reclaim_failed(&self, key: OrderKey) -> Result<bool>;

    /// `DispatchPending` back to `NotDispatched`
    async fn reset_not_dispatched(&self, key: OrderKey) -> Result<()>;

    /// Apply a lifecycle transition if the guard allows it.
    ///
    /// Returns `true` only when the stored status actually changed, so
    /// repeating the same write is a no-op.
    async fn set_lifecycle_status(&self, key: OrderKey, status: LifecycleStatus) -> Result<bool>;

    /// Dispatched or dispatch-pending orders that are not yet terminal
    async fn query_pending_dispatch_candidates(&self, limit: usize) -> Result<Vec<Order>>;

    /// Most recently created orders, newest first
    async fn query_recent_orders(&self, limit: usize) -> Result<Vec<Order>>;
}
