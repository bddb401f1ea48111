//! # Postgres Order Store
//!
//! [`OrderStore`] backed by a `dispatch_orders` table. Every dispatch state
//! change is a conditional `UPDATE ... WHERE dispatch_state = $expected`, so
//! concurrent processes racing on the same order resolve through the
//! database: exactly one claim succeeds.
//!
//! ## Expected Schema
//!
//! Schema management lives outside this crate; the store expects:
//!
//! ```sql
//! CREATE TABLE dispatch_orders (
//!   order_key UUID PRIMARY KEY,
//!   external_id TEXT NOT NULL,
//!   kind TEXT NOT NULL,
//!   lifecycle_status TEXT NOT NULL,
//!   declared_delivery_time TIMESTAMPTZ,
//!   accepted_at TIMESTAMPTZ,
//!   dispatch_state TEXT NOT NULL DEFAULT 'not_dispatched',
//!   courier_external_id TEXT,
//!   courier_tracking_url TEXT,
//!   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!   updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! CREATE INDEX dispatch_orders_pending_idx ON dispatch_orders (dispatch_state, lifecycle_status);
//! CREATE INDEX dispatch_orders_created_idx ON dispatch_orders (created_at DESC);
//! ```

use super::OrderStore;
use crate::config::DatabaseConfig;
use crate::error::{DispatchError, Result};
use crate::models::{CourierRef, Order, OrderKey, OrderKind};
use crate::state_machine::{can_transition_lifecycle, DispatchState, LifecycleStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

const ORDER_COLUMNS: &str = r#"
    order_key, external_id, kind, lifecycle_status, declared_delivery_time,
    accepted_at, dispatch_state, courier_external_id, courier_tracking_url,
    created_at, updated_at
"#;

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl std::fmt::Debug for PgOrderStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgOrderStore").finish_non_exhaustive()
    }
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the database section of the configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.database_url().ok_or_else(|| {
            DispatchError::Configuration(
                "database.url is not set and DATABASE_URL is missing".to_string(),
            )
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&url)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to connect order store");
                DispatchError::persistence(format!("Database connection failed: {e}"))
            })?;

        info!(
            max_connections = config.max_connections,
            "Order store connected"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Conditional dispatch state update; `true` when a row changed
    async fn transition_dispatch(
        &self,
        key: OrderKey,
        expected: &[DispatchState],
        to: DispatchState,
    ) -> Result<bool> {
        let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
        let result = sqlx::query(
            r#"
            UPDATE dispatch_orders
               SET dispatch_state = $2, updated_at = NOW()
             WHERE order_key = $1 AND dispatch_state = ANY($3)
            "#,
        )
        .bind(key.as_uuid())
        .bind(to.to_string())
        .bind(&expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn require_transition(
        &self,
        key: OrderKey,
        expected: &[DispatchState],
        to: DispatchState,
    ) -> Result<()> {
        if self.transition_dispatch(key, expected, to).await? {
            return Ok(());
        }
        let from = self
            .get_dispatch_state(key)
            .await?
            .ok_or(DispatchError::OrderNotFound(key))?;
        Err(DispatchError::InvalidStateTransition {
            order_key: key,
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    #[instrument(skip(self, order), fields(order_key = %order.key))]
    async fn upsert_order(&self, order: &Order) -> Result<Order> {
        let query = format!(
            r#"
            INSERT INTO dispatch_orders (
                order_key, external_id, kind, lifecycle_status, declared_delivery_time,
                accepted_at, dispatch_state, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'not_dispatched', $7, NOW())
            ON CONFLICT (order_key) DO UPDATE SET
                external_id = EXCLUDED.external_id,
                kind = EXCLUDED.kind,
                declared_delivery_time = EXCLUDED.declared_delivery_time,
                accepted_at = COALESCE(dispatch_orders.accepted_at, EXCLUDED.accepted_at),
                updated_at = NOW()
            RETURNING {ORDER_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(order.key.as_uuid())
            .bind(&order.external_id)
            .bind(order.kind.to_string())
            .bind(order.lifecycle_status.to_string())
            .bind(order.declared_delivery_time)
            .bind(order.accepted_at)
            .bind(order.created_at)
            .fetch_one(&self.pool)
            .await?;

        let stored = Order::try_from(row)?;
        if stored.lifecycle_status != order.lifecycle_status {
            self.set_lifecycle_status(order.key, order.lifecycle_status)
                .await?;
            return self
                .get_order(order.key)
                .await?
                .ok_or(DispatchError::OrderNotFound(order.key));
        }
        Ok(stored)
    }

    async fn get_order(&self, key: OrderKey) -> Result<Option<Order>> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM dispatch_orders WHERE order_key = $1");
        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(key.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn get_dispatch_state(&self, key: OrderKey) -> Result<Option<DispatchState>> {
        let state: Option<String> = sqlx::query_scalar(
            "SELECT dispatch_state FROM dispatch_orders WHERE order_key = $1",
        )
        .bind(key.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        state
            .map(|s| s.parse::<DispatchState>().map_err(DispatchError::Persistence))
            .transpose()
    }

    #[instrument(skip(self), fields(order_key = %key))]
    async fn try_set_dispatch_pending(&self, key: OrderKey) -> Result<bool> {
        let claimed = self
            .transition_dispatch(
                key,
                &[DispatchState::NotDispatched],
                DispatchState::DispatchPending,
            )
            .await?;
        debug!(claimed = claimed, "Dispatch pending claim attempted");
        Ok(claimed)
    }

    #[instrument(skip(self), fields(order_key = %key))]
    async fn try_reclaim_failed(&self, key: OrderKey) -> Result<bool> {
        let claimed = self
            .transition_dispatch(
                key,
                &[DispatchState::DispatchFailed],
                DispatchState::DispatchPending,
            )
            .await?;
        debug!(claimed = claimed, "Failed dispatch reclaim attempted");
        Ok(claimed)
    }

    async fn set_dispatched(&self, key: OrderKey, courier_ref: &CourierRef) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE dispatch_orders
               SET dispatch_state = 'dispatched',
                   courier_external_id = $2,
                   courier_tracking_url = $3,
                   updated_at = NOW()
             WHERE order_key = $1 AND dispatch_state = 'dispatch_pending'
            "#,
        )
        .bind(key.as_uuid())
        .bind(&courier_ref.external_id)
        .bind(&courier_ref.tracking_url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        let from = self
            .get_dispatch_state(key)
            .await?
            .ok_or(DispatchError::OrderNotFound(key))?;
        Err(DispatchError::InvalidStateTransition {
            order_key: key,
            from: from.to_string(),
            to: DispatchState::Dispatched.to_string(),
        })
    }

    async fn set_tracking_url(&self, key: OrderKey, tracking_url: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE dispatch_orders
               SET courier_tracking_url = $2, updated_at = NOW()
             WHERE order_key = $1 AND courier_external_id IS NOT NULL
            "#,
        )
        .bind(key.as_uuid())
        .bind(tracking_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_dispatch_failed(&self, key: OrderKey) -> Result<()> {
        self.require_transition(
            key,
            &[DispatchState::DispatchPending],
            DispatchState::DispatchFailed,
        )
        .await
    }

    async fn reset_not_dispatched(&self, key: OrderKey) -> Result<()> {
        self.require_transition(
            key,
            &[DispatchState::DispatchPending],
            DispatchState::NotDispatched,
        )
        .await
    }

    #[instrument(skip(self), fields(order_key = %key, status = %status))]
    async fn set_lifecycle_status(&self, key: OrderKey, status: LifecycleStatus) -> Result<bool> {
        let current: Option<String> = sqlx::query_scalar(
            "SELECT lifecycle_status FROM dispatch_orders WHERE order_key = $1",
        )
        .bind(key.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let current = current
            .ok_or(DispatchError::OrderNotFound(key))?
            .parse::<LifecycleStatus>()
            .map_err(DispatchError::Persistence)?;

        if !can_transition_lifecycle(current, status) {
            return Ok(false);
        }

        // Conditional on the status we read, so a concurrent writer wins cleanly
        let result = sqlx::query(
            r#"
            UPDATE dispatch_orders
               SET lifecycle_status = $2,
                   accepted_at = CASE WHEN $2 = 'accepted'
                                      THEN COALESCE(accepted_at, NOW())
                                      ELSE accepted_at END,
                   updated_at = NOW()
             WHERE order_key = $1 AND lifecycle_status = $3
            "#,
        )
        .bind(key.as_uuid())
        .bind(status.to_string())
        .bind(current.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn query_pending_dispatch_candidates(&self, limit: usize) -> Result<Vec<Order>> {
        let query = format!(
            r#"
            SELECT {ORDER_COLUMNS}
              FROM dispatch_orders
             WHERE dispatch_state IN ('dispatched', 'dispatch_pending')
               AND lifecycle_status NOT IN ('cancelled', 'delivered')
             ORDER BY updated_at ASC
             LIMIT $1
            "#
        );
        let rows = sqlx::query_as::<_, OrderRow>(&query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn query_recent_orders(&self, limit: usize) -> Result<Vec<Order>> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM dispatch_orders ORDER BY created_at DESC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Order::try_from).collect()
    }
}

/// Internal struct for SQL query results
#[derive(Debug, FromRow)]
struct OrderRow {
    order_key: Uuid,
    external_id: String,
    kind: String,
    lifecycle_status: String,
    declared_delivery_time: Option<DateTime<Utc>>,
    accepted_at: Option<DateTime<Utc>>,
    dispatch_state: String,
    courier_external_id: Option<String>,
    courier_tracking_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DispatchError;

    fn try_from(row: OrderRow) -> Result<Self> {
        let courier_ref = row
            .courier_external_id
            .map(|external_id| CourierRef::new(external_id, row.courier_tracking_url));

        Ok(Order {
            key: OrderKey::from_uuid(row.order_key),
            external_id: row.external_id,
            kind: row
                .kind
                .parse::<OrderKind>()
                .map_err(DispatchError::Persistence)?,
            lifecycle_status: row
                .lifecycle_status
                .parse::<LifecycleStatus>()
                .map_err(DispatchError::Persistence)?,
            declared_delivery_time: row.declared_delivery_time,
            accepted_at: row.accepted_at,
            dispatch_state: row
                .dispatch_state
                .parse::<DispatchState>()
                .map_err(DispatchError::Persistence)?,
            courier_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
