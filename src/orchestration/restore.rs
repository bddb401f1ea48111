//! # Restore On Startup
//!
//! Timers live in memory and die with the process. On boot, before new
//! orders are ingested, the recent backlog is scanned and every delivery
//! order still waiting for dispatch gets its triggers back: the delivery-time
//! job (or an immediate dispatch when its time has passed) and, for accepted
//! orders, the post-acceptance fallback.
//!
//! Re-arming can never double-dispatch: every fire goes through the
//! coordinator's claim, and the registry's replace-on-schedule keeps one job
//! per order and kind even if the backlog lists an order twice.

use crate::config::RestoreConfig;
use crate::database::OrderStore;
use crate::error::Result;
use crate::metrics;
use crate::models::Order;
use crate::orchestration::delivery_scheduler::{DeliveryScheduler, ScheduleOutcome};
use crate::orchestration::post_acceptance::{PostAcceptanceOutcome, PostAcceptanceScheduler};
use crate::state_machine::LifecycleStatus;
use futures::future::join_all;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    /// Orders returned by the backlog query
    pub scanned: usize,
    /// Delivery orders still waiting for dispatch
    pub eligible: usize,
    pub delivery_jobs_armed: usize,
    pub post_acceptance_armed: usize,
    pub dispatched_immediately: usize,
    /// Per-order failures; the rest of the backlog is still restored
    pub failed: usize,
}

pub struct RestoreOnStartup {
    store: Arc<dyn OrderStore>,
    delivery: Arc<DeliveryScheduler>,
    post_acceptance: Arc<PostAcceptanceScheduler>,
    config: RestoreConfig,
}

impl std::fmt::Debug for RestoreOnStartup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreOnStartup")
            .field("config", &self.config)
            .finish()
    }
}

impl RestoreOnStartup {
    pub fn new(
        store: Arc<dyn OrderStore>,
        delivery: Arc<DeliveryScheduler>,
        post_acceptance: Arc<PostAcceptanceScheduler>,
        config: RestoreConfig,
    ) -> Self {
        Self {
            store,
            delivery,
            post_acceptance,
            config,
        }
    }

    /// Re-arm triggers for the recent backlog.
    ///
    /// Fails only when the backlog cannot be read. Orders beyond
    /// `backlog_limit` are not restored.
    #[instrument(skip(self), fields(backlog_limit = self.config.backlog_limit))]
    pub async fn restore(&self) -> Result<RestoreSummary> {
        let backlog = self
            .store
            .query_recent_orders(self.config.backlog_limit)
            .await?;

        let mut summary = RestoreSummary {
            scanned: backlog.len(),
            ..Default::default()
        };
        if backlog.len() >= self.config.backlog_limit {
            warn!(
                backlog_limit = self.config.backlog_limit,
                "Restore backlog hit its limit, older orders are not re-armed"
            );
        }

        let mut seen = HashSet::new();
        let eligible: Vec<&Order> = backlog
            .iter()
            .filter(|order| order.awaits_dispatch())
            .filter(|order| seen.insert(order.key))
            .collect();
        summary.eligible = eligible.len();

        // Fallbacks first: an immediate dispatch below then cancels them on success
        for order in &eligible {
            if order.lifecycle_status != LifecycleStatus::Accepted {
                continue;
            }
            match self.post_acceptance.on_accepted(order).await {
                Ok(PostAcceptanceOutcome::Armed(_)) => summary.post_acceptance_armed += 1,
                Ok(PostAcceptanceOutcome::Dispatched(_)) => summary.dispatched_immediately += 1,
                Ok(PostAcceptanceOutcome::Skipped) => {}
                Err(e) => {
                    warn!(order_key = %order.key, error = %e, "Failed to restore post-acceptance trigger");
                    summary.failed += 1;
                }
            }
        }

        let outcomes = join_all(
            eligible
                .iter()
                .map(|order| self.delivery.schedule_delivery(order)),
        )
        .await;

        for (order, outcome) in eligible.iter().zip(outcomes) {
            match outcome {
                Ok(ScheduleOutcome::Armed(_)) => summary.delivery_jobs_armed += 1,
                Ok(ScheduleOutcome::Dispatched(_)) => summary.dispatched_immediately += 1,
                Ok(ScheduleOutcome::NotApplicable) => {}
                Err(e) => {
                    warn!(order_key = %order.key, error = %e, "Failed to restore delivery trigger");
                    summary.failed += 1;
                }
            }
        }

        metrics::restored_orders_total().add(
            (summary.delivery_jobs_armed + summary.dispatched_immediately) as u64,
            &[KeyValue::new("source", "startup")],
        );
        info!(
            scanned = summary.scanned,
            eligible = summary.eligible,
            delivery_jobs_armed = summary.delivery_jobs_armed,
            post_acceptance_armed = summary.post_acceptance_armed,
            dispatched_immediately = summary.dispatched_immediately,
            failed = summary.failed,
            "Restored dispatch triggers"
        );

        Ok(summary)
    }
}
