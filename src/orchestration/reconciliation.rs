//! # Reconciliation Sweeper
//!
//! Periodically pulls courier-side status for orders the courier holds and
//! corrects the local lifecycle when the courier reports a terminal state the
//! local record has not seen yet (a missed webhook, a cancellation made in
//! the courier's dashboard).
//!
//! The sweeper never creates a dispatch and only moves lifecycle status
//! toward `cancelled` or `delivered`, so it can run alongside live dispatch
//! paths without coordination.
//!
//! ## Courier identifier resolution
//!
//! Older records may lack a clean courier id, so each order is looked up by
//! the first identifier that the courier recognizes:
//!
//! 1. `courier_ref.external_id`
//! 2. id extracted from the stored tracking URL
//! 3. the order's own external id
//!
//! `NotFound` answers are expected along this chain and stay silent.

use crate::clock::Clock;
use crate::config::ReconciliationConfig;
use crate::courier::{extract_courier_id, map_courier_status, CourierClient};
use crate::database::OrderStore;
use crate::error::Result;
use crate::events::{DispatchEvent, NotificationSink};
use crate::metrics;
use crate::models::{CourierStatus, Order};
use crate::orchestration::job_registry::ScheduledJobRegistry;
use crate::state_machine::LifecycleStatus;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub examined: usize,
    /// Lifecycle writes applied
    pub corrected: usize,
    /// Courier status matched local state or mapped to nothing
    pub unchanged: usize,
    /// No identifier was recognized by the courier
    pub unresolved: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconcileOutcome {
    Corrected(LifecycleStatus),
    Unchanged,
    Unresolved,
}

pub struct ReconciliationSweeper {
    store: Arc<dyn OrderStore>,
    courier: Arc<dyn CourierClient>,
    registry: ScheduledJobRegistry,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: ReconciliationConfig,
}

impl std::fmt::Debug for ReconciliationSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationSweeper")
            .field("courier", &self.courier.name())
            .field("config", &self.config)
            .finish()
    }
}

impl ReconciliationSweeper {
    pub fn new(
        store: Arc<dyn OrderStore>,
        courier: Arc<dyn CourierClient>,
        registry: ScheduledJobRegistry,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            courier,
            registry,
            notifier,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Run the sweep loop until `shutdown` flips to `true` or its sender drops.
    ///
    /// Waits the initial delay, then sweeps once per interval. A failed sweep
    /// is logged and the loop carries on.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("Reconciliation sweeper disabled");
            return;
        }
        if *shutdown.borrow() {
            return;
        }

        info!(
            interval_seconds = self.config.interval_seconds,
            initial_delay_seconds = self.config.initial_delay_seconds,
            batch_size = self.config.batch_size,
            "Starting reconciliation sweeper"
        );

        tokio::select! {
            _ = tokio::time::sleep(self.config.initial_delay()) => {}
            _ = shutdown.changed() => {
                info!("Reconciliation sweeper stopped before first sweep");
                return;
            }
        }

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.sweep().await {
                // Don't stop the loop on error - the next tick retries
                error!(error = %e, "Reconciliation sweep failed");
            }
        }

        info!("Reconciliation sweeper stopped");
    }

    /// One pass over the dispatched, non-terminal orders.
    ///
    /// A store failure ends the pass early with `Err`; corrections already
    /// written stay written.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepSummary> {
        let started = Instant::now();
        let candidates = self
            .store
            .query_pending_dispatch_candidates(self.config.batch_size)
            .await?;

        let mut summary = SweepSummary {
            examined: candidates.len(),
            ..Default::default()
        };

        for order in &candidates {
            match self.reconcile_order(order).await? {
                ReconcileOutcome::Corrected(_) => summary.corrected += 1,
                ReconcileOutcome::Unchanged => summary.unchanged += 1,
                ReconcileOutcome::Unresolved => summary.unresolved += 1,
            }
        }

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::sweep_duration().record(
            duration_ms,
            &[KeyValue::new("examined", summary.examined as i64)],
        );

        if summary.corrected > 0 {
            info!(
                examined = summary.examined,
                corrected = summary.corrected,
                unresolved = summary.unresolved,
                duration_ms = duration_ms,
                "Reconciliation sweep applied corrections"
            );
        } else {
            debug!(
                examined = summary.examined,
                unresolved = summary.unresolved,
                "Reconciliation sweep found nothing to correct"
            );
        }

        Ok(summary)
    }

    async fn reconcile_order(&self, order: &Order) -> Result<ReconcileOutcome> {
        let Some((courier_id, status)) = self.resolve_status(order).await else {
            debug!(order_key = %order.key, "No courier identifier recognized");
            return Ok(ReconcileOutcome::Unresolved);
        };

        let Some(target) = map_courier_status(&status.status) else {
            return Ok(ReconcileOutcome::Unchanged);
        };
        if target == order.lifecycle_status {
            return Ok(ReconcileOutcome::Unchanged);
        }

        // The store re-checks the transition, so a repeat write is a no-op
        if !self.store.set_lifecycle_status(order.key, target).await? {
            debug!(
                order_key = %order.key,
                target = %target,
                "Lifecycle already corrected or transition not allowed"
            );
            return Ok(ReconcileOutcome::Unchanged);
        }

        metrics::reconciliation_corrections_total()
            .add(1, &[KeyValue::new("to", target.to_string())]);
        self.registry.cancel_all(order.key);
        info!(
            order_key = %order.key,
            courier_id = %courier_id,
            courier_status = %status.status,
            from = %order.lifecycle_status,
            to = %target,
            "Lifecycle corrected from courier status"
        );

        self.notifier
            .notify(DispatchEvent::StatusChanged {
                order_key: order.key,
                external_id: order.external_id.clone(),
                from: order.lifecycle_status,
                to: target,
                occurred_at: self.clock.now(),
            })
            .await;

        Ok(ReconcileOutcome::Corrected(target))
    }

    async fn resolve_status(&self, order: &Order) -> Option<(String, CourierStatus)> {
        for courier_id in candidate_courier_ids(order) {
            match self.courier.get_status(&courier_id).await {
                Ok(status) => return Some((courier_id, status)),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    debug!(
                        order_key = %order.key,
                        courier_id = %courier_id,
                        error = %e,
                        "Courier status lookup failed"
                    );
                }
            }
        }
        None
    }
}

/// Identifiers to try for an order, highest priority first, without repeats
pub fn candidate_courier_ids(order: &Order) -> Vec<String> {
    let mut ids: Vec<String> = Vec::with_capacity(3);
    let mut push = |id: String| {
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    };

    if let Some(courier_ref) = &order.courier_ref {
        push(courier_ref.external_id.clone());
        if let Some(id) = courier_ref.tracking_url.as_deref().and_then(extract_courier_id) {
            push(id);
        }
    }
    push(order.external_id.clone());
    ids
}
