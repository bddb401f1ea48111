//! # Dispatch Service Bootstrap
//!
//! Wires the dispatch core together and exposes the hooks the order intake
//! calls:
//!
//! - `on_order_ingested` / `on_order_updated`: persist and (re)arm triggers
//! - `on_order_accepted`: arm the post-acceptance fallback, once per transition
//! - `on_order_cancelled`: mark cancelled and drop pending jobs
//! - `mark_ready_for_pickup`: manual trigger, then tell the courier
//! - `retry_failed_dispatch`: operator retry of a permanently failed dispatch
//!
//! ## Lifecycle
//!
//! `start()` restores triggers from the backlog and then spawns the
//! reconciliation sweeper. Call it before ingesting new orders.
//! `shutdown()` signals the sweeper through a watch channel, waits for it and
//! stops the job registry.

use crate::clock::{Clock, SystemClock};
use crate::config::DispatchConfig;
use crate::courier::CourierClient;
use crate::database::OrderStore;
use crate::error::{DispatchError, Result};
use crate::events::{NotificationSink, TracingNotificationSink};
use crate::models::{Order, OrderKey};
use crate::orchestration::delivery_scheduler::{DeliveryScheduler, ScheduleOutcome};
use crate::orchestration::dispatch_coordinator::DispatchCoordinator;
use crate::orchestration::job_registry::ScheduledJobRegistry;
use crate::orchestration::post_acceptance::{PostAcceptanceOutcome, PostAcceptanceScheduler};
use crate::orchestration::reconciliation::ReconciliationSweeper;
use crate::orchestration::restore::{RestoreOnStartup, RestoreSummary};
use crate::orchestration::trigger_time::TriggerTimeCalculator;
use crate::orchestration::types::{DispatchAttemptResult, DispatchTrigger};
use crate::state_machine::{DispatchState, LifecycleStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// What ingesting or updating an order did to its triggers
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    /// The order as stored after the upsert
    pub order: Order,
    pub delivery: ScheduleOutcome,
    /// Present when this call moved the order into `accepted`
    pub post_acceptance: Option<PostAcceptanceOutcome>,
}

pub struct DispatchServiceBuilder {
    config: DispatchConfig,
    store: Arc<dyn OrderStore>,
    courier: Arc<dyn CourierClient>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl DispatchServiceBuilder {
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> DispatchService {
        let Self {
            config,
            store,
            courier,
            notifier,
            clock,
        } = self;

        let registry = ScheduledJobRegistry::new(Arc::clone(&clock));
        let coordinator = Arc::new(
            DispatchCoordinator::new(
                Arc::clone(&store),
                Arc::clone(&courier),
                registry.clone(),
                Arc::clone(&notifier),
                Arc::clone(&clock),
            )
            .with_tracking_config(config.tracking.clone()),
        );
        let delivery = Arc::new(DeliveryScheduler::new(
            TriggerTimeCalculator::from_config(&config.scheduling),
            registry.clone(),
            Arc::clone(&coordinator),
            Arc::clone(&clock),
        ));
        let post_acceptance = Arc::new(PostAcceptanceScheduler::new(
            Arc::clone(&store),
            registry.clone(),
            Arc::clone(&coordinator),
            config.post_acceptance.clone(),
            Arc::clone(&clock),
        ));
        let sweeper = Arc::new(ReconciliationSweeper::new(
            Arc::clone(&store),
            Arc::clone(&courier),
            registry.clone(),
            notifier,
            clock,
            config.reconciliation.clone(),
        ));
        let restore = RestoreOnStartup::new(
            Arc::clone(&store),
            Arc::clone(&delivery),
            Arc::clone(&post_acceptance),
            config.restore.clone(),
        );
        let (shutdown_tx, _) = watch::channel(false);

        DispatchService {
            config,
            store,
            courier,
            registry,
            coordinator,
            delivery,
            post_acceptance,
            sweeper,
            restore,
            shutdown_tx,
            sweeper_task: Mutex::new(None),
        }
    }
}

pub struct DispatchService {
    config: DispatchConfig,
    store: Arc<dyn OrderStore>,
    courier: Arc<dyn CourierClient>,
    registry: ScheduledJobRegistry,
    coordinator: Arc<DispatchCoordinator>,
    delivery: Arc<DeliveryScheduler>,
    post_acceptance: Arc<PostAcceptanceScheduler>,
    sweeper: Arc<ReconciliationSweeper>,
    restore: RestoreOnStartup,
    shutdown_tx: watch::Sender<bool>,
    sweeper_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DispatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchService")
            .field("courier", &self.courier.name())
            .field("armed_jobs", &self.registry.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl DispatchService {
    /// Start building a service with the default log-only notifier and
    /// the system clock
    pub fn builder(
        config: DispatchConfig,
        store: Arc<dyn OrderStore>,
        courier: Arc<dyn CourierClient>,
    ) -> DispatchServiceBuilder {
        DispatchServiceBuilder {
            config,
            store,
            courier,
            notifier: Arc::new(TracingNotificationSink),
            clock: Arc::new(SystemClock),
        }
    }

    /// Restore triggers from the backlog, then start the sweeper
    pub async fn start(&self) -> Result<RestoreSummary> {
        let summary = if self.config.restore.enabled {
            self.restore.restore().await?
        } else {
            info!("Startup restore disabled");
            RestoreSummary::default()
        };

        let mut task = self.sweeper_task.lock();
        if task.is_none() && self.config.reconciliation.enabled {
            let sweeper = Arc::clone(&self.sweeper);
            let shutdown = self.shutdown_tx.subscribe();
            *task = Some(tokio::spawn(async move { sweeper.run(shutdown).await }));
        }
        drop(task);

        info!(
            armed_jobs = self.registry.len(),
            reconciliation_enabled = self.config.reconciliation.enabled,
            "Dispatch service started"
        );
        Ok(summary)
    }

    /// Stop the sweeper and cancel every pending job
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let task = self.sweeper_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Reconciliation sweeper task ended abnormally");
            }
        }

        self.registry.stop();
        info!("Dispatch service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.sweeper_task.lock().is_some()
    }

    /// Persist a newly ingested order and arm its triggers
    #[instrument(skip(self, order), fields(order_key = %order.key, external_id = %order.external_id))]
    pub async fn on_order_ingested(&self, order: Order) -> Result<IngestOutcome> {
        self.sync_order(order).await
    }

    /// Apply an update from the order source.
    ///
    /// A changed delivery time moves the delivery-time job; an order that
    /// stops being eligible loses all of its jobs.
    #[instrument(skip(self, order), fields(order_key = %order.key, external_id = %order.external_id))]
    pub async fn on_order_updated(&self, order: Order) -> Result<IngestOutcome> {
        self.sync_order(order).await
    }

    async fn sync_order(&self, order: Order) -> Result<IngestOutcome> {
        let previous_status = self
            .store
            .get_order(order.key)
            .await?
            .map(|o| o.lifecycle_status);
        let stored = self.store.upsert_order(&order).await?;

        if !stored.awaits_dispatch() {
            let cancelled = self.registry.cancel_all(stored.key);
            if cancelled > 0 {
                info!(cancelled_jobs = cancelled, "Order no longer awaits dispatch");
            }
            return Ok(IngestOutcome {
                order: stored,
                delivery: ScheduleOutcome::NotApplicable,
                post_acceptance: None,
            });
        }

        let became_accepted = stored.lifecycle_status == LifecycleStatus::Accepted
            && previous_status != Some(LifecycleStatus::Accepted);
        let post_acceptance = if became_accepted {
            Some(self.post_acceptance.on_accepted(&stored).await?)
        } else {
            None
        };

        let delivery = self.delivery.schedule_delivery(&stored).await?;

        Ok(IngestOutcome {
            order: stored,
            delivery,
            post_acceptance,
        })
    }

    /// Record the transition into `accepted` and arm the fallback trigger.
    ///
    /// Repeated calls for an already accepted order do nothing.
    #[instrument(skip(self), fields(order_key = %order_key))]
    pub async fn on_order_accepted(&self, order_key: OrderKey) -> Result<PostAcceptanceOutcome> {
        if !self
            .store
            .set_lifecycle_status(order_key, LifecycleStatus::Accepted)
            .await?
        {
            debug!("Order not moved into accepted, fallback not armed");
            return Ok(PostAcceptanceOutcome::Skipped);
        }

        let order = self
            .store
            .get_order(order_key)
            .await?
            .ok_or(DispatchError::OrderNotFound(order_key))?;
        self.post_acceptance.on_accepted(&order).await
    }

    /// Mark the order cancelled and drop its jobs.
    ///
    /// Returns whether the stored status changed.
    #[instrument(skip(self), fields(order_key = %order_key))]
    pub async fn on_order_cancelled(&self, order_key: OrderKey) -> Result<bool> {
        let changed = self
            .store
            .set_lifecycle_status(order_key, LifecycleStatus::Cancelled)
            .await?;
        let cancelled = self.registry.cancel_all(order_key);
        info!(changed, cancelled_jobs = cancelled, "Order cancelled");
        Ok(changed)
    }

    /// Manual trigger: dispatch if nobody has yet, then tell the courier the
    /// order is waiting
    #[instrument(skip(self), fields(order_key = %order_key))]
    pub async fn mark_ready_for_pickup(&self, order_key: OrderKey) -> Result<DispatchAttemptResult> {
        self.store
            .set_lifecycle_status(order_key, LifecycleStatus::ReadyForPickup)
            .await?;

        let result = self
            .coordinator
            .dispatch(order_key, DispatchTrigger::Manual)
            .await?;

        if let (true, Some(courier_id)) = (result.success, result.external_id.as_deref()) {
            if let Err(e) = self.courier.notify_ready_for_pickup(courier_id).await {
                warn!(courier_id = %courier_id, error = %e, "Ready-for-pickup notification failed");
            }
        }
        Ok(result)
    }

    /// Operator retry for an order parked in `dispatch_failed`
    #[instrument(skip(self), fields(order_key = %order_key))]
    pub async fn retry_failed_dispatch(&self, order_key: OrderKey) -> Result<DispatchAttemptResult> {
        match self.store.get_dispatch_state(order_key).await? {
            None => Err(DispatchError::OrderNotFound(order_key)),
            Some(DispatchState::DispatchFailed) => {
                self.coordinator
                    .dispatch(order_key, DispatchTrigger::Manual)
                    .await
            }
            Some(other) => Err(DispatchError::InvalidStateTransition {
                order_key,
                from: other.to_string(),
                to: DispatchState::NotDispatched.to_string(),
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &ScheduledJobRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<DispatchCoordinator> {
        &self.coordinator
    }

    pub fn sweeper(&self) -> &Arc<ReconciliationSweeper> {
        &self.sweeper
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }
}
