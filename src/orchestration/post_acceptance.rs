//! # Post-Acceptance Scheduler
//!
//! Fallback trigger armed when an order enters `accepted`. It fires after a
//! random delay inside the configured window, counted from `accepted_at`,
//! and only dispatches if the order is still accepted and nothing else has
//! dispatched it in the meantime. It runs independently of the delivery-time
//! trigger; whichever fires first wins the coordinator's claim.

use crate::clock::Clock;
use crate::config::PostAcceptanceConfig;
use crate::database::OrderStore;
use crate::error::{DispatchError, Result};
use crate::models::{Order, OrderKey};
use crate::orchestration::dispatch_coordinator::{DispatchCoordinator, STORE_RETRY_DELAY};
use crate::orchestration::job_registry::{JobHandle, ScheduledJobRegistry};
use crate::orchestration::types::{DispatchAttemptResult, DispatchTrigger, JobKind, SkipReason};
use crate::state_machine::{DispatchState, LifecycleStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum PostAcceptanceOutcome {
    /// Disabled, not a delivery, or no longer waiting for dispatch
    Skipped,
    Armed(JobHandle),
    /// Registry refused the job; the order was dispatched right away
    Dispatched(DispatchAttemptResult),
}

pub struct PostAcceptanceScheduler {
    store: Arc<dyn OrderStore>,
    registry: ScheduledJobRegistry,
    coordinator: Arc<DispatchCoordinator>,
    config: PostAcceptanceConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PostAcceptanceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostAcceptanceScheduler")
            .field("config", &self.config)
            .finish()
    }
}

impl PostAcceptanceScheduler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        registry: ScheduledJobRegistry,
        coordinator: Arc<DispatchCoordinator>,
        config: PostAcceptanceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            coordinator,
            config,
            clock,
        }
    }

    /// Arm the fallback for an order that just became accepted.
    ///
    /// When the window has already elapsed (restored orders), the job fires
    /// on the next tick.
    #[instrument(skip(self, order), fields(order_key = %order.key))]
    pub async fn on_accepted(&self, order: &Order) -> Result<PostAcceptanceOutcome> {
        if !self.config.enabled
            || !order.is_delivery()
            || order.dispatch_state != DispatchState::NotDispatched
            || order.lifecycle_status.is_terminal()
        {
            debug!(
                dispatch_state = %order.dispatch_state,
                lifecycle_status = %order.lifecycle_status,
                "Post-acceptance trigger not applicable"
            );
            return Ok(PostAcceptanceOutcome::Skipped);
        }

        let delay = self.random_delay();
        let accepted_at = order.accepted_at.unwrap_or_else(|| self.clock.now());
        let fire_at = accepted_at
            + chrono::Duration::from_std(delay)
                .map_err(|e| DispatchError::Configuration(format!("post-acceptance delay: {e}")))?;

        let order_key = order.key;
        let armed = self.arm(order_key, fire_at);

        match armed {
            Ok(handle) => {
                info!(
                    fire_at = %fire_at,
                    delay_secs = delay.as_secs(),
                    "Post-acceptance dispatch scheduled"
                );
                Ok(PostAcceptanceOutcome::Armed(handle))
            }
            Err(DispatchError::Scheduling(reason)) => {
                warn!(
                    reason = %reason,
                    "Could not arm post-acceptance job, dispatching immediately"
                );
                let result = self
                    .coordinator
                    .dispatch(order_key, DispatchTrigger::Immediate)
                    .await?;
                Ok(PostAcceptanceOutcome::Dispatched(result))
            }
            Err(e) => Err(e),
        }
    }

    /// Schedule the fallback job. A store error at fire time re-arms the same
    /// job after [`STORE_RETRY_DELAY`] so the acceptance check runs again.
    fn arm(&self, order_key: OrderKey, fire_at: DateTime<Utc>) -> Result<JobHandle> {
        let job = FallbackJob {
            store: Arc::clone(&self.store),
            registry: self.registry.clone(),
            coordinator: Arc::clone(&self.coordinator),
            clock: Arc::clone(&self.clock),
        };
        job.arm(order_key, fire_at)
    }

    pub fn cancel(&self, order_key: OrderKey) -> bool {
        self.registry.cancel(order_key, JobKind::PostAcceptanceTrigger)
    }

    /// Run the fire-time checks and dispatch now, as the armed job would
    pub async fn fire(&self, order_key: OrderKey) -> Result<DispatchAttemptResult> {
        revalidate_and_dispatch(self.store.as_ref(), &self.coordinator, order_key).await
    }

    /// Uniform pick inside `[min_delay, max_delay]`
    fn random_delay(&self) -> Duration {
        let min = self.config.min_delay();
        let max = self.config.max_delay().max(min);
        let spread = (max - min).as_secs_f64() * rand::random::<f64>();
        min + Duration::from_secs_f64(spread)
    }
}

/// What an armed fallback needs to fire and, on a store error, re-arm itself
struct FallbackJob {
    store: Arc<dyn OrderStore>,
    registry: ScheduledJobRegistry,
    coordinator: Arc<DispatchCoordinator>,
    clock: Arc<dyn Clock>,
}

impl FallbackJob {
    fn arm(self, order_key: OrderKey, fire_at: DateTime<Utc>) -> Result<JobHandle> {
        let registry = self.registry.clone();
        registry.schedule(
            order_key,
            JobKind::PostAcceptanceTrigger,
            fire_at,
            move || async move {
                let fired =
                    revalidate_and_dispatch(self.store.as_ref(), &self.coordinator, order_key).await;
                let Err(e) = fired else {
                    return;
                };
                if !e.is_persistence() {
                    return;
                }
                let retry_at = self.clock.now()
                    + chrono::Duration::seconds(STORE_RETRY_DELAY.as_secs() as i64);
                match self.arm(order_key, retry_at) {
                    Ok(_) => warn!(
                        order_key = %order_key,
                        retry_at = %retry_at,
                        "Store unavailable at fallback fire, re-armed"
                    ),
                    Err(e) => warn!(
                        order_key = %order_key,
                        error = %e,
                        "Could not re-arm post-acceptance trigger"
                    ),
                }
            },
        )
    }
}

async fn revalidate_and_dispatch(
    store: &dyn OrderStore,
    coordinator: &Arc<DispatchCoordinator>,
    order_key: OrderKey,
) -> Result<DispatchAttemptResult> {
    let trigger = DispatchTrigger::PostAcceptance;
    let order = match store.get_order(order_key).await {
        Ok(Some(order)) => order,
        Ok(None) => {
            return Ok(DispatchAttemptResult::skipped(
                order_key,
                trigger,
                SkipReason::OrderNotFound,
            ))
        }
        Err(e) => {
            warn!(order_key = %order_key, error = %e, "Post-acceptance trigger could not read order");
            return Err(e);
        }
    };

    if order.dispatch_state != DispatchState::NotDispatched {
        debug!(
            order_key = %order_key,
            dispatch_state = %order.dispatch_state,
            "Post-acceptance trigger found order already handled"
        );
        return Ok(DispatchAttemptResult::already_dispatched(
            order_key,
            trigger,
            order.courier_ref.as_ref(),
        ));
    }
    if order.lifecycle_status != LifecycleStatus::Accepted {
        debug!(
            order_key = %order_key,
            lifecycle_status = %order.lifecycle_status,
            "Post-acceptance trigger skipped, order left accepted"
        );
        return Ok(DispatchAttemptResult::skipped(
            order_key,
            trigger,
            SkipReason::NotAccepted,
        ));
    }

    coordinator.dispatch(order_key, trigger).await
}
