//! # Delivery Scheduler
//!
//! Turns a [`TriggerDecision`] into action for one order: arm the
//! delivery-time job, or dispatch right away. When the registry refuses the
//! job the order is dispatched immediately instead of being left without a
//! trigger.

use crate::clock::Clock;
use crate::error::{DispatchError, Result};
use crate::models::Order;
use crate::orchestration::dispatch_coordinator::DispatchCoordinator;
use crate::orchestration::job_registry::{JobHandle, ScheduledJobRegistry};
use crate::orchestration::trigger_time::TriggerTimeCalculator;
use crate::orchestration::types::{DispatchAttemptResult, DispatchTrigger, JobKind, TriggerDecision};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// Pickup, terminal or already claimed orders get no delivery trigger
    NotApplicable,
    Armed(JobHandle),
    Dispatched(DispatchAttemptResult),
}

#[derive(Debug)]
pub struct DeliveryScheduler {
    calculator: TriggerTimeCalculator,
    registry: ScheduledJobRegistry,
    coordinator: Arc<DispatchCoordinator>,
    clock: Arc<dyn Clock>,
}

impl DeliveryScheduler {
    pub fn new(
        calculator: TriggerTimeCalculator,
        registry: ScheduledJobRegistry,
        coordinator: Arc<DispatchCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            calculator,
            registry,
            coordinator,
            clock,
        }
    }

    /// Arm or re-arm the delivery-time trigger for `order`.
    ///
    /// Replaces an existing job, so a changed delivery time simply moves the
    /// trigger. Orders that no longer await dispatch lose their job.
    #[instrument(skip(self, order), fields(order_key = %order.key))]
    pub async fn schedule_delivery(&self, order: &Order) -> Result<ScheduleOutcome> {
        if !order.awaits_dispatch() {
            if self.registry.cancel(order.key, JobKind::DeliveryTimeTrigger) {
                debug!("Order no longer awaits dispatch, delivery-time job dropped");
            }
            return Ok(ScheduleOutcome::NotApplicable);
        }

        let Some(decision) = self.calculator.compute(order, self.clock.now()) else {
            return Ok(ScheduleOutcome::NotApplicable);
        };

        match decision {
            TriggerDecision::Immediate { reason } => {
                info!(reason = %reason, "Dispatching immediately");
                self.registry.cancel(order.key, JobKind::DeliveryTimeTrigger);
                let result = self
                    .coordinator
                    .dispatch(order.key, DispatchTrigger::Immediate)
                    .await?;
                Ok(ScheduleOutcome::Dispatched(result))
            }
            TriggerDecision::ScheduledAt(fire_at) => {
                let coordinator = Arc::clone(&self.coordinator);
                let order_key = order.key;
                let armed = self.registry.schedule(
                    order_key,
                    JobKind::DeliveryTimeTrigger,
                    fire_at,
                    move || async move {
                        if let Err(e) = coordinator
                            .dispatch(order_key, DispatchTrigger::Scheduled)
                            .await
                        {
                            coordinator.retry_after_store_failure(order_key, &e);
                        }
                    },
                );

                match armed {
                    Ok(handle) => {
                        info!(fire_at = %fire_at, "Delivery-time dispatch scheduled");
                        Ok(ScheduleOutcome::Armed(handle))
                    }
                    Err(DispatchError::Scheduling(reason)) => {
                        warn!(
                            reason = %reason,
                            "Could not arm delivery-time job, dispatching immediately"
                        );
                        let result = self
                            .coordinator
                            .dispatch(order_key, DispatchTrigger::Immediate)
                            .await?;
                        Ok(ScheduleOutcome::Dispatched(result))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::database::{InMemoryOrderStore, OrderStore};
    use crate::state_machine::DispatchState;
    use crate::test_helpers::{MockCourierClient, OrderFactory, RecordingNotificationSink};
    use chrono::Utc;
    use std::time::Duration;

    fn setup() -> (Arc<InMemoryOrderStore>, Arc<MockCourierClient>, DeliveryScheduler) {
        let store = Arc::new(InMemoryOrderStore::new());
        let courier = Arc::new(MockCourierClient::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = ScheduledJobRegistry::new(clock.clone());
        let coordinator = Arc::new(DispatchCoordinator::new(
            store.clone(),
            courier.clone(),
            registry.clone(),
            Arc::new(RecordingNotificationSink::new()),
            clock.clone(),
        ));
        let scheduler =
            DeliveryScheduler::new(TriggerTimeCalculator::default(), registry, coordinator, clock);
        (store, courier, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_far_delivery_is_armed_then_dispatched_on_fire() {
        let (store, courier, scheduler) = setup();
        let order = store
            .upsert_order(&OrderFactory::delivery_due_in(Utc::now(), 45))
            .await
            .unwrap();

        let outcome = scheduler.schedule_delivery(&order).await.unwrap();
        let ScheduleOutcome::Armed(handle) = outcome else {
            panic!("expected an armed job, got {outcome:?}");
        };
        assert_eq!(handle.kind(), JobKind::DeliveryTimeTrigger);
        assert_eq!(courier.create_calls(), 0);

        tokio::time::sleep(Duration::from_secs(16 * 60)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(courier.create_calls(), 1);
        assert_eq!(
            store.get_dispatch_state(order.key).await.unwrap(),
            Some(DispatchState::Dispatched)
        );
    }

    #[tokio::test]
    async fn test_near_delivery_dispatches_immediately() {
        let (store, courier, scheduler) = setup();
        let order = store
            .upsert_order(&OrderFactory::delivery_due_in(Utc::now(), 5))
            .await
            .unwrap();

        let outcome = scheduler.schedule_delivery(&order).await.unwrap();

        assert!(matches!(outcome, ScheduleOutcome::Dispatched(ref r) if r.created_dispatch()));
        assert_eq!(courier.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_pickup_gets_no_job() {
        let (store, courier, scheduler) = setup();
        let order = store.upsert_order(&OrderFactory::pickup()).await.unwrap();

        let outcome = scheduler.schedule_delivery(&order).await.unwrap();

        assert_eq!(outcome, ScheduleOutcome::NotApplicable);
        assert_eq!(courier.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_stopped_registry_falls_back_to_immediate() {
        let (store, courier, scheduler) = setup();
        scheduler.registry.stop();
        let order = store
            .upsert_order(&OrderFactory::delivery_due_in(Utc::now(), 120))
            .await
            .unwrap();

        let outcome = scheduler.schedule_delivery(&order).await.unwrap();

        match outcome {
            ScheduleOutcome::Dispatched(result) => {
                assert_eq!(result.trigger, DispatchTrigger::Immediate);
                assert!(result.created_dispatch());
            }
            other => panic!("expected immediate fallback, got {other:?}"),
        }
        assert_eq!(courier.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_at_fire_time_arms_a_retry() {
        let (store, courier, scheduler) = setup();
        let order = store
            .upsert_order(&OrderFactory::delivery_due_in(Utc::now(), 45))
            .await
            .unwrap();
        scheduler.schedule_delivery(&order).await.unwrap();

        store.set_unavailable(true);
        tokio::time::sleep(Duration::from_secs(16 * 60)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(courier.create_calls(), 0);
        assert!(scheduler.registry.is_armed(order.key, JobKind::DispatchRetry));

        store.set_unavailable(false);
        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(courier.create_calls(), 1);
        assert_eq!(
            store.get_dispatch_state(order.key).await.unwrap(),
            Some(DispatchState::Dispatched)
        );
        assert!(scheduler.registry.is_empty());
    }
}
