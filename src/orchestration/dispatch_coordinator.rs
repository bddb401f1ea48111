//! # Dispatch Coordinator
//!
//! The single gate every trigger passes through before the courier is
//! called. Delivery-time jobs, the post-acceptance fallback, immediate
//! dispatch at ingestion or restore and manual operator actions all end up in
//! [`DispatchCoordinator::dispatch`].
//!
//! ## Idempotency Gate
//!
//! 1. Re-read the order from the [`OrderStore`]; cached copies are never trusted
//! 2. Bail out when it is already claimed, failed, not a delivery or terminal
//! 3. Claim it with `try_set_dispatch_pending`, a compare-and-set that exactly
//!    one concurrent caller wins
//! 4. Call the courier, then persist the outcome
//!
//! Only the claim holder ever reaches the courier, so at most one successful
//! create call happens per order however many triggers race. A manual retry of
//! a failed order claims it the same way, straight from `dispatch_failed`.
//!
//! ## Retries
//!
//! A transient courier failure releases the claim and arms a
//! [`JobKind::DispatchRetry`] job after the classifier's suggested delay.
//! Timer jobs whose attempt hits a store error re-arm through
//! [`DispatchCoordinator::retry_after_store_failure`].

use crate::clock::Clock;
use crate::config::TrackingConfig;
use crate::courier::CourierClient;
use crate::database::OrderStore;
use crate::error::{CourierError, DispatchError, Result};
use crate::events::{DispatchEvent, NotificationSink};
use crate::metrics;
use crate::models::{CourierRef, CourierStatus, Order, OrderKey};
use crate::orchestration::error_classifier::{CourierErrorClassifier, DispatchFailureAction};
use crate::orchestration::job_registry::{JobHandle, ScheduledJobRegistry};
use crate::orchestration::types::{
    DispatchAttemptResult, DispatchOutcome, DispatchTrigger, JobKind, SkipReason,
};
use crate::state_machine::DispatchState;
use opentelemetry::KeyValue;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Wait before a timer job that hit a store error tries again
pub const STORE_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Attempts at writing a courier outcome before giving up on the store
const OUTCOME_WRITE_ATTEMPTS: u32 = 3;
const OUTCOME_WRITE_BACKOFF: Duration = Duration::from_millis(200);

pub struct DispatchCoordinator {
    store: Arc<dyn OrderStore>,
    courier: Arc<dyn CourierClient>,
    registry: ScheduledJobRegistry,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    classifier: CourierErrorClassifier,
    tracking: TrackingConfig,
}

impl std::fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCoordinator")
            .field("courier", &self.courier.name())
            .field("armed_jobs", &self.registry.len())
            .field("tracking", &self.tracking)
            .finish()
    }
}

impl DispatchCoordinator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        courier: Arc<dyn CourierClient>,
        registry: ScheduledJobRegistry,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            courier,
            registry,
            notifier,
            clock,
            classifier: CourierErrorClassifier::new(),
            tracking: TrackingConfig::default(),
        }
    }

    pub fn with_tracking_config(mut self, tracking: TrackingConfig) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn with_classifier(mut self, classifier: CourierErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn registry(&self) -> &ScheduledJobRegistry {
        &self.registry
    }

    /// Run one dispatch attempt for the order.
    ///
    /// Courier failures are folded into the returned result. `Err` means the
    /// store could not be read or written; the attempt stops where it was and
    /// the caller logs it.
    #[instrument(skip(self), fields(order_key = %order_key, trigger = %trigger))]
    pub async fn dispatch(
        self: &Arc<Self>,
        order_key: OrderKey,
        trigger: DispatchTrigger,
    ) -> Result<DispatchAttemptResult> {
        let result = self.attempt(order_key, trigger).await;

        match &result {
            Ok(attempt) => {
                metrics::dispatch_attempts_total().add(
                    1,
                    &[
                        KeyValue::new("trigger", trigger.as_str()),
                        KeyValue::new("outcome", attempt.outcome.as_str()),
                    ],
                );
                debug!(outcome = %attempt.outcome, "Dispatch attempt finished");
            }
            Err(e) => {
                error!(error = %e, "Dispatch attempt aborted");
            }
        }
        result
    }

    async fn attempt(
        self: &Arc<Self>,
        order_key: OrderKey,
        trigger: DispatchTrigger,
    ) -> Result<DispatchAttemptResult> {
        let Some(order) = self.store.get_order(order_key).await? else {
            warn!("Order no longer exists, dropping its jobs");
            self.registry.cancel_all(order_key);
            return Ok(DispatchAttemptResult::skipped(
                order_key,
                trigger,
                SkipReason::OrderNotFound,
            ));
        };

        match order.dispatch_state {
            DispatchState::Dispatched | DispatchState::DispatchPending => {
                debug!(dispatch_state = %order.dispatch_state, "Order already claimed");
                return Ok(DispatchAttemptResult::already_dispatched(
                    order_key,
                    trigger,
                    order.courier_ref.as_ref(),
                ));
            }
            DispatchState::DispatchFailed if trigger != DispatchTrigger::Manual => {
                debug!("Previous dispatch failed permanently, waiting for a manual retry");
                return Ok(DispatchAttemptResult::skipped(
                    order_key,
                    trigger,
                    SkipReason::PreviouslyFailed,
                ));
            }
            DispatchState::DispatchFailed | DispatchState::NotDispatched => {}
        }

        if !order.is_delivery() {
            self.registry.cancel_all(order_key);
            return Ok(DispatchAttemptResult::skipped(
                order_key,
                trigger,
                SkipReason::NotDelivery,
            ));
        }
        if order.lifecycle_status.is_terminal() {
            let cancelled = self.registry.cancel_all(order_key);
            info!(
                lifecycle_status = %order.lifecycle_status,
                cancelled_jobs = cancelled,
                "Order is terminal, dispatch aborted"
            );
            return Ok(DispatchAttemptResult::skipped(
                order_key,
                trigger,
                SkipReason::LifecycleTerminal,
            ));
        }

        let claimed = if order.dispatch_state == DispatchState::DispatchFailed {
            info!("Manual trigger reclaiming failed dispatch for another attempt");
            self.store.try_reclaim_failed(order_key).await?
        } else {
            self.store.try_set_dispatch_pending(order_key).await?
        };
        if !claimed {
            return self.claim_lost(order_key, trigger).await;
        }

        let started = Instant::now();
        let created = self.courier.create_dispatch(&order).await;
        metrics::courier_call_duration().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("success", created.is_ok())],
        );

        let courier_ref = match created {
            Ok(receipt) => CourierRef::from(receipt),
            Err(courier_error) => {
                let classification = self.classifier.classify(&courier_error);
                match classification.action {
                    DispatchFailureAction::TreatAsDispatched => {
                        info!(
                            error_code = %classification.error_code,
                            "Courier already holds the order, recovering its reference"
                        );
                        self.recover_existing_reference(&order, &courier_error)
                            .await
                    }
                    DispatchFailureAction::RetryLater => {
                        let released = self
                            .write_outcome("reset_not_dispatched", || {
                                self.store.reset_not_dispatched(order_key)
                            })
                            .await;
                        if let Err(e) = released {
                            error!(
                                error = %e,
                                "Claim not released after transient courier failure"
                            );
                            self.notify_stuck_claim(&order, format!("claim not released: {e}"))
                                .await;
                            return Err(e);
                        }

                        let delay = classification.retry_delay.unwrap_or(STORE_RETRY_DELAY);
                        warn!(
                            error_category = %classification.category,
                            error_code = %classification.error_code,
                            reason = %classification.message,
                            retry_in_secs = delay.as_secs(),
                            "Transient courier failure, order released for a retry"
                        );
                        if let Err(e) = self.schedule_retry(order_key, delay) {
                            warn!(error = %e, "Could not arm dispatch retry");
                        }
                        return Ok(DispatchAttemptResult::failed(
                            order_key,
                            trigger,
                            DispatchOutcome::TransientFailure,
                            classification.category,
                        ));
                    }
                    DispatchFailureAction::MarkFailed => {
                        self.store.set_dispatch_failed(order_key).await?;
                        error!(
                            error_category = %classification.category,
                            error_code = %classification.error_code,
                            reason = %classification.message,
                            "Courier rejected the order, manual intervention required"
                        );
                        self.notifier
                            .notify(DispatchEvent::DispatchFailed {
                                order_key,
                                external_id: order.external_id.clone(),
                                reason: classification.message.clone(),
                                retryable: false,
                                occurred_at: self.clock.now(),
                            })
                            .await;
                        return Ok(DispatchAttemptResult::failed(
                            order_key,
                            trigger,
                            DispatchOutcome::PermanentFailure,
                            classification.category,
                        ));
                    }
                }
            }
        };

        let recorded = self
            .write_outcome("set_dispatched", || {
                self.store.set_dispatched(order_key, &courier_ref)
            })
            .await;
        if let Err(e) = recorded {
            error!(
                error = %e,
                courier_id = %courier_ref.external_id,
                tracking_url = ?courier_ref.tracking_url,
                "Courier accepted the order but the reference could not be stored"
            );
            self.notify_stuck_claim(
                &order,
                format!(
                    "courier reference '{}' not stored: {e}",
                    courier_ref.external_id
                ),
            )
            .await;
            return Err(e);
        }
        let cancelled = self.registry.cancel_all(order_key);
        info!(
            courier_id = %courier_ref.external_id,
            cancelled_jobs = cancelled,
            "Order dispatched to courier"
        );

        let courier_ref = if courier_ref.tracking_url.is_none() {
            self.backfill_tracking_url(order_key, courier_ref).await
        } else {
            courier_ref
        };

        self.notifier
            .notify(DispatchEvent::Dispatched {
                order_key,
                external_id: order.external_id.clone(),
                courier_ref: courier_ref.clone(),
                occurred_at: self.clock.now(),
            })
            .await;

        Ok(DispatchAttemptResult::dispatched(
            order_key,
            trigger,
            &courier_ref,
        ))
    }

    /// Arm a one-shot [`DispatchTrigger::Retry`] attempt after `delay`,
    /// replacing any retry already pending for the order
    pub fn schedule_retry(
        self: &Arc<Self>,
        order_key: OrderKey,
        delay: Duration,
    ) -> Result<JobHandle> {
        let fire_at = self.clock.now()
            + chrono::Duration::from_std(delay)
                .map_err(|e| DispatchError::scheduling(format!("retry delay: {e}")))?;
        let coordinator = Arc::clone(self);
        self.registry.schedule(
            order_key,
            JobKind::DispatchRetry,
            fire_at,
            move || async move {
                if let Err(e) = coordinator.dispatch(order_key, DispatchTrigger::Retry).await {
                    coordinator.retry_after_store_failure(order_key, &e);
                }
            },
        )
    }

    /// Called by timer jobs whose attempt returned `Err`. A persistence error
    /// re-arms a retry after [`STORE_RETRY_DELAY`]; anything else was already
    /// logged by [`dispatch`](Self::dispatch).
    pub fn retry_after_store_failure(
        self: &Arc<Self>,
        order_key: OrderKey,
        error: &DispatchError,
    ) {
        if !error.is_persistence() {
            return;
        }
        match self.schedule_retry(order_key, STORE_RETRY_DELAY) {
            Ok(handle) => warn!(
                order_key = %order_key,
                fire_at = %handle.fire_at(),
                "Store unavailable during dispatch, retry armed"
            ),
            Err(e) => warn!(order_key = %order_key, error = %e, "Could not arm dispatch retry"),
        }
    }

    /// Write a courier outcome, retrying persistence errors with a short
    /// linear backoff
    async fn write_outcome<F, Fut>(&self, write: &'static str, op: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_persistence() && attempt < OUTCOME_WRITE_ATTEMPTS => {
                    warn!(write, attempt, error = %e, "Outcome write failed, retrying");
                    tokio::time::sleep(OUTCOME_WRITE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// The order is left in `dispatch_pending` and no trigger will touch it
    async fn notify_stuck_claim(&self, order: &Order, reason: String) {
        self.notifier
            .notify(DispatchEvent::DispatchFailed {
                order_key: order.key,
                external_id: order.external_id.clone(),
                reason,
                retryable: true,
                occurred_at: self.clock.now(),
            })
            .await;
    }

    /// Another attempt won the claim; report what it left behind
    async fn claim_lost(
        &self,
        order_key: OrderKey,
        trigger: DispatchTrigger,
    ) -> Result<DispatchAttemptResult> {
        let current = self.store.get_order(order_key).await?;
        debug!(
            dispatch_state = ?current.as_ref().map(|o| o.dispatch_state),
            "Lost dispatch claim to a concurrent trigger"
        );

        Ok(match current {
            Some(order) if order.dispatch_state.is_claimed() => {
                DispatchAttemptResult::already_dispatched(order_key, trigger, order.courier_ref.as_ref())
            }
            Some(order) if order.dispatch_state == DispatchState::DispatchFailed => {
                DispatchAttemptResult::skipped(order_key, trigger, SkipReason::PreviouslyFailed)
            }
            Some(_) => DispatchAttemptResult::skipped(order_key, trigger, SkipReason::ClaimLost),
            None => DispatchAttemptResult::skipped(order_key, trigger, SkipReason::OrderNotFound),
        })
    }

    /// Look up the courier's copy of a duplicate order.
    ///
    /// Tries the id carried by the duplicate error, then the order's own
    /// external id. Falls back to a reference without tracking URL when no
    /// lookup succeeds; the courier holding the order is already established.
    async fn recover_existing_reference(&self, order: &Order, error: &CourierError) -> CourierRef {
        let existing_id = match error {
            CourierError::PermanentDuplicate { existing_id } => existing_id.clone(),
            _ => None,
        };

        let mut candidates: Vec<String> = Vec::with_capacity(2);
        if let Some(id) = existing_id {
            candidates.push(id);
        }
        if !candidates.contains(&order.external_id) {
            candidates.push(order.external_id.clone());
        }

        for courier_id in &candidates {
            match self.courier.get_status(courier_id).await {
                Ok(CourierStatus {
                    external_id,
                    tracking_url,
                    ..
                }) => {
                    return CourierRef::new(
                        external_id.unwrap_or_else(|| courier_id.clone()),
                        tracking_url,
                    );
                }
                Err(e) => {
                    debug!(courier_id = %courier_id, error = %e, "Duplicate lookup failed");
                }
            }
        }

        CourierRef::new(candidates.swap_remove(0), None)
    }

    /// Poll the courier for a tracking URL: once now, once more after the
    /// configured backoff. Failures only cost the URL.
    async fn backfill_tracking_url(&self, order_key: OrderKey, courier_ref: CourierRef) -> CourierRef {
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(self.tracking.retry_backoff()).await;
            }
            match self.courier.get_status(&courier_ref.external_id).await {
                Ok(CourierStatus {
                    tracking_url: Some(url),
                    ..
                }) => {
                    if let Err(e) = self.store.set_tracking_url(order_key, &url).await {
                        warn!(error = %e, "Failed to persist tracking URL");
                    }
                    return CourierRef {
                        tracking_url: Some(url),
                        ..courier_ref
                    };
                }
                Ok(_) => debug!(attempt, "Courier has no tracking URL yet"),
                Err(e) => debug!(attempt, error = %e, "Tracking URL lookup failed"),
            }
        }
        courier_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::database::InMemoryOrderStore;
    use crate::models::DispatchReceipt;
    use crate::orchestration::error_classifier::{ErrorCategory, ErrorClassifierConfig};
    use crate::orchestration::types::JobKind;
    use crate::state_machine::LifecycleStatus;
    use crate::test_helpers::{
        FaultyOrderStore, MockCourierClient, OrderFactory, RecordingNotificationSink,
    };
    use chrono::Utc;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryOrderStore>,
        courier: Arc<MockCourierClient>,
        sink: Arc<RecordingNotificationSink>,
        coordinator: Arc<DispatchCoordinator>,
    }

    fn fixture_with(courier: MockCourierClient) -> Fixture {
        let store = Arc::new(InMemoryOrderStore::new());
        let courier = Arc::new(courier);
        let sink = Arc::new(RecordingNotificationSink::new());
        let coordinator = Arc::new(DispatchCoordinator::new(
            store.clone(),
            courier.clone(),
            ScheduledJobRegistry::default(),
            sink.clone(),
            Arc::new(SystemClock),
        ));
        Fixture {
            store,
            courier,
            sink,
            coordinator,
        }
    }

    /// Coordinator over a store that can lag on reads and fail outcome writes
    fn faulty_fixture() -> (Arc<FaultyOrderStore>, Fixture) {
        let f = fixture();
        let faulty = Arc::new(FaultyOrderStore::new(f.store.clone()));
        let coordinator = Arc::new(DispatchCoordinator::new(
            faulty.clone(),
            f.courier.clone(),
            ScheduledJobRegistry::default(),
            f.sink.clone(),
            Arc::new(SystemClock),
        ));
        (faulty, Fixture { coordinator, ..f })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockCourierClient::new())
    }

    async fn insert(store: &InMemoryOrderStore, order: Order) -> OrderKey {
        store.upsert_order(&order).await.unwrap().key
    }

    #[tokio::test]
    async fn test_dispatch_records_courier_reference() {
        let f = fixture();
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;

        let result = f.coordinator.dispatch(key, DispatchTrigger::Immediate).await.unwrap();

        assert!(result.created_dispatch());
        assert_eq!(result.external_id.as_deref(), Some("courier-1"));
        let stored = f.store.get_order(key).await.unwrap().unwrap();
        assert_eq!(stored.dispatch_state, DispatchState::Dispatched);
        assert_eq!(stored.courier_ref.unwrap().external_id, "courier-1");
        assert_eq!(f.sink.count_named("order.dispatched"), 1);
    }

    #[tokio::test]
    async fn test_second_dispatch_is_noop() {
        let f = fixture();
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;

        f.coordinator.dispatch(key, DispatchTrigger::Immediate).await.unwrap();
        let again = f.coordinator.dispatch(key, DispatchTrigger::Scheduled).await.unwrap();

        assert_eq!(again.outcome, DispatchOutcome::AlreadyDispatched);
        assert!(again.success);
        assert_eq!(again.external_id.as_deref(), Some("courier-1"));
        assert_eq!(f.courier.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_create_one_dispatch() {
        let f = fixture_with(MockCourierClient::new().with_create_delay(Duration::from_millis(200)));
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;

        let triggers = [
            DispatchTrigger::Immediate,
            DispatchTrigger::Scheduled,
            DispatchTrigger::PostAcceptance,
            DispatchTrigger::Manual,
            DispatchTrigger::Scheduled,
        ];
        let attempts = triggers.iter().map(|trigger| {
            let coordinator = Arc::clone(&f.coordinator);
            let trigger = *trigger;
            tokio::spawn(async move { coordinator.dispatch(key, trigger).await })
        });
        let results: Vec<_> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(f.courier.create_calls(), 1);
        assert_eq!(results.iter().filter(|r| r.created_dispatch()).count(), 1);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_pickup_order_is_never_sent() {
        let f = fixture();
        let key = insert(&f.store, OrderFactory::pickup()).await;

        let result = f.coordinator.dispatch(key, DispatchTrigger::Manual).await.unwrap();

        assert_eq!(result.outcome, DispatchOutcome::Skipped(SkipReason::NotDelivery));
        assert_eq!(f.courier.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_order_aborts_and_drops_jobs() {
        let f = fixture();
        let order = OrderFactory::with_lifecycle(
            OrderFactory::delivery_without_time(),
            LifecycleStatus::Cancelled,
        );
        let key = insert(&f.store, order).await;
        f.coordinator
            .registry()
            .schedule(
                key,
                JobKind::PostAcceptanceTrigger,
                Utc::now() + chrono::Duration::minutes(20),
                || async {},
            )
            .unwrap();

        let result = f.coordinator.dispatch(key, DispatchTrigger::Scheduled).await.unwrap();

        assert_eq!(
            result.outcome,
            DispatchOutcome::Skipped(SkipReason::LifecycleTerminal)
        );
        assert!(f.coordinator.registry().is_empty());
        assert_eq!(f.courier.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_releases_claim() {
        let f = fixture();
        f.courier.push_create_response(Err(CourierError::Transient {
            reason: "upstream 503".to_string(),
            status_code: Some(503),
        }));
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;

        let result = f.coordinator.dispatch(key, DispatchTrigger::Scheduled).await.unwrap();
        assert_eq!(result.outcome, DispatchOutcome::TransientFailure);
        assert_eq!(result.error_class, Some(ErrorCategory::Transient));
        assert_eq!(
            f.store.get_dispatch_state(key).await.unwrap(),
            Some(DispatchState::NotDispatched)
        );
        assert_eq!(f.sink.count_named("order.dispatch_failed"), 0);

        let retry = f.coordinator.dispatch(key, DispatchTrigger::PostAcceptance).await.unwrap();
        assert!(retry.created_dispatch());
    }

    #[tokio::test]
    async fn test_permanent_failure_parks_order_until_manual_retry() {
        let f = fixture();
        f.courier
            .push_create_response(Err(CourierError::permanent("address outside service area")));
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;

        let result = f.coordinator.dispatch(key, DispatchTrigger::Scheduled).await.unwrap();
        assert_eq!(result.outcome, DispatchOutcome::PermanentFailure);
        assert_eq!(
            f.store.get_dispatch_state(key).await.unwrap(),
            Some(DispatchState::DispatchFailed)
        );
        assert_eq!(f.sink.count_named("order.dispatch_failed"), 1);

        let automatic = f.coordinator.dispatch(key, DispatchTrigger::PostAcceptance).await.unwrap();
        assert_eq!(
            automatic.outcome,
            DispatchOutcome::Skipped(SkipReason::PreviouslyFailed)
        );
        assert_eq!(f.courier.create_calls(), 1);

        let manual = f.coordinator.dispatch(key, DispatchTrigger::Manual).await.unwrap();
        assert!(manual.created_dispatch());
        assert_eq!(f.courier.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_recovers_existing_reference() {
        let f = fixture();
        f.courier.push_create_response(Err(CourierError::PermanentDuplicate {
            existing_id: Some("c-existing".to_string()),
        }));
        f.courier.set_status_response(
            "c-existing",
            Ok(CourierStatus {
                external_id: Some("c-existing".to_string()),
                status: "assigned".to_string(),
                tracking_url: Some("https://courier.test/track/c-existing".to_string()),
            }),
        );
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;

        let result = f.coordinator.dispatch(key, DispatchTrigger::Immediate).await.unwrap();

        assert!(result.success);
        assert_eq!(result.external_id.as_deref(), Some("c-existing"));
        let stored = f.store.get_order(key).await.unwrap().unwrap();
        assert_eq!(stored.dispatch_state, DispatchState::Dispatched);
        assert_eq!(
            stored.courier_ref.unwrap().tracking_url.as_deref(),
            Some("https://courier.test/track/c-existing")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_without_lookup_uses_order_external_id() {
        let f = fixture();
        f.courier
            .push_create_response(Err(CourierError::PermanentDuplicate { existing_id: None }));
        let order = OrderFactory::delivery_without_time();
        let external_id = order.external_id.clone();
        let key = insert(&f.store, order).await;

        let result = f.coordinator.dispatch(key, DispatchTrigger::Immediate).await.unwrap();

        assert!(result.success);
        assert_eq!(result.external_id.as_deref(), Some(external_id.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracking_url_polled_twice_when_missing() {
        let f = fixture_with(MockCourierClient::new().without_tracking_urls());
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;

        let result = f.coordinator.dispatch(key, DispatchTrigger::Immediate).await.unwrap();

        assert!(result.created_dispatch());
        assert!(result.tracking_url.is_none());
        assert_eq!(f.courier.status_lookups(), vec!["courier-1", "courier-1"]);
    }

    #[tokio::test]
    async fn test_tracking_url_backfilled_from_status() {
        let f = fixture_with(MockCourierClient::new().without_tracking_urls());
        f.courier.push_create_response(Ok(DispatchReceipt {
            external_id: "c-7".to_string(),
            tracking_url: None,
        }));
        f.courier.set_status_response(
            "c-7",
            Ok(CourierStatus {
                external_id: Some("c-7".to_string()),
                status: "assigned".to_string(),
                tracking_url: Some("https://courier.test/track/c-7".to_string()),
            }),
        );
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;

        let result = f.coordinator.dispatch(key, DispatchTrigger::Immediate).await.unwrap();

        assert_eq!(
            result.tracking_url.as_deref(),
            Some("https://courier.test/track/c-7")
        );
        let stored = f.store.get_order(key).await.unwrap().unwrap();
        assert_eq!(
            stored.courier_ref.unwrap().tracking_url.as_deref(),
            Some("https://courier.test/track/c-7")
        );
        assert_eq!(f.courier.status_lookups().len(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_persistence_error() {
        let f = fixture();
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;
        f.store.set_unavailable(true);

        let err = f.coordinator.dispatch(key, DispatchTrigger::Scheduled).await.unwrap_err();

        assert!(err.is_persistence());
        assert_eq!(f.courier.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_order_is_skipped() {
        let f = fixture();
        let result = f
            .coordinator
            .dispatch(OrderKey::new(), DispatchTrigger::Scheduled)
            .await
            .unwrap();
        assert_eq!(result.outcome, DispatchOutcome::Skipped(SkipReason::OrderNotFound));
    }

    #[tokio::test]
    async fn test_success_cancels_other_jobs() {
        let f = fixture();
        let order = OrderFactory::delivery_due_in(Utc::now(), 90);
        let key = insert(&f.store, order).await;
        let at = Utc::now() + chrono::Duration::minutes(60);
        f.coordinator
            .registry()
            .schedule(key, JobKind::DeliveryTimeTrigger, at, || async {})
            .unwrap();
        f.coordinator
            .registry()
            .schedule(key, JobKind::PostAcceptanceTrigger, at, || async {})
            .unwrap();

        f.coordinator.dispatch(key, DispatchTrigger::Manual).await.unwrap();

        assert!(f.coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_racing_manual_retries_reach_courier_once() {
        let (faulty, f) = faulty_fixture();
        f.courier
            .push_create_response(Err(CourierError::permanent("address outside service area")));
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;
        f.coordinator.dispatch(key, DispatchTrigger::Manual).await.unwrap();
        assert_eq!(
            f.store.get_dispatch_state(key).await.unwrap(),
            Some(DispatchState::DispatchFailed)
        );

        // both retries read dispatch_failed before either one claims
        faulty.set_read_latency(Duration::from_millis(5));
        let retries = (0..2).map(|_| {
            let coordinator = Arc::clone(&f.coordinator);
            tokio::spawn(async move { coordinator.dispatch(key, DispatchTrigger::Manual).await })
        });
        let results: Vec<_> = futures::future::join_all(retries)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(f.courier.create_calls(), 2);
        assert_eq!(f.courier.successful_creates_for(key), 1);
        assert_eq!(results.iter().filter(|r| r.created_dispatch()).count(), 1);
        assert_eq!(
            f.store.get_dispatch_state(key).await.unwrap(),
            Some(DispatchState::Dispatched)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_arms_retry_that_dispatches() {
        let f = fixture();
        f.courier.push_create_response(Err(CourierError::Transient {
            reason: "upstream 503".to_string(),
            status_code: Some(503),
        }));
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;

        let result = f.coordinator.dispatch(key, DispatchTrigger::Immediate).await.unwrap();
        assert_eq!(result.outcome, DispatchOutcome::TransientFailure);
        assert!(f.coordinator.registry().is_armed(key, JobKind::DispatchRetry));

        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;

        assert_eq!(f.courier.create_calls(), 2);
        assert_eq!(
            f.store.get_dispatch_state(key).await.unwrap(),
            Some(DispatchState::Dispatched)
        );
        assert!(f.coordinator.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_the_classified_delay() {
        let f = fixture();
        let coordinator = Arc::new(
            DispatchCoordinator::new(
                f.store.clone(),
                f.courier.clone(),
                ScheduledJobRegistry::default(),
                f.sink.clone(),
                Arc::new(SystemClock),
            )
            .with_classifier(CourierErrorClassifier::with_config(ErrorClassifierConfig {
                rate_limit_delay: Duration::from_secs(120),
                ..ErrorClassifierConfig::default()
            })),
        );
        f.courier.push_create_response(Err(CourierError::Transient {
            reason: "slow down".to_string(),
            status_code: Some(429),
        }));
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;

        coordinator.dispatch(key, DispatchTrigger::Scheduled).await.unwrap();

        let retry = coordinator
            .registry()
            .armed_jobs()
            .into_iter()
            .find(|job| job.kind() == JobKind::DispatchRetry)
            .unwrap();
        let wait = retry.fire_at() - Utc::now();
        assert!(wait > chrono::Duration::seconds(110));

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(f.courier.create_calls(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(f.courier.create_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcome_write_recovers_from_brief_store_failure() {
        let (faulty, f) = faulty_fixture();
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;
        faulty.fail_outcome_writes(2);

        let result = f.coordinator.dispatch(key, DispatchTrigger::Immediate).await.unwrap();

        assert!(result.created_dispatch());
        let stored = f.store.get_order(key).await.unwrap().unwrap();
        assert_eq!(stored.dispatch_state, DispatchState::Dispatched);
        assert_eq!(stored.courier_ref.unwrap().external_id, "courier-1");
        assert_eq!(f.sink.count_named("order.dispatch_failed"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_courier_reference_is_reported() {
        let (faulty, f) = faulty_fixture();
        let key = insert(&f.store, OrderFactory::delivery_without_time()).await;
        faulty.fail_outcome_writes(usize::MAX);

        let err = f
            .coordinator
            .dispatch(key, DispatchTrigger::Immediate)
            .await
            .unwrap_err();

        assert!(err.is_persistence());
        assert_eq!(f.courier.successful_creates_for(key), 1);
        let reported = f.sink.events_for(key);
        assert!(matches!(
            reported.as_slice(),
            [DispatchEvent::DispatchFailed { retryable: true, reason, .. }]
                if reason.contains("courier-1")
        ));
    }
}
