mod common;

use common::{advance, harness, harness_with, quiet_config};
use dispatch_core::database::OrderStore;
use dispatch_core::events::DispatchEvent;
use dispatch_core::state_machine::LifecycleStatus;
use dispatch_core::test_helpers::{MockCourierClient, OrderFactory};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn courier_cancellation_is_written_once_across_sweeps() {
    let mut config = quiet_config();
    config.reconciliation.enabled = true;
    let h = harness_with(config, MockCourierClient::new());
    h.service.start().await.unwrap();

    let order = OrderFactory::delivery_without_time();
    let ingested = h.service.on_order_ingested(order.clone()).await.unwrap();
    assert!(matches!(
        ingested.delivery,
        dispatch_core::orchestration::ScheduleOutcome::Dispatched(ref r) if r.created_dispatch()
    ));
    h.courier.set_status("courier-1", "Cancelled by courier");

    // first sweep after the initial delay, second one interval later
    advance(Duration::from_secs(16)).await;
    advance(Duration::from_secs(120)).await;

    let stored = h.store.get_order(order.key).await.unwrap().unwrap();
    assert_eq!(stored.lifecycle_status, LifecycleStatus::Cancelled);
    assert_eq!(h.notifier.count_named("order.status_changed"), 1);

    match h.notifier.events_for(order.key).last() {
        Some(DispatchEvent::StatusChanged { from, to, .. }) => {
            assert_eq!(*from, LifecycleStatus::Pending);
            assert_eq!(*to, LifecycleStatus::Cancelled);
        }
        other => panic!("expected a status change, got {other:?}"),
    }

    h.service.shutdown().await;
}

#[tokio::test]
async fn delivered_orders_leave_the_sweep_set() {
    let h = harness();
    let order = OrderFactory::dispatched("courier-41", None);
    h.store.upsert_order(&order).await.unwrap();
    h.courier.set_status("courier-41", "delivered");

    let first = h.service.sweeper().sweep().await.unwrap();
    let second = h.service.sweeper().sweep().await.unwrap();

    assert_eq!(first.examined, 1);
    assert_eq!(first.corrected, 1);
    assert_eq!(second.examined, 0);
    let stored = h.store.get_order(order.key).await.unwrap().unwrap();
    assert_eq!(stored.lifecycle_status, LifecycleStatus::Delivered);
}

#[tokio::test]
async fn unknown_courier_statuses_leave_orders_alone() {
    let h = harness();
    let order = OrderFactory::dispatched("courier-42", None);
    h.store.upsert_order(&order).await.unwrap();
    h.courier.set_status("courier-42", "driver_assigned");

    let summary = h.service.sweeper().sweep().await.unwrap();

    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.corrected, 0);
    assert_eq!(h.notifier.count_named("order.status_changed"), 0);
}

#[tokio::test]
async fn lookup_falls_back_to_tracking_url_identifier() {
    let h = harness();
    let order = OrderFactory::dispatched(
        "legacy-ref",
        Some("https://courier.test/track/courier-43"),
    );
    h.store.upsert_order(&order).await.unwrap();
    h.courier.set_status("courier-43", "completed");

    let summary = h.service.sweeper().sweep().await.unwrap();

    assert_eq!(summary.corrected, 1);
    assert_eq!(
        h.courier.status_lookups(),
        vec!["legacy-ref".to_string(), "courier-43".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn sweeper_stops_on_shutdown() {
    let mut config = quiet_config();
    config.reconciliation.enabled = true;
    let h = harness_with(config, MockCourierClient::new());
    let order = OrderFactory::dispatched("courier-44", None);
    h.store.upsert_order(&order).await.unwrap();

    h.service.start().await.unwrap();
    assert!(h.service.is_running());
    h.service.shutdown().await;

    h.courier.set_status("courier-44", "cancelled");
    advance(Duration::from_secs(600)).await;

    assert!(h.courier.status_lookups().is_empty());
    let stored = h.store.get_order(order.key).await.unwrap().unwrap();
    assert_eq!(stored.lifecycle_status, LifecycleStatus::Accepted);
}
