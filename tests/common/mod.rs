#![allow(dead_code)]

use dispatch_core::config::DispatchConfig;
use dispatch_core::database::InMemoryOrderStore;
use dispatch_core::orchestration::DispatchService;
use dispatch_core::test_helpers::{MockCourierClient, RecordingNotificationSink};
use std::sync::Arc;
use std::time::Duration;

/// A dispatch service wired to in-memory doubles, with handles on each double
pub struct Harness {
    pub service: DispatchService,
    pub store: Arc<InMemoryOrderStore>,
    pub courier: Arc<MockCourierClient>,
    pub notifier: Arc<RecordingNotificationSink>,
}

/// Defaults with the background sweeper off; tests call `sweep()` directly
pub fn quiet_config() -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.reconciliation.enabled = false;
    config
}

pub fn harness() -> Harness {
    harness_with(quiet_config(), MockCourierClient::new())
}

pub fn harness_with(config: DispatchConfig, courier: MockCourierClient) -> Harness {
    harness_on(Arc::new(InMemoryOrderStore::new()), Arc::new(courier), config)
}

/// Service over an existing store and courier, as after a process restart
pub fn harness_on(
    store: Arc<InMemoryOrderStore>,
    courier: Arc<MockCourierClient>,
    config: DispatchConfig,
) -> Harness {
    let notifier = Arc::new(RecordingNotificationSink::new());
    let service = DispatchService::builder(config, store.clone(), courier.clone())
        .with_notifier(notifier.clone())
        .build();
    Harness {
        service,
        store,
        courier,
        notifier,
    }
}

/// Let spawned job tasks run to their next await point
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Move paused time forward and let fired jobs finish
pub async fn advance(by: Duration) {
    tokio::time::sleep(by).await;
    settle().await;
}

pub fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}
