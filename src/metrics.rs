//! # Dispatch Metrics
//!
//! OpenTelemetry instruments for the dispatch core. Instruments are recorded
//! against the global meter provider; without an installed provider they are
//! no-ops.
//!
//! Labels used across instruments:
//! - `trigger`: immediate, scheduled, post_acceptance, manual
//! - `outcome`: dispatched, already_dispatched, skipped, transient_failure, permanent_failure

use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::sync::OnceLock;

static DISPATCH_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    DISPATCH_METER.get_or_init(|| opentelemetry::global::meter("dispatch-core"))
}

// Counters

/// Dispatch attempts by trigger and outcome
pub fn dispatch_attempts_total() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.attempts.total")
        .with_description("Dispatch attempts by trigger and outcome")
        .build()
}

/// Jobs armed, labelled by job kind
pub fn jobs_scheduled_total() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.jobs.scheduled.total")
        .with_description("Scheduled dispatch jobs armed")
        .build()
}

/// Local lifecycle corrections applied by the reconciliation sweep
pub fn reconciliation_corrections_total() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.reconciliation.corrections.total")
        .with_description("Lifecycle corrections applied by reconciliation")
        .build()
}

/// Orders re-armed or dispatched by the startup restore
pub fn restored_orders_total() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.restore.orders.total")
        .with_description("Orders recovered at startup")
        .build()
}

// Histograms

/// Courier create call latency in milliseconds
pub fn courier_call_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("dispatch.courier.call.duration")
        .with_description("Courier create dispatch latency")
        .with_unit("ms")
        .build()
}

/// Reconciliation sweep duration in milliseconds
pub fn sweep_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("dispatch.reconciliation.sweep.duration")
        .with_description("Reconciliation sweep duration")
        .with_unit("ms")
        .build()
}
