//! # Dispatch Orchestration
//!
//! Decides when an order is handed to the courier and makes sure that
//! happens at most once, however many triggers race for it.
//!
//! ## Triggers
//!
//! - **Immediate**: at ingestion, when the delivery time is missing, past or too close
//! - **Scheduled**: delivery-time job firing `buffer` before the declared time
//! - **PostAcceptance**: fallback job armed when the order is accepted
//! - **Manual**: ready-for-pickup or operator retry
//!
//! Every trigger ends up in [`DispatchCoordinator::dispatch`], which claims
//! the order with a compare-and-set on its dispatch state before calling the
//! courier. Losing the claim is a no-op, not an error.
//!
//! ## Core Components
//!
//! - **TriggerTimeCalculator**: delivery time to fire time, or dispatch now
//! - **ScheduledJobRegistry**: one cancellable timer per (order, job kind)
//! - **DispatchCoordinator**: the idempotent dispatch gate
//! - **CourierErrorClassifier**: courier failures to retry/fail/recover
//! - **DeliveryScheduler** and **PostAcceptanceScheduler**: arm the two job kinds
//! - **ReconciliationSweeper**: pulls courier status back into the lifecycle
//! - **RestoreOnStartup**: re-arms jobs lost with the previous process
//! - **DispatchService**: wiring plus the intake hooks

pub mod bootstrap;
pub mod delivery_scheduler;
pub mod dispatch_coordinator;
pub mod error_classifier;
pub mod job_registry;
pub mod post_acceptance;
pub mod reconciliation;
pub mod restore;
pub mod trigger_time;
pub mod types;

pub use bootstrap::{DispatchService, DispatchServiceBuilder, IngestOutcome};
pub use delivery_scheduler::{DeliveryScheduler, ScheduleOutcome};
pub use dispatch_coordinator::DispatchCoordinator;
pub use error_classifier::{
    CourierErrorClassifier, DispatchFailureAction, ErrorCategory, ErrorClassification,
    ErrorClassifierConfig,
};
pub use job_registry::{JobHandle, ScheduledJobRegistry};
pub use post_acceptance::{PostAcceptanceOutcome, PostAcceptanceScheduler};
pub use reconciliation::{candidate_courier_ids, ReconciliationSweeper, SweepSummary};
pub use restore::{RestoreOnStartup, RestoreSummary};
pub use trigger_time::TriggerTimeCalculator;
pub use types::{
    DispatchAttemptResult, DispatchOutcome, DispatchTrigger, ImmediateReason, JobKind,
    SkipReason, TriggerDecision,
};
