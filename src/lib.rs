#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Dispatch Core Rust
//!
//! Delayed dispatch scheduling and idempotent courier dispatch for an order
//! intake service.
//!
//! ## Overview
//!
//! Delivery orders arrive with a declared delivery time. The core decides when
//! to request a courier (immediately, or `buffer` minutes before the declared
//! time), arms in-process timers for that, and falls back to a randomized
//! post-acceptance trigger in case the scheduled one is lost. However many
//! triggers fire, the courier is asked for exactly one dispatch per order.
//!
//! A periodic sweep asks the courier about dispatched orders and moves the
//! local lifecycle forward when the courier reports delivery or cancellation.
//!
//! ## Module Organization
//!
//! - [`models`] - Orders, courier references and receipts
//! - [`state_machine`] - Lifecycle and dispatch states with their guards
//! - [`database`] - `OrderStore` with in-memory and PostgreSQL backends
//! - [`courier`] - `CourierClient` boundary, status mapping, tracking URLs
//! - [`orchestration`] - Trigger scheduling, the dispatch gate, reconciliation
//! - [`events`] - Notifications emitted on dispatch and status changes
//! - [`config`] - Layered TOML and environment configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dispatch_core::config::DispatchConfig;
//! use dispatch_core::database::InMemoryOrderStore;
//! use dispatch_core::models::{Order, OrderKind};
//! use dispatch_core::orchestration::DispatchService;
//! use dispatch_core::test_helpers::MockCourierClient;
//! use std::sync::Arc;
//!
//! # async fn example() -> dispatch_core::Result<()> {
//! let service = DispatchService::builder(
//!     DispatchConfig::default(),
//!     Arc::new(InMemoryOrderStore::new()),
//!     Arc::new(MockCourierClient::new()),
//! )
//! .build();
//!
//! service.start().await?;
//!
//! let mut order = Order::new("ext-1001", OrderKind::Delivery);
//! order.declared_delivery_time = Some(chrono::Utc::now() + chrono::Duration::hours(2));
//! service.on_order_ingested(order).await?;
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib                     # Unit tests, paused-clock timers
//! cargo test --no-default-features     # Without the PostgreSQL backend
//! ```

pub mod clock;
pub mod config;
pub mod courier;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod test_helpers;

pub use clock::{Clock, SystemClock};
pub use config::{ConfigLoader, DispatchConfig};
pub use courier::CourierClient;
pub use database::{InMemoryOrderStore, OrderStore};
pub use error::{CourierError, DispatchError, Result};
pub use events::{DispatchEvent, NotificationSink};
pub use models::{CourierRef, CourierStatus, DispatchReceipt, Order, OrderKey, OrderKind};
pub use orchestration::{
    DispatchAttemptResult, DispatchCoordinator, DispatchOutcome, DispatchService,
    DispatchTrigger, JobKind, ScheduledJobRegistry,
};
pub use state_machine::{DispatchState, LifecycleStatus};
