//! # Courier Client
//!
//! Narrow interface to the third-party courier. Wire formats live in the
//! implementation; the dispatch core only relies on the error taxonomy in
//! [`CourierError`](crate::error::CourierError).

pub mod status;
pub mod tracking;

use crate::error::CourierError;
use crate::models::{CourierStatus, DispatchReceipt, Order};
use async_trait::async_trait;

pub use status::map_courier_status;
pub use tracking::extract_courier_id;

pub type CourierResult<T> = std::result::Result<T, CourierError>;

#[async_trait]
pub trait CourierClient: Send + Sync + 'static {
    /// Hand the order to the courier.
    ///
    /// Returns `PermanentDuplicate` when the courier already holds the order
    /// under its idempotency key.
    async fn create_dispatch(&self, order: &Order) -> CourierResult<DispatchReceipt>;

    /// Current courier-side status for a courier identifier
    async fn get_status(&self, courier_id: &str) -> CourierResult<CourierStatus>;

    /// Tell the courier the order is packed and waiting
    async fn notify_ready_for_pickup(&self, courier_id: &str) -> CourierResult<()>;

    fn name(&self) -> &str {
        "courier"
    }
}
