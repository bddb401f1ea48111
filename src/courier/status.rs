//! Courier status vocabulary mapped onto local lifecycle status.

use crate::state_machine::LifecycleStatus;

const CANCELLED_FAMILY: &[&str] = &[
    "cancelled",
    "canceled",
    "cancelled_by_courier",
    "cancelled_by_customer",
    "cancelled_by_merchant",
    "rejected",
    "returned",
    "failed",
];

const DELIVERED_FAMILY: &[&str] = &["delivered", "completed", "complete", "dropped_off"];

/// Local status implied by a courier status; `None` when nothing terminal happened
pub fn map_courier_status(courier_status: &str) -> Option<LifecycleStatus> {
    let normalized = courier_status.trim().to_ascii_lowercase().replace([' ', '-'], "_");

    if CANCELLED_FAMILY.contains(&normalized.as_str()) {
        Some(LifecycleStatus::Cancelled)
    } else if DELIVERED_FAMILY.contains(&normalized.as_str()) {
        Some(LifecycleStatus::Delivered)
    } else {
        None
    }
}
