//! # Trigger Time Calculation
//!
//! Decides when a delivery order should be handed to the courier: a fixed
//! lead buffer before the declared delivery time, or right away when there is
//! no time to wait.

use crate::config::SchedulingConfig;
use crate::models::Order;
use crate::orchestration::types::{ImmediateReason, TriggerDecision};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerTimeCalculator {
    buffer: Duration,
    min_lead: Duration,
}

impl TriggerTimeCalculator {
    pub fn new(buffer: Duration, min_lead: Duration) -> Self {
        Self { buffer, min_lead }
    }

    pub fn from_config(config: &SchedulingConfig) -> Self {
        Self::new(config.buffer(), config.min_lead())
    }

    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    /// Compute the trigger for `order` as seen at `now`.
    ///
    /// Returns `None` for non-delivery orders; those are never scheduled.
    pub fn compute(&self, order: &Order, now: DateTime<Utc>) -> Option<TriggerDecision> {
        if !order.is_delivery() {
            return None;
        }

        let Some(declared) = order.declared_delivery_time else {
            return Some(TriggerDecision::Immediate {
                reason: ImmediateReason::NoDeliveryTime,
            });
        };

        let fire_at = declared - self.buffer;
        if fire_at <= now {
            return Some(TriggerDecision::Immediate {
                reason: ImmediateReason::ScheduledTimePassed,
            });
        }
        if fire_at - now < self.min_lead {
            return Some(TriggerDecision::Immediate {
                reason: ImmediateReason::TooSoon,
            });
        }

        Some(TriggerDecision::ScheduledAt(fire_at))
    }
}

impl Default for TriggerTimeCalculator {
    fn default() -> Self {
        Self::from_config(&SchedulingConfig::default())
    }
}
