//! # Mock Courier
//!
//! Scriptable [`CourierClient`] double. By default every create call succeeds
//! with a fresh `courier-N` id and tracking URL, and the new delivery becomes
//! visible to `get_status` with status `created`. Unknown ids answer
//! `NotFound`.

use crate::courier::{CourierClient, CourierResult};
use crate::error::CourierError;
use crate::models::{CourierStatus, DispatchReceipt, Order, OrderKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug)]
struct MockCourierState {
    create_responses: VecDeque<CourierResult<DispatchReceipt>>,
    statuses: HashMap<String, CourierResult<CourierStatus>>,
    created: Vec<OrderKey>,
    create_calls: usize,
    status_lookups: Vec<String>,
    ready_notifications: Vec<String>,
    next_id: u64,
    issue_tracking_urls: bool,
    create_delay: Option<Duration>,
}

#[derive(Debug)]
pub struct MockCourierClient {
    state: Mutex<MockCourierState>,
}

impl Default for MockCourierClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCourierClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockCourierState {
                create_responses: VecDeque::new(),
                statuses: HashMap::new(),
                created: Vec::new(),
                create_calls: 0,
                status_lookups: Vec::new(),
                ready_notifications: Vec::new(),
                next_id: 1,
                issue_tracking_urls: true,
                create_delay: None,
            }),
        }
    }

    /// Successful creates come back without a tracking URL
    pub fn without_tracking_urls(self) -> Self {
        self.state.lock().issue_tracking_urls = false;
        self
    }

    /// Hold every create call open for `delay` to widen race windows
    pub fn with_create_delay(self, delay: Duration) -> Self {
        self.state.lock().create_delay = Some(delay);
        self
    }

    /// Queue a scripted answer for the next create call
    pub fn push_create_response(&self, response: CourierResult<DispatchReceipt>) {
        self.state.lock().create_responses.push_back(response);
    }

    /// Set the status string the courier reports for `courier_id`
    pub fn set_status(&self, courier_id: &str, status: &str) {
        let mut state = self.state.lock();
        if let Some(Ok(existing)) = state.statuses.get_mut(courier_id) {
            existing.status = status.to_string();
            return;
        }
        state.statuses.insert(
            courier_id.to_string(),
            Ok(CourierStatus {
                external_id: Some(courier_id.to_string()),
                status: status.to_string(),
                tracking_url: None,
            }),
        );
    }

    pub fn set_status_response(&self, courier_id: &str, response: CourierResult<CourierStatus>) {
        self.state
            .lock()
            .statuses
            .insert(courier_id.to_string(), response);
    }

    /// Every create call, including failed ones
    pub fn create_calls(&self) -> usize {
        self.state.lock().create_calls
    }

    /// Orders for which a create call succeeded, in call order
    pub fn created_orders(&self) -> Vec<OrderKey> {
        self.state.lock().created.clone()
    }

    pub fn successful_creates_for(&self, order_key: OrderKey) -> usize {
        self.state
            .lock()
            .created
            .iter()
            .filter(|k| **k == order_key)
            .count()
    }

    pub fn status_lookups(&self) -> Vec<String> {
        self.state.lock().status_lookups.clone()
    }

    pub fn ready_notifications(&self) -> Vec<String> {
        self.state.lock().ready_notifications.clone()
    }
}

#[async_trait]
impl CourierClient for MockCourierClient {
    async fn create_dispatch(&self, order: &Order) -> CourierResult<DispatchReceipt> {
        let delay = {
            let mut state = self.state.lock();
            state.create_calls += 1;
            state.create_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        let response = match state.create_responses.pop_front() {
            Some(response) => response,
            None => {
                let id = format!("courier-{}", state.next_id);
                state.next_id += 1;
                let tracking_url = state
                    .issue_tracking_urls
                    .then(|| format!("https://courier.test/track/{id}"));
                Ok(DispatchReceipt {
                    external_id: id,
                    tracking_url,
                })
            }
        };

        if let Ok(receipt) = &response {
            state.created.push(order.key);
            state
                .statuses
                .entry(receipt.external_id.clone())
                .or_insert_with(|| {
                    Ok(CourierStatus {
                        external_id: Some(receipt.external_id.clone()),
                        status: "created".to_string(),
                        tracking_url: receipt.tracking_url.clone(),
                    })
                });
        }
        response
    }

    async fn get_status(&self, courier_id: &str) -> CourierResult<CourierStatus> {
        let mut state = self.state.lock();
        state.status_lookups.push(courier_id.to_string());
        state
            .statuses
            .get(courier_id)
            .cloned()
            .unwrap_or_else(|| Err(CourierError::not_found(courier_id)))
    }

    async fn notify_ready_for_pickup(&self, courier_id: &str) -> CourierResult<()> {
        self.state
            .lock()
            .ready_notifications
            .push(courier_id.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
