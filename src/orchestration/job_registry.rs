//! # Scheduled Job Registry
//!
//! Owns every pending dispatch timer in the process. Jobs are keyed by
//! `(OrderKey, JobKind)`, so an order has at most one delivery-time job and
//! one post-acceptance job at any moment; scheduling again replaces the
//! previous job.
//!
//! ## Firing and cancellation
//!
//! Each job is a tokio task that sleeps until its fire time. On wake-up it
//! removes its own entry, but only if the entry still carries its job id.
//! Only then does it run the callback. Cancellation removes the entry and
//! aborts the task. The two paths meet on the same map entry:
//!
//! - cancel wins: the entry is gone when the task wakes, the callback never runs
//! - fire wins: cancel finds nothing and returns `false`; the callback runs to
//!   completion, since its task handle left the map together with the entry
//!
//! Callers only ever cancel by key. [`JobHandle`] is an opaque receipt for
//! introspection.

use crate::clock::{Clock, SystemClock};
use crate::error::{DispatchError, Result};
use crate::metrics;
use crate::models::OrderKey;
use crate::orchestration::types::JobKind;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use opentelemetry::KeyValue;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct JobKey {
    order_key: OrderKey,
    kind: JobKind,
}

#[derive(Debug)]
struct JobEntry {
    id: u64,
    fire_at: DateTime<Utc>,
    task: JoinHandle<()>,
}

/// Receipt for an armed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    id: u64,
    order_key: OrderKey,
    kind: JobKind,
    fire_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn order_key(&self) -> OrderKey {
        self.order_key
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn fire_at(&self) -> DateTime<Utc> {
        self.fire_at
    }
}

#[derive(Debug)]
struct RegistryInner {
    jobs: DashMap<JobKey, JobEntry>,
    next_id: AtomicU64,
    stopped: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl RegistryInner {
    fn abort_entry(&self, key: &JobKey) -> bool {
        match self.jobs.remove(key) {
            Some((_, entry)) => {
                entry.task.abort();
                true
            }
            None => false,
        }
    }
}

/// Process-wide registry of dispatch timers. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ScheduledJobRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for ScheduledJobRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ScheduledJobRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                jobs: DashMap::new(),
                next_id: AtomicU64::new(1),
                stopped: AtomicBool::new(false),
                clock,
            }),
        }
    }

    /// Arm `on_fire` to run at `fire_at`, replacing any job already armed for
    /// the same order and kind. A `fire_at` in the past fires on the next tick.
    ///
    /// Fails with [`DispatchError::Scheduling`] when called outside a tokio
    /// runtime or after [`stop`](Self::stop).
    pub fn schedule<F, Fut>(
        &self,
        order_key: OrderKey,
        kind: JobKind,
        fire_at: DateTime<Utc>,
        on_fire: F,
    ) -> Result<JobHandle>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(DispatchError::scheduling("job registry is stopped"));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DispatchError::scheduling(format!("no timer runtime available: {e}")))?;

        let key = JobKey { order_key, kind };
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let delay = (fire_at - self.inner.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        // The task must not wake before its entry is in the map, otherwise it
        // would mistake itself for a cancelled job.
        let (armed_tx, armed_rx) = oneshot::channel::<()>();
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);

        let task = runtime.spawn(async move {
            if armed_rx.await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;

            let Some(inner) = registry.upgrade() else {
                return;
            };
            let claimed = inner
                .jobs
                .remove_if(&key, |_, entry| entry.id == id)
                .is_some();
            drop(inner);
            if !claimed {
                return;
            }

            debug!(
                order_key = %key.order_key,
                kind = %key.kind,
                job_id = id,
                "Scheduled job fired"
            );
            on_fire().await;
        });

        if let Some(previous) = self.inner.jobs.insert(key, JobEntry { id, fire_at, task }) {
            previous.task.abort();
            debug!(
                order_key = %order_key,
                kind = %kind,
                replaced_fire_at = %previous.fire_at,
                "Replaced scheduled job"
            );
        }

        // stop() may have drained the map between the check above and insert
        if self.inner.stopped.load(Ordering::Acquire) {
            self.inner.jobs.remove_if(&key, |_, entry| entry.id == id);
            return Err(DispatchError::scheduling("job registry is stopped"));
        }
        let _ = armed_tx.send(());

        metrics::jobs_scheduled_total().add(1, &[KeyValue::new("kind", kind.as_str())]);
        debug!(
            order_key = %order_key,
            kind = %kind,
            fire_at = %fire_at,
            delay_secs = delay.as_secs(),
            "Armed scheduled job"
        );

        Ok(JobHandle {
            id,
            order_key,
            kind,
            fire_at,
        })
    }

    /// Cancel the pending job for this order and kind.
    ///
    /// Returns `false` when nothing was armed or the job already started
    /// firing.
    pub fn cancel(&self, order_key: OrderKey, kind: JobKind) -> bool {
        let cancelled = self.inner.abort_entry(&JobKey { order_key, kind });
        if cancelled {
            debug!(order_key = %order_key, kind = %kind, "Cancelled scheduled job");
        }
        cancelled
    }

    /// Cancel every job for the order; returns how many were still pending
    pub fn cancel_all(&self, order_key: OrderKey) -> usize {
        JobKind::ALL
            .iter()
            .filter(|kind| self.cancel(order_key, **kind))
            .count()
    }

    /// Cancel everything and refuse new jobs
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        let keys: Vec<JobKey> = self.inner.jobs.iter().map(|entry| *entry.key()).collect();
        let cancelled = keys
            .iter()
            .filter(|key| self.inner.abort_entry(key))
            .count();
        info!(cancelled, "Job registry stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn is_armed(&self, order_key: OrderKey, kind: JobKind) -> bool {
        self.inner.jobs.contains_key(&JobKey { order_key, kind })
    }

    /// Whether this exact job is still pending (not replaced, cancelled or fired)
    pub fn is_current(&self, handle: &JobHandle) -> bool {
        self.inner
            .jobs
            .get(&JobKey {
                order_key: handle.order_key,
                kind: handle.kind,
            })
            .is_some_and(|entry| entry.id == handle.id)
    }

    /// Snapshot of all pending jobs
    pub fn armed_jobs(&self) -> Vec<JobHandle> {
        self.inner
            .jobs
            .iter()
            .map(|entry| JobHandle {
                id: entry.id,
                order_key: entry.key().order_key,
                kind: entry.key().kind,
                fire_at: entry.fire_at,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.jobs.is_empty()
    }
}
