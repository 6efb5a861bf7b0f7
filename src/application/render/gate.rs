//! Admission control for the shared rendering worker.
//!
//! A counting gate with `capacity` slots and a bounded FIFO wait queue. A slot
//! freed while callers are waiting is handed straight to the oldest waiter:
//! `active` is never decremented and re-incremented, so a fresh caller cannot
//! overtake the queue between the two steps.
//!
//! Each queued entry is resolved exactly once. Whoever removes the entry from
//! the queue while holding the state lock owns it: either [`GatePermit`]'s
//! release (grant) or the waiter's own deadline (timeout). The loser finds the
//! entry gone and defers to the outcome already placed in its channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::util::lock::mutex_lock;

use super::error::RenderError;

const SOURCE: &str = "application::render::gate";

const METRIC_GATE_ACTIVE: &str = "pdfsmith_gate_active";
const METRIC_GATE_QUEUED: &str = "pdfsmith_gate_queued";
const METRIC_GATE_REJECTED: &str = "pdfsmith_gate_rejected_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    pub capacity: usize,
    pub max_queue: usize,
    pub queue_timeout: Duration,
}

/// Point-in-time view of the gate for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub active_count: usize,
    pub queued: usize,
    pub capacity: usize,
}

type Grant = Result<(), RenderError>;

struct Waiter {
    id: u64,
    enqueued_at: Instant,
    tx: oneshot::Sender<Grant>,
}

struct GateState {
    active: usize,
    queue: VecDeque<Waiter>,
    next_id: u64,
    closed: bool,
}

struct GateInner {
    config: GateConfig,
    state: Mutex<GateState>,
}

/// Counting admission gate. Cheap to clone; clones share one pool of slots.
#[derive(Clone)]
pub struct ResourceGate {
    inner: Arc<GateInner>,
}

impl ResourceGate {
    /// `capacity` must be positive; zero is clamped to one.
    pub fn new(config: GateConfig) -> Self {
        let config = GateConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        Self {
            inner: Arc::new(GateInner {
                config,
                state: Mutex::new(GateState {
                    active: 0,
                    queue: VecDeque::new(),
                    next_id: 0,
                    closed: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> GateConfig {
        self.inner.config
    }

    /// Obtain a slot, waiting in FIFO order when all slots are busy.
    ///
    /// Fails immediately with [`RenderError::QueueFull`] when the wait queue is
    /// already at its limit, and with [`RenderError::QueueTimeout`] when no slot
    /// was handed over before the queue deadline.
    pub async fn acquire(&self) -> Result<GatePermit, RenderError> {
        let config = self.inner.config;
        let (id, rx) = {
            let mut state = mutex_lock(&self.inner.state, SOURCE, "acquire");
            if state.closed {
                return Err(RenderError::ServiceShuttingDown);
            }

            if state.active < config.capacity {
                state.active += 1;
                debug!(
                    target = SOURCE,
                    op = "gate::acquire",
                    result = "immediate",
                    active = state.active,
                    capacity = config.capacity,
                    "Render slot acquired"
                );
                self.inner.record_gauges(&state);
                return Ok(GatePermit::new(Arc::clone(&self.inner)));
            }

            if state.queue.len() >= config.max_queue {
                warn!(
                    target = SOURCE,
                    op = "gate::acquire",
                    result = "queue_full",
                    queued = state.queue.len(),
                    max_queue = config.max_queue,
                    "Render queue full; rejecting request"
                );
                counter!(METRIC_GATE_REJECTED, "reason" => "queue_full").increment(1);
                return Err(RenderError::QueueFull {
                    max_queue: config.max_queue,
                });
            }

            let id = state.next_id;
            state.next_id = state.next_id.wrapping_add(1);
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter {
                id,
                enqueued_at: Instant::now(),
                tx,
            });
            warn!(
                target = SOURCE,
                op = "gate::acquire",
                result = "queued",
                capacity = config.capacity,
                queued = state.queue.len(),
                max_queue = config.max_queue,
                "All render slots busy; queuing request"
            );
            self.inner.record_gauges(&state);
            (id, rx)
        };

        let mut ticket = QueueTicket {
            inner: Arc::clone(&self.inner),
            id,
            rx,
            enqueued_at: Instant::now(),
            settled: false,
        };
        ticket.wait(config.queue_timeout).await
    }

    /// Reject every queued waiter with [`RenderError::ServiceShuttingDown`] and
    /// refuse new callers. Slots already held are released normally.
    ///
    /// Returns how many waiters were rejected. Calling it again is a no-op.
    pub fn shutdown(&self) -> usize {
        let mut state = mutex_lock(&self.inner.state, SOURCE, "shutdown");
        state.closed = true;
        let mut rejected = 0;
        while let Some(waiter) = state.queue.pop_front() {
            if waiter.tx.send(Err(RenderError::ServiceShuttingDown)).is_ok() {
                rejected += 1;
            }
        }
        if rejected > 0 {
            counter!(METRIC_GATE_REJECTED, "reason" => "shutting_down").increment(rejected as u64);
            warn!(
                target = SOURCE,
                op = "gate::shutdown",
                rejected,
                "Rejected queued render requests during shutdown"
            );
        }
        self.inner.record_gauges(&state);
        rejected
    }

    pub fn stats(&self) -> PoolStats {
        let state = mutex_lock(&self.inner.state, SOURCE, "stats");
        PoolStats {
            active_count: state.active,
            queued: state.queue.len(),
            capacity: self.inner.config.capacity,
        }
    }
}

impl GateInner {
    /// Return a slot: hand it to the oldest live waiter, or free it.
    fn release(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "release");
        while let Some(waiter) = state.queue.pop_front() {
            let waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64;
            if waiter.tx.send(Ok(())).is_ok() {
                debug!(
                    target = SOURCE,
                    op = "gate::release",
                    result = "handoff",
                    waiter = waiter.id,
                    waited_ms,
                    queued = state.queue.len(),
                    "Render slot passed to queued request"
                );
                self.record_gauges(&state);
                return;
            }
        }

        debug_assert!(state.active > 0, "release without a held slot");
        state.active = state.active.saturating_sub(1);
        debug!(
            target = SOURCE,
            op = "gate::release",
            result = "freed",
            active = state.active,
            capacity = self.config.capacity,
            "Render slot released"
        );
        self.record_gauges(&state);
    }

    /// Remove a waiter by id. `true` means the caller now owns the entry.
    fn withdraw(&self, id: u64) -> bool {
        let mut state = mutex_lock(&self.state, SOURCE, "withdraw");
        match state.queue.iter().position(|waiter| waiter.id == id) {
            Some(index) => {
                state.queue.remove(index);
                self.record_gauges(&state);
                true
            }
            None => false,
        }
    }

    fn record_gauges(&self, state: &GateState) {
        gauge!(METRIC_GATE_ACTIVE).set(state.active as f64);
        gauge!(METRIC_GATE_QUEUED).set(state.queue.len() as f64);
    }
}

/// A queued caller's claim on its entry. Dropping an unsettled ticket (the
/// `acquire` future was cancelled) withdraws the entry, or gives back a slot
/// that was already handed to it.
struct QueueTicket {
    inner: Arc<GateInner>,
    id: u64,
    rx: oneshot::Receiver<Grant>,
    enqueued_at: Instant,
    settled: bool,
}

impl QueueTicket {
    async fn wait(&mut self, queue_timeout: Duration) -> Result<GatePermit, RenderError> {
        let outcome = match tokio::time::timeout(queue_timeout, &mut self.rx).await {
            Ok(received) => received.unwrap_or(Err(RenderError::ServiceShuttingDown)),
            Err(_elapsed) => {
                if self.inner.withdraw(self.id) {
                    let waited = self.enqueued_at.elapsed();
                    warn!(
                        target = SOURCE,
                        op = "gate::acquire",
                        result = "queue_timeout",
                        waited_ms = waited.as_millis() as u64,
                        "Render queue wait timed out"
                    );
                    counter!(METRIC_GATE_REJECTED, "reason" => "queue_timeout").increment(1);
                    Err(RenderError::QueueTimeout { waited })
                } else {
                    // Release or shutdown claimed the entry first and has
                    // already written the outcome under the lock.
                    self.rx
                        .try_recv()
                        .unwrap_or(Err(RenderError::ServiceShuttingDown))
                }
            }
        };

        self.settled = true;
        outcome.map(|()| GatePermit::new(Arc::clone(&self.inner)))
    }
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        if self.settled || self.inner.withdraw(self.id) {
            return;
        }
        if let Ok(Ok(())) = self.rx.try_recv() {
            debug!(
                target = SOURCE,
                op = "gate::cancel",
                waiter = self.id,
                "Returning slot handed to a cancelled request"
            );
            self.inner.release();
        }
    }
}

/// Ownership of one render slot. Dropping it releases the slot exactly once.
pub struct GatePermit {
    inner: Option<Arc<GateInner>>,
}

impl GatePermit {
    fn new(inner: Arc<GateInner>) -> Self {
        Self { inner: Some(inner) }
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release();
        }
    }
}

impl std::fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatePermit")
            .field("held", &self.inner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::pin::pin;

    use futures::{FutureExt, poll};
    use tokio::sync::mpsc;

    use super::*;

    fn gate(capacity: usize, max_queue: usize) -> ResourceGate {
        ResourceGate::new(GateConfig {
            capacity,
            max_queue,
            queue_timeout: Duration::from_millis(60_000),
        })
    }

    async fn wait_for_queued(gate: &ResourceGate, queued: usize) {
        while gate.stats().queued < queued {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn acquires_immediately_below_capacity() {
        let gate = gate(5, 20);
        let mut permits = Vec::new();
        for _ in 0..5 {
            permits.push(gate.acquire().await.expect("slot"));
        }

        let stats = gate.stats();
        assert_eq!(stats.active_count, 5);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.capacity, 5);

        drop(permits);
        assert_eq!(gate.stats().active_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_fast_once_queue_is_full() {
        let gate = gate(5, 20);
        let mut permits = Vec::new();
        for _ in 0..5 {
            permits.push(gate.acquire().await.expect("slot"));
        }

        let mut waiters = Vec::new();
        for _ in 0..20 {
            let gate = gate.clone();
            waiters.push(tokio::spawn(async move { gate.acquire().await.map(drop) }));
        }
        wait_for_queued(&gate, 20).await;

        let started = Instant::now();
        let err = gate.acquire().await.expect_err("queue is full");
        assert!(matches!(err, RenderError::QueueFull { max_queue: 20 }));
        assert_eq!(started.elapsed(), Duration::ZERO);

        let stats = gate.stats();
        assert_eq!(stats.active_count, 5);
        assert_eq!(stats.queued, 20);

        drop(permits);
        for waiter in waiters {
            waiter.await.expect("join").expect("served after release");
        }
        assert_eq!(gate.stats(), PoolStats {
            active_count: 0,
            queued: 0,
            capacity: 5,
        });
    }

    #[tokio::test(start_paused = true)]
    async fn serves_waiters_in_arrival_order() {
        let gate = gate(1, 20);
        let held = gate.acquire().await.expect("slot");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut handles = Vec::new();
        for label in ["a", "b", "c"] {
            let waiter_gate = gate.clone();
            let tx = tx.clone();
            let position = handles.len() + 1;
            handles.push(tokio::spawn(async move {
                let permit = waiter_gate.acquire().await.expect("slot");
                tx.send(label).expect("send");
                drop(permit);
            }));
            wait_for_queued(&gate, position).await;
        }

        drop(held);
        for handle in handles {
            handle.await.expect("join");
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(label) = rx.recv().await {
            order.push(label);
        }
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn release_hands_slot_to_waiter_without_freeing_it() {
        let gate = gate(1, 20);
        let held = gate.acquire().await.expect("slot");

        let mut waiter = pin!(gate.acquire());
        assert!(poll!(&mut waiter).is_pending());
        assert_eq!(gate.stats().queued, 1);

        drop(held);
        assert_eq!(gate.stats().active_count, 1);
        assert_eq!(gate.stats().queued, 0);

        // A newcomer arriving after the handoff must queue, not steal.
        assert!(gate.acquire().now_or_never().is_none());
        assert_eq!(gate.stats().queued, 0, "cancelled newcomer withdrew");

        let permit = waiter.await.expect("handed-off slot");
        assert_eq!(gate.stats().active_count, 1);
        drop(permit);
        assert_eq!(gate.stats().active_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_caller_times_out_without_a_slot() {
        let gate = gate(1, 20);
        let _held = gate.acquire().await.expect("slot");

        let started = Instant::now();
        let err = gate.acquire().await.expect_err("no slot freed");
        match err {
            RenderError::QueueTimeout { waited } => {
                assert!(waited >= Duration::from_millis(60_000));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_millis(61_000));
        assert_eq!(gate.stats().queued, 0);
        assert_eq!(gate.stats().active_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn grant_wins_when_deadline_passes_after_handoff() {
        let gate = gate(1, 20);
        let held = gate.acquire().await.expect("slot");

        let mut waiter = pin!(gate.acquire());
        assert!(poll!(&mut waiter).is_pending());

        drop(held);
        tokio::time::advance(Duration::from_millis(120_000)).await;

        let permit = waiter.await.expect("grant resolved the entry first");
        assert_eq!(gate.stats().active_count, 1);
        drop(permit);
        assert_eq!(gate.stats().active_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_gives_back_a_handed_off_slot() {
        let gate = gate(1, 20);
        let held = gate.acquire().await.expect("slot");

        {
            let mut waiter = pin!(gate.acquire());
            assert!(poll!(&mut waiter).is_pending());
            drop(held);
            assert_eq!(gate.stats().active_count, 1);
        }

        assert_eq!(gate.stats(), PoolStats {
            active_count: 0,
            queued: 0,
            capacity: 1,
        });
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_all_queued_callers() {
        let gate = gate(1, 20);
        let held = gate.acquire().await.expect("slot");

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            waiters.push(tokio::spawn(async move { gate.acquire().await.map(drop) }));
        }
        wait_for_queued(&gate, 4).await;

        assert_eq!(gate.shutdown(), 4);
        for waiter in waiters {
            let err = waiter.await.expect("join").expect_err("rejected");
            assert!(matches!(err, RenderError::ServiceShuttingDown));
        }

        assert!(matches!(
            gate.acquire().await,
            Err(RenderError::ServiceShuttingDown)
        ));
        assert_eq!(gate.shutdown(), 0);

        drop(held);
        assert_eq!(gate.stats().active_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn active_count_never_exceeds_capacity_under_churn() {
        let gate = gate(3, 50);
        let mut handles = Vec::new();
        for i in 0..40_u64 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                let permit = gate.acquire().await.expect("slot");
                let stats = gate.stats();
                assert!(stats.active_count <= stats.capacity);
                tokio::time::sleep(Duration::from_millis(5 + i % 7)).await;
                drop(permit);
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }
        assert_eq!(gate.stats().active_count, 0);
    }
}
