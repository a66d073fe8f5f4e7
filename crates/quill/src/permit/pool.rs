//! Admission pool implementation.
//!
//! All bookkeeping lives behind one `std::sync::Mutex` that is never held
//! across an `.await`. A release that finds queued waiters hands its slot to
//! the head of the queue without decrementing `held`, so `held` never exceeds
//! `capacity` and a slot freed by a release cannot be stolen by a newcomer.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::waiter::Waiting;
use crate::config::GateConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("Generation queue is full (max: {max})")]
    QueueFull { max: usize },
    #[error("Timed out after {0:?} waiting for a generation slot")]
    Timeout(Duration),
    #[error("Acquisition cancelled while queued")]
    Cancelled,
    #[error("Admission pool is closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    /// The permit belongs to another pool. It is handed back untouched.
    #[error("Permit was not issued by this pool")]
    ForeignPermit(Permit),
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub capacity: usize,
    pub held: usize,
    pub waiting: usize,
    pub available: usize,
}

pub(super) struct Waiter {
    pub(super) ticket: u64,
    pub(super) tx: oneshot::Sender<()>,
}

pub(super) struct State {
    pub(super) held: usize,
    pub(super) waiters: VecDeque<Waiter>,
    next_ticket: u64,
    closed: bool,
}

impl State {
    fn next_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }
}

pub(super) struct Shared {
    capacity: usize,
    max_waiters: Option<usize>,
    state: Mutex<State>,
}

impl Shared {
    pub(super) fn lock(&self) -> MutexGuard<'_, State> {
        // Critical sections never panic midway, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Give up one held slot: pass it to the head waiter, or free it.
    pub(super) fn release_slot(&self, state: &mut State) {
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.tx.send(()).is_ok() {
                tracing::debug!(
                    ticket = waiter.ticket,
                    held = state.held,
                    waiting = state.waiters.len(),
                    "Slot handed to queued caller"
                );
                return;
            }
            tracing::debug!(ticket = waiter.ticket, "Skipping withdrawn waiter");
        }

        debug_assert!(state.held > 0, "released more slots than were held");
        state.held = state.held.saturating_sub(1);
        tracing::debug!(held = state.held, "Slot freed");
    }
}

pub(super) enum Admission {
    Ready(Permit),
    Queued(Waiting),
}

/// FIFO admission pool for outbound generation calls.
///
/// Constructed once per process and shared via `Arc`; tests build isolated
/// pools with small capacities.
pub struct AdmissionPool {
    shared: Arc<Shared>,
}

impl AdmissionPool {
    /// Create an unbounded-queue pool. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// Create a pool whose wait queue holds at most `max_waiters` callers.
    pub fn bounded(capacity: usize, max_waiters: usize) -> Self {
        Self::build(capacity, Some(max_waiters))
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::build(config.max_concurrent, config.max_queued)
    }

    fn build(capacity: usize, max_waiters: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                max_waiters,
                state: Mutex::new(State {
                    held: 0,
                    waiters: VecDeque::new(),
                    next_ticket: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Acquire a permit, queuing behind earlier callers if the pool is saturated.
    ///
    /// Returns without suspending when a slot is free. Dropping the returned
    /// future while queued withdraws the caller without consuming a slot.
    pub async fn acquire(&self) -> Result<Permit, AcquireError> {
        match self.admit()? {
            Admission::Ready(permit) => Ok(permit),
            Admission::Queued(waiting) => waiting.await,
        }
    }

    /// Acquire a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut state = self.shared.lock();
        if state.closed || state.held >= self.shared.capacity {
            return None;
        }
        state.held += 1;
        let id = state.next_ticket();
        Some(Permit::new(Arc::clone(&self.shared), id))
    }

    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Permit, AcquireError> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(?timeout, "Gave up waiting for a generation slot");
                Err(AcquireError::Timeout(timeout))
            }
        }
    }

    /// Acquire a permit unless `token` fires first. An immediately available
    /// slot wins over an already-cancelled token.
    pub async fn acquire_cancellable(
        &self,
        token: &CancellationToken,
    ) -> Result<Permit, AcquireError> {
        tokio::select! {
            biased;
            result = self.acquire() => result,
            _ = token.cancelled() => Err(AcquireError::Cancelled),
        }
    }

    /// Return a permit to this pool.
    ///
    /// Equivalent to dropping it, except that a permit issued by another pool
    /// is rejected and handed back.
    pub fn release(&self, permit: Permit) -> Result<(), ReleaseError> {
        if !Arc::ptr_eq(&self.shared, &permit.shared) {
            tracing::warn!(permit = permit.id, "Rejected release of foreign permit");
            return Err(ReleaseError::ForeignPermit(permit));
        }
        drop(permit);
        Ok(())
    }

    /// Refuse new acquisitions and fail every queued caller with
    /// [`AcquireError::Closed`]. Outstanding permits still release normally.
    pub fn close(&self) {
        let dropped = {
            let mut state = self.shared.lock();
            state.closed = true;
            std::mem::take(&mut state.waiters)
        };
        if !dropped.is_empty() {
            tracing::info!(waiters = dropped.len(), "Admission pool closed with queued callers");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn max_waiters(&self) -> Option<usize> {
        self.shared.max_waiters
    }

    pub fn held(&self) -> usize {
        self.shared.lock().held
    }

    pub fn waiting(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    pub fn available(&self) -> usize {
        self.snapshot().available
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.shared.lock();
        PoolSnapshot {
            capacity: self.shared.capacity,
            held: state.held,
            waiting: state.waiters.len(),
            available: self.shared.capacity.saturating_sub(state.held),
        }
    }

    /// Admission check and enqueue, atomic under the state lock.
    fn admit(&self) -> Result<Admission, AcquireError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(AcquireError::Closed);
        }

        let ticket = state.next_ticket();
        if state.held < self.shared.capacity {
            debug_assert!(state.waiters.is_empty(), "free slot while callers are queued");
            state.held += 1;
            tracing::debug!(ticket, held = state.held, "Slot granted immediately");
            return Ok(Admission::Ready(Permit::new(Arc::clone(&self.shared), ticket)));
        }

        if let Some(max) = self.shared.max_waiters
            && state.waiters.len() >= max
        {
            tracing::warn!(max, held = state.held, "Generation queue full, rejecting caller");
            return Err(AcquireError::QueueFull { max });
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(Waiter { ticket, tx });
        tracing::debug!(
            ticket,
            held = state.held,
            waiting = state.waiters.len(),
            "Pool saturated, caller queued"
        );
        Ok(Admission::Queued(Waiting::new(
            Arc::clone(&self.shared),
            ticket,
            rx,
        )))
    }
}

impl fmt::Debug for AdmissionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPool")
            .field("snapshot", &self.snapshot())
            .field("max_waiters", &self.shared.max_waiters)
            .finish()
    }
}

/// Right to run one protected section. Releases its slot on drop.
#[must_use = "dropping a permit immediately releases its slot"]
pub struct Permit {
    shared: Arc<Shared>,
    id: u64,
}

impl Permit {
    pub(super) fn new(shared: Arc<Shared>, id: u64) -> Self {
        Self { shared, id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Release the slot now. Same as dropping the permit.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit").field("id", &self.id).finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        self.shared.release_slot(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn acquires_up_to_capacity_immediately() {
        let pool = AdmissionPool::new(2);

        let a = pool.try_acquire();
        let b = pool.try_acquire();
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.held(), 2);
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn zero_capacity_is_raised_to_one() {
        let pool = AdmissionPool::new(0);
        assert_eq!(pool.capacity(), 1);
        let _permit = pool.acquire().await.unwrap();
        assert!(pool.try_acquire().is_none());
    }

    #[tokio::test]
    async fn acquire_beyond_capacity_waits_for_release() {
        let pool = AdmissionPool::new(2);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();

        let mut third = Box::pin(pool.acquire());
        assert!(futures::poll!(&mut third).is_pending());
        assert!(futures::poll!(&mut third).is_pending());
        assert_eq!(pool.waiting(), 1);

        drop(a);
        let permit = futures::poll!(&mut third);
        assert!(matches!(permit, std::task::Poll::Ready(Ok(_))));
        assert_eq!(pool.held(), 2);
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn queued_callers_are_admitted_in_arrival_order() {
        let pool = AdmissionPool::new(1);
        let a = pool.acquire().await.unwrap();

        let mut b = Box::pin(pool.acquire());
        let mut c = Box::pin(pool.acquire());
        assert!(futures::poll!(&mut b).is_pending());
        assert!(futures::poll!(&mut c).is_pending());

        a.release();

        // C is polled first but B still owns the slot.
        assert!(futures::poll!(&mut c).is_pending());
        let b = b.await.unwrap();
        assert!(futures::poll!(&mut c).is_pending());

        drop(b);
        let _c = c.await.unwrap();
        assert_eq!(pool.held(), 1);
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn capacity_two_hand_off_scenario() {
        let pool = AdmissionPool::new(2);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let mut c = Box::pin(pool.acquire());
        assert!(futures::poll!(&mut c).is_pending());
        assert_eq!((pool.held(), pool.waiting()), (2, 1));

        drop(a);
        let c = c.await.unwrap();
        assert_eq!((pool.held(), pool.waiting()), (2, 0));

        drop(b);
        assert_eq!((pool.held(), pool.waiting()), (1, 0));

        drop(c);
        assert_eq!((pool.held(), pool.waiting()), (0, 0));
    }

    #[tokio::test]
    async fn ten_simultaneous_callers_drain_in_order() {
        let pool = AdmissionPool::new(1);

        let mut pending: Vec<_> = (0..10).map(|_| Box::pin(pool.acquire())).collect();
        let mut ready = Vec::new();
        for (i, fut) in pending.iter_mut().enumerate() {
            if let std::task::Poll::Ready(permit) = futures::poll!(fut) {
                ready.push((i, permit.unwrap()));
            }
        }
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, 0);
        assert_eq!(pool.waiting(), 9);

        let mut admitted = vec![0];
        let (_, mut current) = ready.pop().unwrap();
        for _ in 1..10 {
            drop(current);
            let mut next = None;
            for (i, fut) in pending.iter_mut().enumerate() {
                if admitted.contains(&i) {
                    continue;
                }
                if let std::task::Poll::Ready(permit) = futures::poll!(fut) {
                    assert!(next.is_none(), "two callers admitted for one slot");
                    next = Some((i, permit.unwrap()));
                }
            }
            let (i, permit) = next.expect("a queued caller should be admitted");
            admitted.push(i);
            current = permit;
        }
        drop(current);

        assert_eq!(admitted, (0..10).collect::<Vec<_>>());
        assert_eq!(pool.held(), 0);
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn round_trip_restores_initial_state() {
        let pool = AdmissionPool::new(3);
        let mut permits = Vec::new();
        for _ in 0..3 {
            permits.push(pool.acquire().await.unwrap());
        }
        for permit in permits {
            pool.release(permit).unwrap();
        }

        assert_eq!(
            pool.snapshot(),
            PoolSnapshot {
                capacity: 3,
                held: 0,
                waiting: 0,
                available: 3,
            }
        );
        let mut next = Box::pin(pool.acquire());
        assert!(futures::poll!(&mut next).is_ready());
    }

    #[tokio::test]
    async fn foreign_permit_is_rejected_and_stays_valid() {
        let pool = AdmissionPool::new(1);
        let other = AdmissionPool::new(1);

        let permit = other.acquire().await.unwrap();
        let err = pool.release(permit).unwrap_err();
        assert_eq!(other.held(), 1);
        assert_eq!(pool.held(), 0);

        let ReleaseError::ForeignPermit(permit) = err;
        other.release(permit).unwrap();
        assert_eq!(other.held(), 0);
    }

    #[tokio::test]
    async fn dropping_queued_acquire_withdraws_waiter() {
        let pool = AdmissionPool::new(1);
        let a = pool.acquire().await.unwrap();

        let mut b = Box::pin(pool.acquire());
        let mut c = Box::pin(pool.acquire());
        assert!(futures::poll!(&mut b).is_pending());
        assert!(futures::poll!(&mut c).is_pending());
        assert_eq!(pool.waiting(), 2);

        drop(b);
        assert_eq!(pool.waiting(), 1);

        drop(a);
        let _c = c.await.unwrap();
        assert_eq!(pool.held(), 1);
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn dropping_granted_but_unpolled_acquire_passes_slot_on() {
        let pool = AdmissionPool::new(1);
        let a = pool.acquire().await.unwrap();

        let mut b = Box::pin(pool.acquire());
        let mut c = Box::pin(pool.acquire());
        assert!(futures::poll!(&mut b).is_pending());
        assert!(futures::poll!(&mut c).is_pending());

        // B is granted the slot but abandons it before observing the grant.
        drop(a);
        drop(b);

        let _c = c.await.unwrap();
        assert_eq!(pool.held(), 1);
    }

    #[tokio::test]
    async fn timeout_leaves_no_waiter_behind() {
        let pool = AdmissionPool::new(1);
        let _a = pool.acquire().await.unwrap();

        let result = pool.acquire_timeout(Duration::from_millis(20)).await;
        assert_eq!(
            result.unwrap_err(),
            AcquireError::Timeout(Duration::from_millis(20))
        );
        assert_eq!(pool.waiting(), 0);
        assert_eq!(pool.held(), 1);
    }

    #[tokio::test]
    async fn timeout_succeeds_when_slot_frees_in_time() {
        let pool = Arc::new(AdmissionPool::new(1));
        let a = pool.acquire().await.unwrap();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(a);
        });

        let permit = pool.acquire_timeout(Duration::from_secs(5)).await;
        assert!(permit.is_ok());
        releaser.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_token_withdraws_waiter() {
        let pool = AdmissionPool::new(1);
        let _a = pool.acquire().await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = pool.acquire_cancellable(&token).await;
        assert_eq!(result.unwrap_err(), AcquireError::Cancelled);
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn free_slot_wins_over_cancelled_token() {
        let pool = AdmissionPool::new(1);
        let token = CancellationToken::new();
        token.cancel();
        assert!(pool.acquire_cancellable(&token).await.is_ok());
    }

    #[tokio::test]
    async fn bounded_queue_rejects_overflow() {
        let pool = AdmissionPool::bounded(1, 1);
        let _a = pool.acquire().await.unwrap();

        let mut b = Box::pin(pool.acquire());
        assert!(futures::poll!(&mut b).is_pending());

        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err, AcquireError::QueueFull { max: 1 });
        assert_eq!(pool.waiting(), 1);
    }

    #[tokio::test]
    async fn bounded_queue_of_zero_never_queues() {
        let pool = AdmissionPool::bounded(1, 0);
        let a = pool.acquire().await.unwrap();
        assert_eq!(
            pool.acquire().await.unwrap_err(),
            AcquireError::QueueFull { max: 0 }
        );
        drop(a);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn close_fails_queued_callers_and_new_arrivals() {
        let pool = AdmissionPool::new(1);
        let a = pool.acquire().await.unwrap();

        let mut b = Box::pin(pool.acquire());
        assert!(futures::poll!(&mut b).is_pending());

        pool.close();
        assert!(pool.is_closed());
        assert_eq!(b.await.unwrap_err(), AcquireError::Closed);
        assert_eq!(pool.acquire().await.unwrap_err(), AcquireError::Closed);
        assert!(pool.try_acquire().is_none());

        drop(a);
        assert_eq!(pool.held(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_never_exceed_capacity() {
        const CAPACITY: usize = 3;
        let pool = Arc::new(AdmissionPool::new(CAPACITY));
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let inside = Arc::clone(&inside);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _permit = pool.acquire().await.unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(pool.held() <= CAPACITY);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
        assert_eq!(pool.held(), 0);
        assert_eq!(pool.waiting(), 0);
    }

    #[test]
    fn snapshot_serializes_counts() {
        let pool = AdmissionPool::new(2);
        let _permit = pool.try_acquire().unwrap();
        insta::assert_json_snapshot!(pool.snapshot(), @r#"
        {
          "capacity": 2,
          "held": 1,
          "waiting": 0,
          "available": 1
        }
        "#);
    }
}
