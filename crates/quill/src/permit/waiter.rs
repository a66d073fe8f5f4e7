//! Waiting - a queued acquisition.
//!
//! The pool resolves a waiter by sending on its oneshot while holding the
//! state lock, so under that same lock a waiter is either still queued or
//! already owns a slot.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::pool::{AcquireError, Permit, Shared};

/// Future for a caller queued on a saturated pool.
///
/// On drop before completion the waiter withdraws from the queue. If the
/// pool had already handed it a slot, that slot is passed to the next waiter.
#[must_use = "futures do nothing unless polled"]
pub(crate) struct Waiting {
    shared: Arc<Shared>,
    ticket: u64,
    rx: Option<oneshot::Receiver<()>>,
}

impl Waiting {
    pub(super) fn new(shared: Arc<Shared>, ticket: u64, rx: oneshot::Receiver<()>) -> Self {
        Self {
            shared,
            ticket,
            rx: Some(rx),
        }
    }
}

impl Future for Waiting {
    type Output = Result<Permit, AcquireError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(rx) = self.rx.as_mut() else {
            panic!("Waiting polled after completion");
        };

        let result = match Pin::new(rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(result) => result,
        };

        self.rx = None;
        match result {
            Ok(()) => {
                tracing::debug!(ticket = self.ticket, "Queued caller admitted");
                Poll::Ready(Ok(Permit::new(Arc::clone(&self.shared), self.ticket)))
            }
            // Sender dropped without a grant: the pool was closed.
            Err(_) => Poll::Ready(Err(AcquireError::Closed)),
        }
    }
}

impl Drop for Waiting {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };

        let mut state = self.shared.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.ticket == self.ticket) {
            state.waiters.remove(pos);
            tracing::debug!(
                ticket = self.ticket,
                waiting = state.waiters.len(),
                "Queued caller withdrew"
            );
            return;
        }

        if rx.try_recv().is_ok() {
            tracing::debug!(
                ticket = self.ticket,
                "Caller withdrew after admission, passing slot on"
            );
            self.shared.release_slot(&mut state);
        }
    }
}
