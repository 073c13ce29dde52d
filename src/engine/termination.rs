//! Decides when the worker pool has run out of work.
//!
//! Taking a stream from the scheduler and counting the worker as active
//! happen under one gate, and the finish check takes the same gate. Under it
//! the check reads the active counter first and the scheduler's pending state
//! second. A worker that produces new work does so while still counted as
//! active, so once the counter reads zero every push it made is already
//! visible to `has_pending`. When the check succeeds the `drained` token is
//! cancelled and every worker leaves, instead of each one deciding alone.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::{
    scheduler::{Scheduler, SchedulerError},
    stream::SharedStream,
};

#[derive(Debug, Default)]
pub(crate) struct Termination {
    gate: Mutex<()>,
    active: AtomicUsize,
    drained: CancellationToken,
    wake: Notify,
}

impl Termination {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Takes the next stream and marks the caller active. `None` when the
    /// scheduler has nothing right now.
    pub(crate) async fn acquire(&self, scheduler: &dyn Scheduler) -> Option<SharedStream> {
        let _gate = self.gate.lock().await;
        match scheduler.get_stream().await {
            Ok(stream) => {
                self.active.fetch_add(1, Ordering::SeqCst);
                Some(stream)
            }
            Err(SchedulerError::Empty) => None,
            Err(err) => {
                tracing::debug!("scheduler returned no stream: {}", err);
                None
            }
        }
    }

    /// Marks the caller inactive and wakes idle workers so one of them can
    /// re-run the finish check.
    pub(crate) fn release(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// New work was handed to the scheduler.
    pub(crate) fn work_added(&self) {
        self.wake.notify_waiters();
    }

    /// Returns `true` once the pool is drained, cancelling `drained`.
    pub(crate) async fn try_finish(&self, scheduler: &dyn Scheduler) -> bool {
        if self.drained.is_cancelled() {
            return true;
        }
        let _gate = self.gate.lock().await;
        if self.active.load(Ordering::SeqCst) != 0 {
            return false;
        }
        if scheduler.has_pending().await {
            return false;
        }
        self.drained.cancel();
        true
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn drained(&self) -> &CancellationToken {
        &self.drained
    }

    pub(crate) fn wake(&self) -> &Notify {
        &self.wake
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{scheduler::MemoryScheduler, stream::HttpRequest};

    fn request() -> SharedStream {
        Arc::new(HttpRequest::get("https://example.com").unwrap())
    }

    #[tokio::test]
    async fn not_finished_while_a_worker_holds_a_stream() {
        let scheduler = MemoryScheduler::new();
        scheduler.set_stream(request()).await.unwrap();
        let termination = Termination::new();

        assert!(termination.acquire(&scheduler).await.is_some());
        assert_eq!(termination.active(), 1);
        // queue is empty but the holder may still produce work
        assert!(!termination.try_finish(&scheduler).await);

        termination.release();
        assert!(termination.try_finish(&scheduler).await);
        assert!(termination.drained().is_cancelled());
    }

    #[tokio::test]
    async fn not_finished_while_work_is_pending() {
        let scheduler = MemoryScheduler::new();
        let termination = Termination::new();

        assert!(termination.acquire(&scheduler).await.is_none());
        scheduler.set_stream(request()).await.unwrap();
        assert!(!termination.try_finish(&scheduler).await);

        assert!(termination.acquire(&scheduler).await.is_some());
        // new work pushed before release stays visible
        scheduler.set_stream(request()).await.unwrap();
        termination.release();
        assert!(!termination.try_finish(&scheduler).await);
    }
}
