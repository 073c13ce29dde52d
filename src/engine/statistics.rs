use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

#[derive(Debug, Default)]
pub struct Statistics {
    pub(crate) num_requests: AtomicUsize,
    pub(crate) num_download_errors: AtomicUsize,
    pub(crate) num_responses: AtomicUsize,
    pub(crate) num_parse_errors: AtomicUsize,
    pub(crate) num_scheduled: AtomicUsize,
    pub(crate) num_schedule_errors: AtomicUsize,
    pub(crate) num_items: AtomicUsize,
    pub(crate) num_output_errors: AtomicUsize,
    pub(crate) num_ignored: AtomicUsize,
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub num_requests: usize,
    pub num_download_errors: usize,
    pub num_responses: usize,
    pub num_parse_errors: usize,
    pub num_scheduled: usize,
    pub num_schedule_errors: usize,
    pub num_items: usize,
    pub num_output_errors: usize,
    pub num_ignored: usize,
}

impl Statistics {
    pub(crate) fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            num_requests: self.num_requests.load(Ordering::Relaxed),
            num_download_errors: self.num_download_errors.load(Ordering::Relaxed),
            num_responses: self.num_responses.load(Ordering::Relaxed),
            num_parse_errors: self.num_parse_errors.load(Ordering::Relaxed),
            num_scheduled: self.num_scheduled.load(Ordering::Relaxed),
            num_schedule_errors: self.num_schedule_errors.load(Ordering::Relaxed),
            num_items: self.num_items.load(Ordering::Relaxed),
            num_output_errors: self.num_output_errors.load(Ordering::Relaxed),
            num_ignored: self.num_ignored.load(Ordering::Relaxed),
        }
    }

    pub fn write_to_log(&self, running_time: Duration) {
        let snapshot = self.snapshot();
        tracing::info!(
            num_requests = snapshot.num_requests,
            num_download_errors = snapshot.num_download_errors,
            num_responses = snapshot.num_responses,
            num_parse_errors = snapshot.num_parse_errors,
            num_scheduled = snapshot.num_scheduled,
            num_schedule_errors = snapshot.num_schedule_errors,
            num_items = snapshot.num_items,
            num_output_errors = snapshot.num_output_errors,
            num_ignored = snapshot.num_ignored,
            running_time = ?running_time,
            "statistics"
        );
    }
}
