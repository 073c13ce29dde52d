use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, PoisonError,
    },
};

use async_trait::async_trait;

use super::{state, Scheduler, SchedulerError};
use crate::stream::{CodecRegistry, SharedStream};

struct Persistence {
    path: PathBuf,
    codecs: CodecRegistry,
}

/// FIFO scheduler kept in memory, optionally saving its pending queue on
/// close so a later run can pick it up with [`MemoryScheduler::restore`].
pub struct MemoryScheduler {
    queue: Mutex<VecDeque<SharedStream>>,
    closed: AtomicBool,
    persistence: Option<Persistence>,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            persistence: None,
        }
    }

    /// Saves whatever is still pending to `path` when closed.
    pub fn with_persistence(path: impl Into<PathBuf>, codecs: CodecRegistry) -> Self {
        Self {
            persistence: Some(Persistence {
                path: path.into(),
                codecs,
            }),
            ..Self::new()
        }
    }

    /// Loads a queue saved by a previous run and keeps persisting to the
    /// same path.
    pub fn restore(path: impl Into<PathBuf>, codecs: CodecRegistry) -> Self {
        let path = path.into();
        let queue = state::read_state(&path, &codecs);
        Self {
            queue: Mutex::new(queue),
            closed: AtomicBool::new(false),
            persistence: Some(Persistence { path, codecs }),
        }
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scheduler for MemoryScheduler {
    async fn set_stream(&self, stream: SharedStream) -> Result<(), SchedulerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::Closed);
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(stream);
        Ok(())
    }

    async fn get_stream(&self) -> Result<SharedStream, SchedulerError> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or(SchedulerError::Empty)
    }

    async fn has_pending(&self) -> bool {
        !self.is_empty()
    }

    async fn close(&self) -> Result<(), SchedulerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let pending: Vec<SharedStream> = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        state::write_state(&persistence.path, &persistence.codecs, &pending)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::stream::{CrawlStream, HttpRequest, Value};

    fn request(path: &str) -> SharedStream {
        Arc::new(HttpRequest::get(&format!("https://example.com/{path}")).unwrap())
    }

    fn url_of(stream: &SharedStream) -> String {
        stream
            .downcast_ref::<HttpRequest>()
            .unwrap()
            .url()
            .to_string()
    }

    #[tokio::test]
    async fn fifo_order_and_empty() {
        let scheduler = MemoryScheduler::new();
        assert!(!scheduler.has_pending().await);
        assert!(matches!(
            scheduler.get_stream().await,
            Err(SchedulerError::Empty)
        ));

        scheduler.set_stream(request("a")).await.unwrap();
        scheduler.set_stream(request("b")).await.unwrap();
        assert!(scheduler.has_pending().await);

        assert_eq!(url_of(&scheduler.get_stream().await.unwrap()), "https://example.com/a");
        assert_eq!(url_of(&scheduler.get_stream().await.unwrap()), "https://example.com/b");
        assert!(!scheduler.has_pending().await);
    }

    #[tokio::test]
    async fn closed_scheduler_refuses_streams() {
        let scheduler = MemoryScheduler::new();
        scheduler.close().await.unwrap();
        scheduler.close().await.unwrap();
        assert!(matches!(
            scheduler.set_stream(request("a")).await,
            Err(SchedulerError::Closed)
        ));
    }

    #[tokio::test]
    async fn pending_queue_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");

        let scheduler = MemoryScheduler::with_persistence(&path, CodecRegistry::default());
        let first = request("a");
        first.set_metadata("spiderName", "books".into());
        scheduler.set_stream(first).await.unwrap();
        scheduler.set_stream(request("b")).await.unwrap();
        scheduler.close().await.unwrap();
        assert!(scheduler.is_empty());

        let restored = MemoryScheduler::restore(&path, CodecRegistry::default());
        assert_eq!(restored.len(), 2);
        let first = restored.get_stream().await.unwrap();
        assert_eq!(url_of(&first), "https://example.com/a");
        assert_eq!(first.get_metadata("spiderName"), Some(Value::from("books")));
    }
}
