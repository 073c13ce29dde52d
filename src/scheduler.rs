use std::io;

use async_trait::async_trait;
use thiserror::Error;

use crate::stream::{CodecError, SharedStream};

mod memory;
mod state;

pub use memory::MemoryScheduler;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Nothing available right now. Not fatal; workers poll again.
    #[error("no stream available")]
    Empty,
    #[error("scheduler is closed")]
    Closed,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Holds pending request streams. Shared by every worker.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn set_stream(&self, stream: SharedStream) -> Result<(), SchedulerError>;

    /// Must not wait for work: an empty queue answers [`SchedulerError::Empty`].
    /// The engine serializes calls to this method across the whole worker
    /// pool, so a slow or I/O-backed implementation throttles every worker.
    async fn get_stream(&self) -> Result<SharedStream, SchedulerError>;

    /// True queue state; the engine's termination check relies on it.
    async fn has_pending(&self) -> bool;

    async fn close(&self) -> Result<(), SchedulerError>;
}
