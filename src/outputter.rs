use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::stream::SharedStream;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("outputter is closed")]
    Closed,
    #[error("output failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Sink for terminal item streams. Errors are logged by the engine and not
/// surfaced further.
#[async_trait]
pub trait Outputter: Send + Sync {
    async fn output(&self, item: SharedStream) -> Result<(), OutputError>;

    async fn close(&self) -> Result<(), OutputError>;
}

/// Forwards items into a bounded channel. Closing drops the sender so the
/// receiving side ends once it has drained what was sent.
pub struct ChannelOutputter {
    tx: Mutex<Option<mpsc::Sender<SharedStream>>>,
}

impl ChannelOutputter {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SharedStream>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Like [`ChannelOutputter::new`] with the receiver wrapped as a `Stream`.
    pub fn with_stream(capacity: usize) -> (Self, ReceiverStream<SharedStream>) {
        let (outputter, rx) = Self::new(capacity);
        (outputter, ReceiverStream::new(rx))
    }

    fn sender(&self) -> Option<mpsc::Sender<SharedStream>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Outputter for ChannelOutputter {
    async fn output(&self, item: SharedStream) -> Result<(), OutputError> {
        let tx = self.sender().ok_or(OutputError::Closed)?;
        tx.send(item).await.map_err(|_| OutputError::Closed)
    }

    async fn close(&self) -> Result<(), OutputError> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;

    use super::*;
    use crate::stream::Item;

    #[tokio::test]
    async fn items_reach_the_stream_until_closed() {
        let (outputter, stream) = ChannelOutputter::with_stream(4);
        for n in 0..3 {
            outputter
                .output(Arc::new(Item::new(serde_json::json!({ "n": n }))))
                .await
                .unwrap();
        }
        outputter.close().await.unwrap();
        assert!(matches!(
            outputter
                .output(Arc::new(Item::new(serde_json::Value::Null)))
                .await,
            Err(OutputError::Closed)
        ));

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 3);
        let last = items[2].downcast_ref::<Item>().unwrap();
        assert_eq!(last.data()["n"], 2);
    }
}
