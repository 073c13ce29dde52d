use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::stream::{SharedStream, StreamKind};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("cannot download a {0} stream")]
    Unsupported(StreamKind),
    #[error("download cancelled")]
    Cancelled,
    #[error("download failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Turns request streams into response streams. Failures are not fatal to
/// the engine: the request is dropped.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Called once before the first download. `token` is cancelled when the
    /// engine shuts down.
    async fn start(&self, _token: CancellationToken) -> Result<(), DownloadError> {
        Ok(())
    }

    async fn download(&self, request: SharedStream) -> Result<SharedStream, DownloadError>;

    async fn close(&self) -> Result<(), DownloadError> {
        Ok(())
    }
}
