//! The polymorphic unit of data flowing through the crawl pipeline.
//!
//! Every request, response and item is a [`CrawlStream`]. Concrete variants
//! embed a [`StreamCore`] holding the cancellation context and the metadata
//! map, and declare their [`StreamKind`], a unique [`CrawlStream::name`] and an
//! optional [`StreamCodec`] used when a stream has to be persisted.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use tokio_util::sync::CancellationToken;

pub mod codec;
pub mod item;
pub mod request;
pub mod response;
pub mod value;

pub use codec::{BaseCodec, CodecError, CodecRegistry, EncodedStream, StreamCodec};
pub use item::Item;
pub use request::HttpRequest;
pub use response::HttpResponse;
pub use value::Value;

/// Streams are handed between pipeline stages behind an `Arc`.
pub type SharedStream = Arc<dyn CrawlStream>;

/// Tag distinguishing the stream variants routed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Unknown,
    Request,
    Response,
    Item,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Unknown => "unknown",
            StreamKind::Request => "request",
            StreamKind::Response => "response",
            StreamKind::Item => "item",
        };
        f.write_str(name)
    }
}

pub trait CrawlStream: Send + Sync + fmt::Debug + 'static {
    /// Shared state every stream carries.
    fn core(&self) -> &StreamCore;

    /// The variant tag. Fixed per concrete type.
    fn kind(&self) -> StreamKind;

    /// Globally unique name of the concrete type, used as a namespace key
    /// (for instance by [`CodecRegistry`]), never as an instance id.
    fn name(&self) -> &'static str;

    /// `None` marks the stream as non-persistable.
    fn codec(&self) -> Option<&'static dyn StreamCodec> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn context(&self) -> CancellationToken {
        self.core().context()
    }

    /// Replaces the context of this very instance.
    fn with_context(&self, token: CancellationToken) {
        self.core().set_context(token)
    }

    fn set_metadata(&self, key: &str, value: Value) {
        self.core().set_metadata(key, value)
    }

    fn get_metadata(&self, key: &str) -> Option<Value> {
        self.core().get_metadata(key)
    }
}

impl dyn CrawlStream {
    pub fn downcast_ref<T: CrawlStream>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: CrawlStream>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Context and metadata shared by all stream variants.
#[derive(Debug, Default)]
pub struct StreamCore {
    context: RwLock<CancellationToken>,
    metadata: Mutex<HashMap<String, Value>>,
}

impl StreamCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(metadata: HashMap<String, Value>) -> Self {
        Self {
            context: RwLock::default(),
            metadata: Mutex::new(metadata),
        }
    }

    pub fn context(&self) -> CancellationToken {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_context(&self, token: CancellationToken) {
        *self
            .context
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn set_metadata(&self, key: &str, value: Value) {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<Value> {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn remove_metadata(&self, key: &str) -> Option<Value> {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Copy of the whole metadata map.
    pub fn metadata(&self) -> HashMap<String, Value> {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
