use std::{error::Error as StdError, fmt, sync::Arc};

use thiserror::Error;

use crate::stream::{SharedStream, StreamKind};

pub mod registry;

pub use registry::SpiderRegistry;

/// Name under which [`Spider::parse`] is registered.
pub const DEFAULT_CALLBACK: &str = "Parse";

/// Lazy, finite, single-pass sequence produced by a spider. `None` elements
/// are allowed and skipped by consumers.
pub type StreamIter = Box<dyn Iterator<Item = Option<SharedStream>> + Send>;

pub type ParseResult = Result<StreamIter, SpiderError>;

/// A parsing callback bound to its spider.
pub type Callback = Arc<dyn Fn(SharedStream) -> ParseResult + Send + Sync>;

#[derive(Debug, Error)]
pub enum SpiderError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("expected a {expected} stream, found {found}")]
    UnexpectedStream {
        expected: StreamKind,
        found: StreamKind,
    },
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

pub trait Spider: Send + Sync + 'static {
    /// Stable and unique across all registered spiders.
    fn name(&self) -> String;

    fn start_requests(&self) -> ParseResult;

    fn parse(&self, response: SharedStream) -> ParseResult;

    /// Extra named callbacks, selected through the `callback` metadata key.
    fn callbacks(self: Arc<Self>) -> Callbacks {
        Callbacks::new()
    }
}

/// Explicit table of named callbacks a spider contributes.
#[derive(Default)]
pub struct Callbacks {
    entries: Vec<(String, Callback)>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(SharedStream) -> ParseResult + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Arc::new(callback)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for Callbacks {
    type Item = (String, Callback);
    type IntoIter = std::vec::IntoIter<(String, Callback)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

/// Wraps already-built streams into a [`StreamIter`].
pub fn iter_streams<I>(streams: I) -> StreamIter
where
    I: IntoIterator<Item = SharedStream>,
    I::IntoIter: Send + 'static,
{
    Box::new(streams.into_iter().map(Some))
}

pub fn empty() -> StreamIter {
    Box::new(std::iter::empty())
}
