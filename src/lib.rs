//! A crawl engine routing polymorphic streams between a scheduler, a
//! downloader, a registry of spider callbacks and an outputter.
//!
//! Requests pulled from the [`Scheduler`] are downloaded by the
//! [`Downloader`]; the resulting response is dispatched by the
//! [`SpiderRegistry`] to the spider callback named in its metadata, and each
//! stream the callback yields is routed by kind: requests back to the
//! scheduler, responses straight into another callback, items to the
//! [`Outputter`].

pub mod downloader;
pub mod engine;
pub mod outputter;
pub mod scheduler;
mod shutdown;
pub mod spider;
pub mod stream;

pub use downloader::{DownloadError, Downloader};
pub use engine::{Engine, EngineError, EngineOptions, StatisticsSnapshot};
pub use outputter::{ChannelOutputter, OutputError, Outputter};
pub use scheduler::{MemoryScheduler, Scheduler, SchedulerError};
pub use spider::{
    registry::{RegistryError, CALLBACK_KEY, SPIDER_NAME_KEY},
    Callbacks, ParseResult, Spider, SpiderError, SpiderRegistry, StreamIter,
};
pub use stream::{
    CrawlStream, HttpRequest, HttpResponse, Item, SharedStream, StreamCore, StreamKind, Value,
};
