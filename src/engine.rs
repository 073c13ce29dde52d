//! The crawl engine: a fixed pool of workers pulling request streams from the
//! scheduler, downloading them, handing responses to the spider registry and
//! routing whatever the spiders yield.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tokio_util::{
    sync::{CancellationToken, DropGuard},
    task::TaskTracker,
};

use crate::{
    downloader::{DownloadError, Downloader},
    outputter::{OutputError, Outputter},
    scheduler::{Scheduler, SchedulerError},
    spider::SpiderRegistry,
    stream::{SharedStream, StreamKind},
};

mod statistics;
mod termination;

pub use statistics::{Statistics, StatisticsSnapshot};
use termination::Termination;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub worker_count: usize,
    /// Upper bound on how long an idle worker sleeps before polling the
    /// scheduler again.
    pub idle_poll_interval: Duration,
    /// Responses nested deeper than this inside one worker are dropped.
    pub max_response_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            worker_count: 4,
            idle_poll_interval: Duration::from_millis(50),
            max_response_depth: 32,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("downloader: {0}")]
    Downloader(#[from] DownloadError),
    #[error("outputter: {0}")]
    Outputter(#[from] OutputError),
    #[error("scheduler: {0}")]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("downloader failed to start: {0}")]
    Start(#[source] DownloadError),
    #[error("failed to release collaborators: {0:?}")]
    Release(Vec<ReleaseError>),
}

pub struct Engine {
    scheduler: Arc<dyn Scheduler>,
    downloader: Arc<dyn Downloader>,
    outputter: Arc<dyn Outputter>,
    spiders: SpiderRegistry,
    worker_count: usize,
    idle_poll_interval: Duration,
    max_response_depth: usize,
    token: CancellationToken,
    closed: AtomicBool,
    termination: Termination,
    statistics: Statistics,
}

impl Engine {
    /// The registry is moved in and stays read-only from here on.
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        downloader: Arc<dyn Downloader>,
        outputter: Arc<dyn Outputter>,
        spiders: SpiderRegistry,
        EngineOptions {
            worker_count,
            idle_poll_interval,
            max_response_depth,
        }: EngineOptions,
    ) -> Arc<Self> {
        let worker_count = if worker_count == 0 {
            tracing::warn!("engine: worker_count of 0 requested, using 1");
            1
        } else {
            worker_count
        };
        Arc::new(Self {
            scheduler,
            downloader,
            outputter,
            spiders,
            worker_count,
            idle_poll_interval,
            max_response_depth,
            token: CancellationToken::new(),
            closed: AtomicBool::new(false),
            termination: Termination::new(),
            statistics: Statistics::default(),
        })
    }

    /// Runs until the work is exhausted or SIGINT/SIGTERM arrives.
    pub async fn run(self: Arc<Self>) -> Result<(), EngineError> {
        self.run_until(crate::shutdown::signal()).await
    }

    /// Runs until the work is exhausted or `shutdown` resolves, then
    /// releases the downloader, the outputter and the scheduler, in that
    /// order. Release errors are collected, not retried, and do not stop the
    /// remaining collaborators from being closed.
    pub async fn run_until<F>(self: Arc<Self>, shutdown: F) -> Result<(), EngineError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(
            workers = self.worker_count,
            spiders = self.spiders.len(),
            "engine: starting"
        );
        let starting_time = Instant::now();

        let engine = self.clone();
        let signals = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown => {
                    tracing::info!("engine: shutdown requested");
                    engine.close();
                }
                _ = engine.token.cancelled() => {}
            }
        });

        if let Err(err) = self.downloader.start(self.token.child_token()).await {
            tracing::error!("engine: downloader failed to start: {}", err);
            self.close();
            if let Err(err) = signals.await {
                tracing::error!("engine: shutdown listener failed: {}", err);
            }
            if let Err(release) = self.release().await {
                tracing::error!("engine: {}", release);
            }
            return Err(EngineError::Start(err));
        }

        self.seed().await;

        let tracker = TaskTracker::new();
        for id in 0..self.worker_count {
            tracker.spawn(self.clone().worker(id));
        }
        tracker.close();
        tracker.wait().await;
        tracing::info!("engine: all workers exited");

        self.close();
        if let Err(err) = signals.await {
            tracing::error!("engine: shutdown listener failed: {}", err);
        }
        self.statistics.write_to_log(starting_time.elapsed());
        self.release().await
    }

    /// Cancels the engine. Safe to call from any number of tasks or from a
    /// signal handler; only the first call has an effect and returns `true`.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        tracing::info!("engine: closing");
        self.token.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Root token; every stream context handed out by the engine derives
    /// from it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    pub fn active_workers(&self) -> usize {
        self.termination.active()
    }

    async fn seed(&self) {
        let names: Vec<String> = self.spiders.spider_names().map(str::to_string).collect();
        for name in names {
            let streams = match self.spiders.start_requests(&name) {
                Ok(streams) => streams,
                Err(err) => {
                    tracing::error!(spider = %name, "engine: start requests failed: {}", err);
                    continue;
                }
            };
            let mut seeded = 0usize;
            for stream in streams.flatten() {
                stream.with_context(self.token.child_token());
                self.route(stream, 0).await;
                seeded += 1;
            }
            tracing::info!(spider = %name, seeded, "engine: seeded start requests");
        }
    }

    async fn worker(self: Arc<Self>, id: usize) {
        tracing::debug!(worker = id, "worker started");
        loop {
            if self.token.is_cancelled() || self.termination.drained().is_cancelled() {
                break;
            }

            // registered before polling so a wake-up in between is not lost
            let wake = self.termination.wake().notified();
            tokio::pin!(wake);
            wake.as_mut().enable();

            if let Some(request) = self.termination.acquire(self.scheduler.as_ref()).await {
                self.handle_request_stream(request).await;
                self.termination.release();
                continue;
            }

            if self.termination.try_finish(self.scheduler.as_ref()).await {
                tracing::debug!(worker = id, "no pending work and no active worker");
                break;
            }

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = self.termination.drained().cancelled() => break,
                _ = wake.as_mut() => {}
                _ = sleep(self.idle_poll_interval) => {}
            }
        }
        tracing::debug!(worker = id, "worker exited");
    }

    async fn handle_request_stream(&self, request: SharedStream) {
        Statistics::incr(&self.statistics.num_requests);
        let _linked = self.link_context(&request);
        let response = match self.downloader.download(request.clone()).await {
            Ok(response) => response,
            Err(err) => {
                Statistics::incr(&self.statistics.num_download_errors);
                tracing::warn!(
                    stream = request.name(),
                    "download failed, dropping request: {}",
                    err
                );
                return;
            }
        };
        inherit_metadata(&request, &response);
        response.with_context(request.context().child_token());
        self.handle_response_stream(response, 0).await;
    }

    /// Gives `request` a child of the root token, whatever context it was
    /// queued with, so engine shutdown reaches the downloader and everything
    /// derived from the response. The request's own context keeps cancelling
    /// the new one until the returned guard is dropped.
    fn link_context(&self, request: &SharedStream) -> DropGuard {
        let own = request.context();
        let linked = self.token.child_token();
        request.with_context(linked.clone());

        let done = CancellationToken::new();
        let guard = done.clone().drop_guard();
        tokio::spawn(async move {
            tokio::select! {
                _ = own.cancelled() => linked.cancel(),
                _ = done.cancelled() => {}
            }
        });
        guard
    }

    fn handle_response_stream(&self, response: SharedStream, depth: usize) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if depth > self.max_response_depth {
                Statistics::incr(&self.statistics.num_ignored);
                tracing::warn!(
                    depth,
                    "response nested deeper than {}, dropping",
                    self.max_response_depth
                );
                return;
            }
            Statistics::incr(&self.statistics.num_responses);
            let streams = match self.spiders.parse(response.clone()) {
                Ok(streams) => streams,
                Err(err) => {
                    Statistics::incr(&self.statistics.num_parse_errors);
                    tracing::warn!("parse failed, dropping response: {}", err);
                    return;
                }
            };
            for stream in streams.flatten() {
                stream.with_context(response.context().child_token());
                self.route(stream, depth + 1).await;
            }
        })
    }

    fn route(&self, stream: SharedStream, depth: usize) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let name = stream.name();
            match stream.kind() {
                StreamKind::Request => match self.scheduler.set_stream(stream).await {
                    Ok(()) => {
                        Statistics::incr(&self.statistics.num_scheduled);
                        self.termination.work_added();
                    }
                    Err(err) => {
                        Statistics::incr(&self.statistics.num_schedule_errors);
                        tracing::warn!(stream = name, "failed to schedule request: {}", err);
                    }
                },
                StreamKind::Response => self.handle_response_stream(stream, depth).await,
                StreamKind::Item => match self.outputter.output(stream).await {
                    Ok(()) => Statistics::incr(&self.statistics.num_items),
                    Err(err) => {
                        Statistics::incr(&self.statistics.num_output_errors);
                        tracing::warn!(stream = name, "failed to output item: {}", err);
                    }
                },
                StreamKind::Unknown => {
                    Statistics::incr(&self.statistics.num_ignored);
                    tracing::debug!(stream = name, "ignoring stream of unknown kind");
                }
            }
        })
    }

    async fn release(&self) -> Result<(), EngineError> {
        let mut errors = Vec::new();
        if let Err(err) = self.downloader.close().await {
            tracing::error!("engine: failed to close downloader: {}", err);
            errors.push(ReleaseError::from(err));
        }
        if let Err(err) = self.outputter.close().await {
            tracing::error!("engine: failed to close outputter: {}", err);
            errors.push(ReleaseError::from(err));
        }
        if let Err(err) = self.scheduler.close().await {
            tracing::error!("engine: failed to close scheduler: {}", err);
            errors.push(ReleaseError::from(err));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Release(errors))
        }
    }
}

/// Copies request metadata the response does not set itself, so routing keys
/// such as the spider name survive downloaders that build fresh responses.
fn inherit_metadata(request: &SharedStream, response: &SharedStream) {
    for (key, value) in request.core().metadata() {
        if response.get_metadata(&key).is_none() {
            response.set_metadata(&key, value);
        }
    }
}
