use std::sync::Arc;

use futures::StreamExt;
use streamcrawl::{
    ChannelOutputter, Engine, EngineOptions, Item, MemoryScheduler, SpiderRegistry,
};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    println!("starting fake_crawler");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("debug"))
                .expect("telemetry: Creating EnvFilter"),
        )
        .init();

    let mut spiders = SpiderRegistry::new();
    spiders.register_spider(Arc::new(fake_crawler::FakeSpider::new()));

    let (outputter, items) = ChannelOutputter::with_stream(64);
    let engine = Engine::new(
        Arc::new(MemoryScheduler::new()),
        Arc::new(fake_crawler::FakeDownloader),
        Arc::new(outputter),
        spiders,
        EngineOptions::default(),
    );

    let printer = tokio::spawn(items.for_each_concurrent(4, |item| async move {
        if let Some(item) = item.downcast_ref::<Item>() {
            println!("item: {}", item.data());
        }
    }));

    if let Err(err) = engine.run().await {
        tracing::error!("fake_crawler: {}", err);
    }
    let _ = printer.await;
}

pub mod fake_crawler {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use streamcrawl::{
        spider::iter_streams, Callbacks, CrawlStream, DownloadError, Downloader, HttpRequest,
        HttpResponse, Item, ParseResult, SharedStream, Spider, SpiderError, StreamKind,
        CALLBACK_KEY,
    };

    #[derive(Debug)]
    pub struct FakeSpider {}

    impl FakeSpider {
        pub fn new() -> Self {
            Self {}
        }

        fn parse_detail(&self, response: SharedStream) -> ParseResult {
            let response = as_response(&response)?;
            let item = Item::new(serde_json::json!({
                "url": response.url().as_str(),
                "body": response.text(),
            }));
            Ok(iter_streams(vec![Arc::new(item) as SharedStream]))
        }
    }

    fn as_response(stream: &SharedStream) -> Result<&HttpResponse, SpiderError> {
        stream
            .downcast_ref::<HttpResponse>()
            .ok_or(SpiderError::UnexpectedStream {
                expected: StreamKind::Response,
                found: stream.kind(),
            })
    }

    impl Spider for FakeSpider {
        fn name(&self) -> String {
            "fake-spider".to_string()
        }

        fn start_requests(&self) -> ParseResult {
            let requests = ["1", "2", "3"]
                .iter()
                .map(|n| {
                    HttpRequest::get(&format!("https://example.com/{n}"))
                        .map(|request| Arc::new(request) as SharedStream)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(iter_streams(requests))
        }

        fn parse(&self, response: SharedStream) -> ParseResult {
            let response = as_response(&response)?;
            let url = response.url().as_str();
            let mut streams: Vec<SharedStream> = Vec::new();
            if !url.ends_with('0') {
                streams.push(Arc::new(HttpRequest::get(&format!("{url}0"))?));
            }
            let detail = HttpRequest::get(&format!("{url}/detail"))?;
            detail.set_metadata(CALLBACK_KEY, "detail".into());
            streams.push(Arc::new(detail));
            Ok(iter_streams(streams))
        }

        fn callbacks(self: Arc<Self>) -> Callbacks {
            Callbacks::new().add("detail", move |response| self.parse_detail(response))
        }
    }

    /// Answers every request after a short delay without touching the network.
    pub struct FakeDownloader;

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn download(&self, request: SharedStream) -> Result<SharedStream, DownloadError> {
            let kind = request.kind();
            let request = request
                .downcast_ref::<HttpRequest>()
                .ok_or(DownloadError::Unsupported(kind))?;
            println!("downloading {}", request.url());
            tokio::time::sleep(Duration::from_millis(200)).await;
            let body = format!("Scraped from {}", request.url());
            Ok(Arc::new(HttpResponse::new(200, request.url().clone(), body)))
        }
    }
}
