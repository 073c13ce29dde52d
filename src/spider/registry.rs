//! Process-wide table of spider callbacks.
//!
//! Built once before the engine runs and read-only afterwards. Callbacks are
//! keyed `"{spider}.{callback}"`; spider names may not contain `.`, so a key
//! always splits back into its owner at the first dot. A response picks its
//! callback through the [`SPIDER_NAME_KEY`] and [`CALLBACK_KEY`] metadata
//! entries.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use thiserror::Error;

use super::{Callback, ParseResult, Spider, SpiderError, StreamIter, DEFAULT_CALLBACK};
use crate::stream::{SharedStream, Value};

/// Metadata key naming the spider that owns a stream.
pub const SPIDER_NAME_KEY: &str = "spiderName";
/// Metadata key selecting a non-default callback.
pub const CALLBACK_KEY: &str = "callback";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("spider '{0}' already exists")]
    DuplicateSpider(String),
    #[error("invalid spider name '{0}': must be non-empty and contain no '.'")]
    InvalidSpiderName(String),
    #[error("callback '{0}' registered twice")]
    DuplicateCallback(String),
    #[error("spider not identified: stream carries no 'spiderName' metadata")]
    SpiderNotIdentified,
    #[error("spider '{0}' not found")]
    SpiderNotFound(String),
    #[error("callback '{0}' not found")]
    CallbackNotFound(String),
    #[error("metadata '{key}' must hold a string")]
    InvalidMetadata { key: &'static str },
    #[error("spider '{spider}' failed: {source}")]
    Spider {
        spider: String,
        #[source]
        source: SpiderError,
    },
}

#[derive(Default)]
pub struct SpiderRegistry {
    spiders: BTreeMap<String, Arc<dyn Spider>>,
    callbacks: HashMap<String, Callback>,
}

fn callback_key(spider: &str, callback: &str) -> String {
    format!("{spider}.{callback}")
}

impl SpiderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `spider` and all of its callbacks.
    ///
    /// # Panics
    ///
    /// Panics when a spider with the same name is already registered, when
    /// its name is empty or contains `.`, or when the spider declares the
    /// same callback name twice. These are configuration errors that must
    /// stop startup.
    pub fn register_spider(&mut self, spider: Arc<dyn Spider>) {
        if let Err(err) = self.try_register_spider(spider) {
            panic!("spider registration failed: {err}");
        }
    }

    pub fn try_register_spider(&mut self, spider: Arc<dyn Spider>) -> Result<(), RegistryError> {
        let name = spider.name();
        if name.is_empty() || name.contains('.') {
            return Err(RegistryError::InvalidSpiderName(name));
        }
        if self.spiders.contains_key(&name) {
            return Err(RegistryError::DuplicateSpider(name));
        }

        let mut table: HashMap<String, Callback> = HashMap::new();
        let default_callback: Callback = {
            let spider = spider.clone();
            Arc::new(move |response| spider.parse(response))
        };
        table.insert(
            callback_key(&name, DEFAULT_CALLBACK),
            tagging(&name, default_callback),
        );
        for (callback_name, callback) in spider.clone().callbacks() {
            let key = callback_key(&name, &callback_name);
            if table.contains_key(&key) || self.callbacks.contains_key(&key) {
                return Err(RegistryError::DuplicateCallback(key));
            }
            table.insert(key, tagging(&name, callback));
        }

        tracing::info!(spider = %name, callbacks = table.len(), "registered spider");
        self.callbacks.extend(table);
        self.spiders.insert(name, spider);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.spiders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spiders.is_empty()
    }

    pub fn spider_names(&self) -> impl Iterator<Item = &str> {
        self.spiders.keys().map(String::as_str)
    }

    pub fn contains_callback(&self, spider: &str, callback: &str) -> bool {
        self.callbacks.contains_key(&callback_key(spider, callback))
    }

    /// Seed requests of `spider`, tagged with its name.
    pub fn start_requests(&self, spider: &str) -> Result<StreamIter, RegistryError> {
        let found = self
            .spiders
            .get(spider)
            .ok_or_else(|| RegistryError::SpiderNotFound(spider.to_string()))?;
        let streams = found
            .start_requests()
            .map_err(|source| RegistryError::Spider {
                spider: spider.to_string(),
                source,
            })?;
        Ok(tag_streams(spider.to_string(), streams))
    }

    /// Resolves the `"{spider}.{callback}"` key a response is routed to.
    pub fn resolve(&self, response: &SharedStream) -> Result<String, RegistryError> {
        let spider = match response.get_metadata(SPIDER_NAME_KEY) {
            None => return Err(RegistryError::SpiderNotIdentified),
            Some(Value::Str(name)) => name,
            Some(_) => {
                return Err(RegistryError::InvalidMetadata {
                    key: SPIDER_NAME_KEY,
                })
            }
        };
        let callback = match response.get_metadata(CALLBACK_KEY) {
            None => DEFAULT_CALLBACK.to_string(),
            Some(Value::Str(name)) => name,
            Some(_) => return Err(RegistryError::InvalidMetadata { key: CALLBACK_KEY }),
        };
        if !self.spiders.contains_key(&spider) {
            return Err(RegistryError::SpiderNotFound(spider));
        }
        let key = callback_key(&spider, &callback);
        if !self.callbacks.contains_key(&key) {
            return Err(RegistryError::CallbackNotFound(key));
        }
        Ok(key)
    }

    /// Runs the callback selected by the response metadata.
    pub fn parse(&self, response: SharedStream) -> Result<StreamIter, RegistryError> {
        let key = self.resolve(&response)?;
        let callback = self
            .callbacks
            .get(&key)
            .ok_or_else(|| RegistryError::CallbackNotFound(key.clone()))?;
        callback(response).map_err(|source| RegistryError::Spider {
            spider: key,
            source,
        })
    }
}

/// Wraps `callback` so every stream it yields is tagged with `spider`.
fn tagging(spider: &str, callback: Callback) -> Callback {
    let spider = spider.to_string();
    Arc::new(move |response| -> ParseResult {
        let streams = callback(response)?;
        Ok(tag_streams(spider.clone(), streams))
    })
}

fn tag_streams(spider: String, streams: StreamIter) -> StreamIter {
    Box::new(streams.inspect(move |stream| {
        if let Some(stream) = stream {
            stream.set_metadata(SPIDER_NAME_KEY, Value::from(spider.as_str()));
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use super::*;
    use crate::{
        spider::{iter_streams, Callbacks},
        stream::{CrawlStream, HttpResponse, Item, StreamCore, StreamKind},
    };

    #[derive(Debug, Default)]
    struct Counter {
        core: StreamCore,
    }

    impl CrawlStream for Counter {
        fn core(&self) -> &StreamCore {
            &self.core
        }
        fn kind(&self) -> StreamKind {
            StreamKind::Item
        }
        fn name(&self) -> &'static str {
            "tests.Counter"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct TestSpider {
        name: &'static str,
    }

    impl TestSpider {
        fn parse_other(&self, _response: SharedStream) -> ParseResult {
            let item: SharedStream = Arc::new(Item::new(serde_json::json!({"from": "other"})));
            item.set_metadata("callback", "other".into());
            Ok(iter_streams(vec![item]))
        }

        fn parse_nil(&self, _response: SharedStream) -> ParseResult {
            let item: SharedStream = Arc::new(Counter::default());
            Ok(Box::new(vec![None, Some(item), None].into_iter()))
        }
    }

    impl Spider for TestSpider {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn start_requests(&self) -> ParseResult {
            let request: SharedStream =
                Arc::new(crate::stream::HttpRequest::get("https://example.com")?);
            Ok(iter_streams(vec![request]))
        }

        fn parse(&self, _response: SharedStream) -> ParseResult {
            Ok(Box::new((0..10).map(|n| {
                let counter: SharedStream = Arc::new(Counter::default());
                counter.set_metadata("n", Value::from(n));
                Some(counter)
            })))
        }

        fn callbacks(self: Arc<Self>) -> Callbacks {
            let other = self.clone();
            let nil = self.clone();
            Callbacks::new()
                .add("other", move |response| other.parse_other(response))
                .add("nil", move |response| nil.parse_nil(response))
                .add("failing", |_| Err(SpiderError::Message("boom".into())))
        }
    }

    fn registry() -> SpiderRegistry {
        let mut registry = SpiderRegistry::new();
        registry.register_spider(Arc::new(TestSpider { name: "S" }));
        registry
    }

    fn response(spider: Option<&str>, callback: Option<&str>) -> SharedStream {
        let response: SharedStream = Arc::new(HttpResponse::new(
            200,
            url::Url::parse("https://example.com").unwrap(),
            "",
        ));
        if let Some(spider) = spider {
            response.set_metadata(SPIDER_NAME_KEY, spider.into());
        }
        if let Some(callback) = callback {
            response.set_metadata(CALLBACK_KEY, callback.into());
        }
        response
    }

    #[test]
    fn resolves_default_and_named_callbacks() {
        let registry = registry();
        assert_eq!(registry.resolve(&response(Some("S"), None)).unwrap(), "S.Parse");
        assert_eq!(
            registry.resolve(&response(Some("S"), Some("other"))).unwrap(),
            "S.other"
        );
        assert!(registry.contains_callback("S", "nil"));
    }

    #[test]
    fn resolution_errors() {
        let registry = registry();
        assert!(matches!(
            registry.resolve(&response(None, None)),
            Err(RegistryError::SpiderNotIdentified)
        ));
        assert!(matches!(
            registry.resolve(&response(Some("T"), None)),
            Err(RegistryError::SpiderNotFound(name)) if name == "T"
        ));
        assert!(matches!(
            registry.resolve(&response(Some("S"), Some("missing"))),
            Err(RegistryError::CallbackNotFound(key)) if key == "S.missing"
        ));

        let bad = response(None, None);
        bad.set_metadata(SPIDER_NAME_KEY, Value::Int(1));
        assert!(matches!(
            registry.resolve(&bad),
            Err(RegistryError::InvalidMetadata { key: SPIDER_NAME_KEY })
        ));
    }

    #[test]
    fn default_callback_yields_tagged_streams_in_order() {
        let registry = registry();
        let streams: Vec<_> = registry
            .parse(response(Some("S"), None))
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(streams.len(), 10);
        for (n, stream) in streams.iter().enumerate() {
            assert_eq!(stream.get_metadata("n"), Some(Value::from(n as i64)));
            assert_eq!(stream.get_metadata(SPIDER_NAME_KEY), Some(Value::from("S")));
        }
    }

    #[test]
    fn named_callback_output_is_tagged() {
        let registry = registry();
        let streams: Vec<_> = registry
            .parse(response(Some("S"), Some("other")))
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].get_metadata(SPIDER_NAME_KEY), Some(Value::from("S")));
    }

    #[test]
    fn nil_elements_pass_through() {
        let registry = registry();
        let streams: Vec<_> = registry
            .parse(response(Some("S"), Some("nil")))
            .unwrap()
            .collect();
        assert_eq!(streams.len(), 3);
        assert!(streams[0].is_none());
        assert!(streams[2].is_none());
        let tagged = streams[1].as_ref().unwrap();
        assert_eq!(tagged.get_metadata(SPIDER_NAME_KEY), Some(Value::from("S")));
    }

    #[test]
    fn callback_failure_is_reported() {
        let registry = registry();
        let err = registry
            .parse(response(Some("S"), Some("failing")))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::Spider { .. }));
    }

    #[test]
    fn start_requests_are_tagged() {
        let registry = registry();
        let seeds: Vec<_> = registry.start_requests("S").unwrap().flatten().collect();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].kind(), StreamKind::Request);
        assert_eq!(seeds[0].get_metadata(SPIDER_NAME_KEY), Some(Value::from("S")));
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn duplicate_spider_is_fatal() {
        let mut registry = registry();
        registry.register_spider(Arc::new(TestSpider { name: "S" }));
    }

    #[test]
    fn duplicate_spider_leaves_registry_untouched() {
        let mut registry = registry();
        let err = registry
            .try_register_spider(Arc::new(TestSpider { name: "S" }))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateSpider(name) if name == "S"));
        assert_eq!(registry.len(), 1);
    }

    struct ShadowingSpider;

    impl Spider for ShadowingSpider {
        fn name(&self) -> String {
            "shadow".into()
        }
        fn start_requests(&self) -> ParseResult {
            Ok(crate::spider::empty())
        }
        fn parse(&self, _response: SharedStream) -> ParseResult {
            Ok(crate::spider::empty())
        }
        fn callbacks(self: Arc<Self>) -> Callbacks {
            Callbacks::new().add("Parse", |_| Ok(crate::spider::empty()))
        }
    }

    #[test]
    fn duplicate_callback_is_rejected() {
        let mut registry = SpiderRegistry::new();
        let err = registry
            .try_register_spider(Arc::new(ShadowingSpider))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCallback(key) if key == "shadow.Parse"));
        assert!(registry.is_empty());
    }

    /// Registers `parse` as the default callback and `other` under a
    /// caller-chosen name, both reporting which spider ran them.
    struct Named {
        name: &'static str,
        other: &'static str,
    }

    fn owner_item(owner: &str) -> ParseResult {
        let item: SharedStream = Arc::new(Item::new(serde_json::json!({ "owner": owner })));
        Ok(iter_streams(vec![item]))
    }

    impl Spider for Named {
        fn name(&self) -> String {
            self.name.to_string()
        }
        fn start_requests(&self) -> ParseResult {
            Ok(crate::spider::empty())
        }
        fn parse(&self, _response: SharedStream) -> ParseResult {
            owner_item(self.name)
        }
        fn callbacks(self: Arc<Self>) -> Callbacks {
            let owner = self.name;
            Callbacks::new().add(self.other, move |_| owner_item(owner))
        }
    }

    fn owner_of(streams: StreamIter) -> String {
        let streams: Vec<_> = streams.flatten().collect();
        assert_eq!(streams.len(), 1);
        let item = streams[0].downcast_ref::<Item>().unwrap();
        item.data()["owner"].as_str().unwrap().to_string()
    }

    #[test]
    fn capitalised_callback_names_resolve() {
        let mut registry = SpiderRegistry::new();
        registry.register_spider(Arc::new(Named {
            name: "S",
            other: "Other",
        }));

        assert_eq!(
            registry.resolve(&response(Some("S"), Some("Parse"))).unwrap(),
            "S.Parse"
        );
        assert_eq!(
            registry.resolve(&response(Some("S"), Some("Other"))).unwrap(),
            "S.Other"
        );
        let streams = registry.parse(response(Some("S"), Some("Parse"))).unwrap();
        assert_eq!(owner_of(streams), "S");
        assert!(matches!(
            registry.resolve(&response(Some("S"), Some("parse"))),
            Err(RegistryError::CallbackNotFound(key)) if key == "S.parse"
        ));
    }

    #[test]
    fn dotted_spider_names_cannot_take_over_callbacks() {
        let mut registry = SpiderRegistry::new();
        registry.register_spider(Arc::new(Named {
            name: "a",
            other: "b.c",
        }));

        let err = registry
            .try_register_spider(Arc::new(Named {
                name: "a.b",
                other: "c",
            }))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSpiderName(name) if name == "a.b"));
        assert_eq!(registry.len(), 1);

        let streams = registry.parse(response(Some("a"), Some("b.c"))).unwrap();
        let streams: Vec<_> = streams.flatten().collect();
        assert_eq!(streams[0].get_metadata(SPIDER_NAME_KEY), Some(Value::from("a")));
        let item = streams[0].downcast_ref::<Item>().unwrap();
        assert_eq!(item.data()["owner"], "a");
    }

    #[test]
    #[should_panic(expected = "invalid spider name")]
    fn empty_spider_name_is_fatal() {
        let mut registry = SpiderRegistry::new();
        registry.register_spider(Arc::new(Named { name: "", other: "x" }));
    }

    struct Impostor;

    impl Spider for Impostor {
        fn name(&self) -> String {
            "honest".into()
        }
        fn start_requests(&self) -> ParseResult {
            let request: SharedStream =
                Arc::new(crate::stream::HttpRequest::get("https://example.com")?);
            request.set_metadata(SPIDER_NAME_KEY, "someone-else".into());
            Ok(iter_streams(vec![request]))
        }
        fn parse(&self, _response: SharedStream) -> ParseResult {
            let item: SharedStream = Arc::new(Item::new(serde_json::Value::Null));
            item.set_metadata(SPIDER_NAME_KEY, "someone-else".into());
            Ok(iter_streams(vec![item]))
        }
    }

    #[test]
    fn owner_tag_overrides_what_the_callback_set() {
        let mut registry = SpiderRegistry::new();
        registry.register_spider(Arc::new(Impostor));

        let streams: Vec<_> = registry
            .parse(response(Some("honest"), None))
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(streams.len(), 1);
        assert_eq!(
            streams[0].get_metadata(SPIDER_NAME_KEY),
            Some(Value::from("honest"))
        );

        let seeds: Vec<_> = registry.start_requests("honest").unwrap().flatten().collect();
        assert_eq!(
            seeds[0].get_metadata(SPIDER_NAME_KEY),
            Some(Value::from("honest"))
        );
    }
}
