use std::{any::Any, collections::BTreeMap};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    BaseCodec, CodecError, CrawlStream, SharedStream, StreamCodec, StreamCore, StreamKind,
};

/// Header names are stored lower-cased; a name may carry several values.
pub type Headers = BTreeMap<String, Vec<String>>;

/// A request stream wrapping the network request it describes.
///
/// The body is held as [`Bytes`], so reading it never consumes it: encoding
/// the stream or handing the body to a downloader leaves it intact for
/// every later reader.
#[derive(Debug)]
pub struct HttpRequest {
    core: StreamCore,
    method: String,
    url: Url,
    headers: Headers,
    body: Bytes,
}

impl HttpRequest {
    pub const NAME: &'static str = "streamcrawl.HttpRequest";

    pub fn new(method: &str, url: Url) -> Self {
        Self::from_parts(StreamCore::new(), method, url, Headers::new(), Bytes::new())
    }

    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new("GET", Url::parse(url)?))
    }

    pub fn post(url: &str, body: impl Into<Bytes>) -> Result<Self, url::ParseError> {
        Ok(Self::new("POST", Url::parse(url)?).with_body(body))
    }

    fn from_parts(core: StreamCore, method: &str, url: Url, headers: Headers, body: Bytes) -> Self {
        Self {
            core,
            method: method.to_ascii_uppercase(),
            url,
            headers,
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of the header `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn body(&self) -> Bytes {
        self.body.clone()
    }
}

impl CrawlStream for HttpRequest {
    fn core(&self) -> &StreamCore {
        &self.core
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Request
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn codec(&self) -> Option<&'static dyn StreamCodec> {
        Some(&RequestCodec)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Serialize, Deserialize)]
struct RequestRecord {
    method: String,
    url: String,
    headers: Headers,
    body: Bytes,
    base: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestCodec;

impl StreamCodec for RequestCodec {
    fn encode(&self, stream: &dyn CrawlStream) -> Result<Vec<u8>, CodecError> {
        let request = stream
            .as_any()
            .downcast_ref::<HttpRequest>()
            .ok_or(CodecError::UnsupportedStream {
                expected: HttpRequest::NAME,
                found: stream.name(),
            })?;
        let record = RequestRecord {
            method: request.method.clone(),
            url: request.url.to_string(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            base: BaseCodec::encode_core(&request.core)?,
        };
        Ok(rmp_serde::to_vec_named(&record)?)
    }

    fn decode(&self, data: &[u8]) -> Result<SharedStream, CodecError> {
        let record: RequestRecord = rmp_serde::from_slice(data)?;
        let url = Url::parse(&record.url)
            .map_err(|err| CodecError::Invalid(format!("request url '{}': {err}", record.url)))?;
        let core = BaseCodec::decode_core(&record.base)?;
        Ok(std::sync::Arc::new(HttpRequest::from_parts(
            core,
            &record.method,
            url,
            record.headers,
            record.body,
        )))
    }
}
