use std::{any::Any, sync::Arc};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    request::Headers, BaseCodec, CodecError, CrawlStream, SharedStream, StreamCodec, StreamCore,
    StreamKind,
};

/// A downloaded page handed to spider callbacks.
#[derive(Debug)]
pub struct HttpResponse {
    core: StreamCore,
    status: u16,
    url: Url,
    headers: Headers,
    body: Bytes,
}

impl HttpResponse {
    pub const NAME: &'static str = "streamcrawl.HttpResponse";

    pub fn new(status: u16, url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            core: StreamCore::new(),
            status,
            url,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl CrawlStream for HttpResponse {
    fn core(&self) -> &StreamCore {
        &self.core
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Response
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn codec(&self) -> Option<&'static dyn StreamCodec> {
        Some(&ResponseCodec)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Serialize, Deserialize)]
struct ResponseRecord {
    status: u16,
    url: String,
    headers: Headers,
    body: Bytes,
    base: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseCodec;

impl StreamCodec for ResponseCodec {
    fn encode(&self, stream: &dyn CrawlStream) -> Result<Vec<u8>, CodecError> {
        let response = stream
            .as_any()
            .downcast_ref::<HttpResponse>()
            .ok_or(CodecError::UnsupportedStream {
                expected: HttpResponse::NAME,
                found: stream.name(),
            })?;
        let record = ResponseRecord {
            status: response.status,
            url: response.url.to_string(),
            headers: response.headers.clone(),
            body: response.body.clone(),
            base: BaseCodec::encode_core(&response.core)?,
        };
        Ok(rmp_serde::to_vec_named(&record)?)
    }

    fn decode(&self, data: &[u8]) -> Result<SharedStream, CodecError> {
        let record: ResponseRecord = rmp_serde::from_slice(data)?;
        let url = Url::parse(&record.url)
            .map_err(|err| CodecError::Invalid(format!("response url '{}': {err}", record.url)))?;
        Ok(Arc::new(HttpResponse {
            core: BaseCodec::decode_core(&record.base)?,
            status: record.status,
            url,
            headers: record.headers,
            body: record.body,
        }))
    }
}
