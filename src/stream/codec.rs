//! Encode/decode contract used when streams are persisted.
//!
//! Codecs write MessagePack. The base codec covers exactly the metadata map;
//! variant codecs embed those base bytes as a sub-field next to their own
//! payload. The byte form is opaque and carries no compatibility guarantee
//! across versions. Contexts are never persisted: a decoded stream starts with
//! a fresh cancellation token.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    item::ItemCodec, request::RequestCodec, response::ResponseCodec, CrawlStream, HttpRequest,
    HttpResponse, Item, SharedStream, StreamCore, Value,
};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec for '{expected}' cannot handle stream '{found}'")]
    UnsupportedStream {
        expected: &'static str,
        found: &'static str,
    },
    #[error("no codec registered for stream '{0}'")]
    UnknownStream(String),
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("invalid stream payload: {0}")]
    Invalid(String),
}

pub trait StreamCodec: Send + Sync {
    fn encode(&self, stream: &dyn CrawlStream) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, data: &[u8]) -> Result<SharedStream, CodecError>;
}

/// Encodes the part every stream shares: its metadata map.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseCodec;

impl BaseCodec {
    pub fn encode_core(core: &StreamCore) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec(&core.metadata())?)
    }

    pub fn decode_core(data: &[u8]) -> Result<StreamCore, CodecError> {
        let metadata: HashMap<String, Value> = rmp_serde::from_slice(data)?;
        Ok(StreamCore::with_metadata(metadata))
    }
}

/// A persisted stream: the type name selects the codec on the way back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedStream {
    pub name: String,
    pub data: Vec<u8>,
}

/// Maps stream names to codecs so persisted bytes can be decoded without
/// knowing the concrete type up front.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: BTreeMap<String, &'static dyn StreamCodec>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self {
            codecs: BTreeMap::new(),
        }
    }

    /// Registry knowing the built-in request, response and item codecs.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(HttpRequest::NAME, &RequestCodec);
        registry.register(HttpResponse::NAME, &ResponseCodec);
        registry.register(Item::NAME, &ItemCodec);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, codec: &'static dyn StreamCodec) {
        self.codecs.insert(name.into(), codec);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    /// Returns `Ok(None)` for streams that declare no codec; callers skip
    /// those instead of failing.
    pub fn encode(&self, stream: &dyn CrawlStream) -> Result<Option<EncodedStream>, CodecError> {
        let Some(codec) = stream.codec() else {
            return Ok(None);
        };
        let data = codec.encode(stream)?;
        Ok(Some(EncodedStream {
            name: stream.name().to_string(),
            data,
        }))
    }

    pub fn decode(&self, encoded: &EncodedStream) -> Result<SharedStream, CodecError> {
        let codec = self
            .codecs
            .get(&encoded.name)
            .ok_or_else(|| CodecError::UnknownStream(encoded.name.clone()))?;
        codec.decode(&encoded.data)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
