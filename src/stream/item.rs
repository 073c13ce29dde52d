use std::{any::Any, sync::Arc};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{BaseCodec, CodecError, CrawlStream, SharedStream, StreamCodec, StreamCore, StreamKind};

/// A scraped record on its way to the outputter.
#[derive(Debug)]
pub struct Item {
    core: StreamCore,
    data: serde_json::Value,
}

impl Item {
    pub const NAME: &'static str = "streamcrawl.Item";

    pub fn new(data: serde_json::Value) -> Self {
        Self {
            core: StreamCore::new(),
            data,
        }
    }

    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

impl CrawlStream for Item {
    fn core(&self) -> &StreamCore {
        &self.core
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Item
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn codec(&self) -> Option<&'static dyn StreamCodec> {
        Some(&ItemCodec)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Serialize, Deserialize)]
struct ItemRecord {
    // JSON text
    data: String,
    base: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ItemCodec;

impl StreamCodec for ItemCodec {
    fn encode(&self, stream: &dyn CrawlStream) -> Result<Vec<u8>, CodecError> {
        let item = stream
            .as_any()
            .downcast_ref::<Item>()
            .ok_or(CodecError::UnsupportedStream {
                expected: Item::NAME,
                found: stream.name(),
            })?;
        let record = ItemRecord {
            data: item.data.to_string(),
            base: BaseCodec::encode_core(&item.core)?,
        };
        Ok(rmp_serde::to_vec_named(&record)?)
    }

    fn decode(&self, data: &[u8]) -> Result<SharedStream, CodecError> {
        let record: ItemRecord = rmp_serde::from_slice(data)?;
        let data = serde_json::from_str(&record.data)
            .map_err(|err| CodecError::Invalid(format!("item payload: {err}")))?;
        Ok(Arc::new(Item {
            core: BaseCodec::decode_core(&record.base)?,
            data,
        }))
    }
}
