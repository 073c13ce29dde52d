use std::{
    collections::VecDeque,
    fs,
    io::{self, Write},
    path::Path,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SchedulerError;
use crate::stream::{CodecRegistry, EncodedStream, SharedStream};

#[derive(Debug, Serialize, Deserialize)]
struct QueueState {
    saved_at: DateTime<Utc>,
    streams: Vec<EncodedStream>,
}

/// Writes the persistable part of `pending` to `state_path`. Streams without
/// a codec are skipped; streams failing to encode are logged and dropped.
/// Returns the number of streams written.
pub(crate) fn write_state(
    state_path: &Path,
    codecs: &CodecRegistry,
    pending: &[SharedStream],
) -> Result<usize, SchedulerError> {
    let mut streams = Vec::with_capacity(pending.len());
    for stream in pending {
        match codecs.encode(stream.as_ref()) {
            Ok(Some(encoded)) => streams.push(encoded),
            Ok(None) => {
                tracing::trace!(stream = stream.name(), "stream is not persistable, skipping")
            }
            Err(err) => {
                tracing::warn!(stream = stream.name(), "failed to encode stream: {:?}", err)
            }
        }
    }
    let written = streams.len();
    let state = QueueState {
        saved_at: Utc::now(),
        streams,
    };
    let json_string = serde_json::to_string(&state)?;

    tracing::info!(
        "scheduler: writing {} streams to '{}'",
        written,
        state_path.display()
    );
    let mut file = fs::File::create(state_path)?;
    file.write_all(json_string.as_bytes())?;
    tracing::info!("scheduler: wrote state to '{}'", state_path.display());
    Ok(written)
}

/// Reads a queue saved by [`write_state`]. A missing or unreadable file
/// yields an empty queue; undecodable entries are skipped.
pub(crate) fn read_state(state_path: &Path, codecs: &CodecRegistry) -> VecDeque<SharedStream> {
    let file = match fs::File::open(state_path) {
        Ok(file) => file,
        Err(err) => {
            tracing::warn!(
                "Failed to open file from '{}' Error: '{:?}'. Ignoring",
                state_path.display(),
                err
            );
            return VecDeque::new();
        }
    };
    let reader = io::BufReader::new(file);
    let state = match serde_json::from_reader::<_, QueueState>(reader) {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(
                "Failed to read saved state from '{}' Error: '{:?}'. Ignoring",
                state_path.display(),
                err
            );
            return VecDeque::new();
        }
    };

    let mut queue = VecDeque::with_capacity(state.streams.len());
    for encoded in &state.streams {
        match codecs.decode(encoded) {
            Ok(stream) => queue.push_back(stream),
            Err(err) => tracing::error!(
                stream = %encoded.name,
                "Failed to decode saved stream Error: '{:?}'. Ignoring",
                err
            ),
        }
    }
    tracing::info!(
        saved_at = %state.saved_at,
        restored = queue.len(),
        "read saved state from '{}'",
        state_path.display()
    );
    queue
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::stream::{HttpRequest, Item, StreamKind};

    #[test]
    fn missing_file_yields_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = read_state(&dir.path().join("absent.json"), &CodecRegistry::default());
        assert!(queue.is_empty());
    }

    #[test]
    fn corrupt_file_yields_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(read_state(&path, &CodecRegistry::default()).is_empty());
    }

    #[test]
    fn undecodable_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let codecs = CodecRegistry::default();
        let pending: Vec<SharedStream> = vec![
            Arc::new(HttpRequest::get("https://example.com/1").unwrap()),
            Arc::new(Item::new(serde_json::json!({"title": "x"}))),
        ];
        assert_eq!(write_state(&path, &codecs, &pending).unwrap(), 2);

        // a reader that only knows requests drops the item
        let mut requests_only = CodecRegistry::new();
        requests_only.register(HttpRequest::NAME, &crate::stream::request::RequestCodec);
        let queue = read_state(&path, &requests_only);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].kind(), StreamKind::Request);
    }
}
