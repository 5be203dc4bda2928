use crate::auth::AccessDescriptor;
use crate::data::{DataType, Datapoint, StreamPath};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::persistence::{PersistenceBackend, PersistenceError};

/// Configuration of a stream, fixed at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub path: StreamPath,
    /// Schema tag every stored value must satisfy
    #[serde(default)]
    pub schema: DataType,
    #[serde(default)]
    pub access: AccessDescriptor,
    #[serde(default)]
    pub description: String,
}

impl StreamConfig {
    pub fn new(path: StreamPath) -> Self {
        Self {
            path,
            schema: DataType::default(),
            access: AccessDescriptor::default(),
            description: String::new(),
        }
    }

    pub fn with_schema(mut self, schema: DataType) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_access(mut self, access: AccessDescriptor) -> Self {
        self.access = access;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// One stream's ordered datapoint sequence.
///
/// The position of a datapoint in `datapoints` is its index. Inserts are
/// serialized by `writer`; the sequence itself is only write-locked for the
/// final publish, so readers never wait on the persistence backend and never
/// observe half of a batch.
pub struct Stream {
    pub config: StreamConfig,
    datapoints: RwLock<Vec<Datapoint>>,
    writer: Mutex<()>,
    backend: Option<Arc<dyn PersistenceBackend>>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("config", &self.config)
            .field("len", &self.len())
            .field("persistent", &self.backend.is_some())
            .finish()
    }
}

impl Stream {
    /// In-memory stream
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            datapoints: RwLock::new(Vec::new()),
            writer: Mutex::new(()),
            backend: None,
        }
    }

    /// Stream whose inserts are appended to `backend`. `existing` is the
    /// sequence already recovered from the backend's log.
    pub fn with_backend(
        config: StreamConfig,
        backend: Arc<dyn PersistenceBackend>,
        existing: Vec<Datapoint>,
    ) -> Self {
        Self {
            config,
            datapoints: RwLock::new(existing),
            writer: Mutex::new(()),
            backend: Some(backend),
        }
    }

    pub fn path(&self) -> &StreamPath {
        &self.config.path
    }

    pub fn len(&self) -> usize {
        self.datapoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a batch. Without `restamp` any timestamp earlier than the one
    /// before it fails the whole batch; with `restamp` such timestamps are
    /// raised to the previous timestamp. Returns the number inserted.
    pub fn insert(&self, mut datapoints: Vec<Datapoint>, restamp: bool) -> Result<usize, StreamError> {
        if datapoints.is_empty() {
            return Ok(0);
        }

        for dp in &datapoints {
            if !dp.timestamp.is_finite() {
                return Err(StreamError::InvalidTimestamp(dp.timestamp));
            }
            if !self.config.schema.accepts(&dp.value) {
                return Err(StreamError::SchemaMismatch {
                    expected: self.config.schema,
                    found: dp.value.type_name(),
                });
            }
        }

        let _guard = self.writer.lock();

        let (base_index, mut tail) = {
            let stored = self.datapoints.read();
            (stored.len(), stored.last().map(|dp| dp.timestamp))
        };

        for (offset, dp) in datapoints.iter_mut().enumerate() {
            if let Some(previous) = tail {
                if dp.timestamp < previous {
                    if !restamp {
                        return Err(StreamError::OutOfOrder {
                            index: base_index + offset,
                            timestamp: dp.timestamp,
                            previous,
                        });
                    }
                    dp.timestamp = previous;
                }
            }
            tail = Some(dp.timestamp);
        }

        if let Some(backend) = &self.backend {
            let encoded = encode_log(&datapoints)?;
            backend.append(&log_key(self.path()), &encoded)?;
        }

        let count = datapoints.len();
        self.datapoints.write().extend(datapoints);

        tracing::trace!(
            "stream {} assigned indices [{}, {})",
            self.path(),
            base_index,
            base_index + count
        );

        Ok(count)
    }

    /// Datapoints with index in `[i1, i2)`, clipped to the stored range
    pub fn read_index_range(&self, i1: i64, i2: i64) -> Vec<Datapoint> {
        self.with_snapshot(|stored| stored[clip_index_range(i1, i2, stored.len())].to_vec())
    }

    /// Run `f` against a consistent view of the stored sequence. Inserts
    /// publishing during `f` wait until it returns, so keep `f` short.
    pub fn with_snapshot<R>(&self, f: impl FnOnce(&[Datapoint]) -> R) -> R {
        let stored = self.datapoints.read();
        f(&stored)
    }
}

/// Clip a half-open index interval to `[0, len)`
pub fn clip_index_range(i1: i64, i2: i64, len: usize) -> std::ops::Range<usize> {
    let len = len as i64;
    let start = i1.clamp(0, len);
    let end = i2.clamp(0, len);
    if start >= end {
        return 0..0;
    }
    start as usize..end as usize
}

pub(crate) fn log_key(path: &StreamPath) -> String {
    format!("{}.log", path.storage_key())
}

pub(crate) fn meta_key(path: &StreamPath) -> String {
    format!("{}.meta", path.storage_key())
}

/// One JSON document per line
pub(crate) fn encode_log(datapoints: &[Datapoint]) -> Result<Vec<u8>, PersistenceError> {
    let mut buf = Vec::with_capacity(datapoints.len() * 32);
    for dp in datapoints {
        serde_json::to_writer(&mut buf, dp)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// A decoded stream log
#[derive(Debug, PartialEq)]
pub(crate) struct DecodedLog {
    pub datapoints: Vec<Datapoint>,
    /// Length of the prefix made of whole lines. Anything after it is the
    /// remains of an interrupted append.
    pub complete_len: usize,
}

/// Decode a stream log. A final line without a terminating newline is not
/// decoded; `complete_len` tells the caller where to cut the log.
pub(crate) fn decode_log(data: &[u8]) -> Result<DecodedLog, PersistenceError> {
    let complete_len = data
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1);

    let mut datapoints = Vec::new();
    for (line_no, line) in data[..complete_len].split(|b| *b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        let dp: Datapoint = serde_json::from_slice(line).map_err(|e| {
            PersistenceError::Corrupted(format!("line {}: {}", line_no + 1, e))
        })?;
        datapoints.push(dp);
    }
    Ok(DecodedLog {
        datapoints,
        complete_len,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Datapoint {index} has timestamp {timestamp} earlier than previous timestamp {previous}")]
    OutOfOrder {
        index: usize,
        timestamp: f64,
        previous: f64,
    },

    #[error("Value of type {found} does not match stream schema {expected}")]
    SchemaMismatch {
        expected: DataType,
        found: &'static str,
    },

    #[error("Invalid timestamp {0}")]
    InvalidTimestamp(f64),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}
