use crate::data::{PathError, StreamPath};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use super::persistence::{PersistenceBackend, PersistenceError};
use super::stream::{decode_log, log_key, meta_key, Stream, StreamConfig};

/// Registry of all streams, shared by every operator
pub struct StreamRegistry {
    /// Streams indexed by path
    streams: DashMap<StreamPath, Arc<Stream>>,
    /// Durable medium; `None` keeps everything in memory
    backend: Option<Arc<dyn PersistenceBackend>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
            backend: None,
        }
    }

    /// Open a registry over a backend, recovering every stream it holds
    pub fn open(backend: Arc<dyn PersistenceBackend>) -> Result<Self, StorageError> {
        let streams = DashMap::new();

        for key in backend.list_keys()? {
            let Some(stem) = key.strip_suffix(".meta") else {
                continue;
            };

            let meta = backend
                .read(&key)?
                .ok_or_else(|| PersistenceError::Corrupted(format!("missing {}", key)))?;
            let config: StreamConfig = serde_json::from_slice(&meta)
                .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;

            if StreamPath::from_storage_key(stem).ok().as_ref() != Some(&config.path) {
                tracing::warn!("Metadata {} describes {}, skipping", key, config.path);
                continue;
            }

            let log = log_key(&config.path);
            let existing = match backend.read(&log)? {
                Some(data) => {
                    let decoded = decode_log(&data)?;
                    if decoded.complete_len < data.len() {
                        tracing::warn!(
                            "Cutting {} bytes of incomplete trailing record from {}",
                            data.len() - decoded.complete_len,
                            log
                        );
                        backend.truncate(&log, decoded.complete_len as u64)?;
                    }
                    decoded.datapoints
                }
                None => Vec::new(),
            };

            tracing::info!("Recovered stream {} with {} datapoints", config.path, existing.len());

            let path = config.path.clone();
            let stream = Stream::with_backend(config, Arc::clone(&backend), existing);
            streams.insert(path, Arc::new(stream));
        }

        Ok(Self {
            streams,
            backend: Some(backend),
        })
    }

    /// Create a new stream with configuration
    pub fn create_stream(&self, config: StreamConfig) -> Result<Arc<Stream>, StorageError> {
        match self.streams.entry(config.path.clone()) {
            Entry::Occupied(_) => Err(StorageError::StreamExists(config.path.to_string())),
            Entry::Vacant(slot) => {
                let stream = match &self.backend {
                    Some(backend) => {
                        let meta = serde_json::to_vec_pretty(&config)
                            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
                        // A stale log from a deleted stream must not resurface
                        backend.delete(&log_key(&config.path))?;
                        backend.write(&meta_key(&config.path), &meta)?;
                        Stream::with_backend(config, Arc::clone(backend), Vec::new())
                    }
                    None => Stream::new(config),
                };
                let stream = Arc::new(stream);
                slot.insert(Arc::clone(&stream));
                tracing::info!("Created stream {}", stream.path());
                Ok(stream)
            }
        }
    }

    /// Get an existing stream
    pub fn get_stream(&self, path: &StreamPath) -> Option<Arc<Stream>> {
        self.streams.get(path).map(|s| Arc::clone(&s))
    }

    /// Resolve a textual path to a stream handle
    pub fn resolve(&self, path: &str) -> Result<Arc<Stream>, StorageError> {
        let path = StreamPath::parse(path)?;
        self.get_stream(&path)
            .ok_or_else(|| StorageError::StreamNotFound(path.to_string()))
    }

    /// Delete a stream and its stored data
    pub fn delete_stream(&self, path: &StreamPath) -> Result<(), StorageError> {
        let Some((_, stream)) = self.streams.remove(path) else {
            return Err(StorageError::StreamNotFound(path.to_string()));
        };

        if let Some(backend) = &self.backend {
            backend.delete(&meta_key(path))?;
            backend.delete(&log_key(path))?;
        }

        tracing::info!("Deleted stream {} ({} datapoints)", path, stream.len());
        Ok(())
    }

    /// List all stream paths, sorted
    pub fn list_streams(&self) -> Vec<StreamPath> {
        let mut paths: Vec<StreamPath> = self.streams.iter().map(|e| e.key().clone()).collect();
        paths.sort_by_key(|p| p.to_string());
        paths
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Total datapoints stored across all streams
    pub fn total_datapoints(&self) -> usize {
        self.streams.iter().map(|e| e.value().len()).sum()
    }

    /// Flush the backend, if any
    pub fn sync(&self) -> Result<(), StorageError> {
        if let Some(backend) = &self.backend {
            backend.sync()?;
        }
        Ok(())
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Stream '{0}' already exists")]
    StreamExists(String),

    #[error("Stream '{0}' not found")]
    StreamNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(#[from] PathError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataType, Datapoint};
    use crate::storage::persistence::{FileBackend, PersistenceConfig};
    use tempfile::TempDir;

    fn path(p: &str) -> StreamPath {
        StreamPath::parse(p).unwrap()
    }

    #[test]
    fn test_create_stream() {
        let registry = StreamRegistry::new();

        registry.create_stream(StreamConfig::new(path("alice/phone/steps"))).unwrap();

        assert!(registry.get_stream(&path("alice/phone/steps")).is_some());
        assert!(registry.get_stream(&path("alice/phone/nope")).is_none());
    }

    #[test]
    fn test_create_duplicate_stream() {
        let registry = StreamRegistry::new();

        registry.create_stream(StreamConfig::new(path("alice/phone/steps"))).unwrap();
        assert!(matches!(
            registry.create_stream(StreamConfig::new(path("alice/phone/steps"))),
            Err(StorageError::StreamExists(_))
        ));
    }

    #[test]
    fn test_resolve() {
        let registry = StreamRegistry::new();
        registry.create_stream(StreamConfig::new(path("alice/phone/steps"))).unwrap();

        assert!(registry.resolve("alice/phone/steps").is_ok());
        assert!(matches!(
            registry.resolve("alice/phone/other"),
            Err(StorageError::StreamNotFound(_))
        ));
        assert!(matches!(
            registry.resolve("alice"),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_list_and_delete() {
        let registry = StreamRegistry::new();

        registry.create_stream(StreamConfig::new(path("bob/car/speed"))).unwrap();
        registry.create_stream(StreamConfig::new(path("alice/phone/steps"))).unwrap();

        let streams = registry.list_streams();
        assert_eq!(streams, vec![path("alice/phone/steps"), path("bob/car/speed")]);

        registry.delete_stream(&path("bob/car/speed")).unwrap();
        assert_eq!(registry.stream_count(), 1);

        assert!(matches!(
            registry.delete_stream(&path("bob/car/speed")),
            Err(StorageError::StreamNotFound(_))
        ));
    }

    #[test]
    fn test_recover_from_backend() {
        let temp_dir = TempDir::new().unwrap();
        let backend: Arc<dyn PersistenceBackend> =
            Arc::new(FileBackend::new(PersistenceConfig::new(temp_dir.path())).unwrap());

        {
            let registry = StreamRegistry::open(Arc::clone(&backend)).unwrap();
            let config = StreamConfig::new(path("alice/phone/steps")).with_schema(DataType::Integer);
            let stream = registry.create_stream(config).unwrap();
            stream
                .insert(vec![Datapoint::new(1.0, 10i64), Datapoint::new(2.0, 20i64)], false)
                .unwrap();
            stream.insert(vec![Datapoint::new(0.0, 30i64)], true).unwrap();
            registry.sync().unwrap();
        }

        let registry = StreamRegistry::open(backend).unwrap();
        let stream = registry.get_stream(&path("alice/phone/steps")).unwrap();
        assert_eq!(stream.len(), 3);
        assert_eq!(stream.config.schema, DataType::Integer);
        assert_eq!(stream.read_index_range(2, 3), vec![Datapoint::new(2.0, 30i64)]);
        assert_eq!(registry.total_datapoints(), 3);
    }

    #[test]
    fn test_misfiled_metadata_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let backend: Arc<dyn PersistenceBackend> =
            Arc::new(FileBackend::new(PersistenceConfig::new(temp_dir.path())).unwrap());

        let config = StreamConfig::new(path("alice/phone/steps"));
        let meta = serde_json::to_vec(&config).unwrap();
        backend.write("bob.phone.steps.meta", &meta).unwrap();
        backend.write("not-a-path.meta", &meta).unwrap();

        let registry = StreamRegistry::open(backend).unwrap();
        assert!(registry.list_streams().is_empty());
    }

    #[test]
    fn test_torn_tail_is_cut_before_new_appends() {
        let temp_dir = TempDir::new().unwrap();
        let backend: Arc<dyn PersistenceBackend> =
            Arc::new(FileBackend::new(PersistenceConfig::new(temp_dir.path())).unwrap());
        let steps = path("alice/phone/steps");

        {
            let registry = StreamRegistry::open(Arc::clone(&backend)).unwrap();
            let stream = registry.create_stream(StreamConfig::new(steps.clone())).unwrap();
            stream.insert(vec![Datapoint::new(1.0, 1i64)], false).unwrap();
        }
        backend.append(&log_key(&steps), b"{\"t\":2.0,\"d").unwrap();

        {
            let registry = StreamRegistry::open(Arc::clone(&backend)).unwrap();
            let stream = registry.get_stream(&steps).unwrap();
            assert_eq!(stream.len(), 1);
            stream.insert(vec![Datapoint::new(3.0, 3i64)], false).unwrap();
        }

        let registry = StreamRegistry::open(Arc::clone(&backend)).unwrap();
        let stream = registry.get_stream(&steps).unwrap();
        assert_eq!(
            stream.read_index_range(0, 10),
            vec![Datapoint::new(1.0, 1i64), Datapoint::new(3.0, 3i64)]
        );
        assert_eq!(
            backend.read(&log_key(&steps)).unwrap().unwrap(),
            b"{\"t\":1.0,\"d\":1}\n{\"t\":3.0,\"d\":3}\n"
        );
    }

    #[test]
    fn test_recreated_stream_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let backend: Arc<dyn PersistenceBackend> =
            Arc::new(FileBackend::new(PersistenceConfig::new(temp_dir.path())).unwrap());
        let registry = StreamRegistry::open(Arc::clone(&backend)).unwrap();

        let stream = registry.create_stream(StreamConfig::new(path("alice/phone/steps"))).unwrap();
        stream.insert(vec![Datapoint::new(1.0, 1i64)], false).unwrap();
        registry.delete_stream(&path("alice/phone/steps")).unwrap();

        let stream = registry.create_stream(StreamConfig::new(path("alice/phone/steps"))).unwrap();
        assert!(stream.is_empty());

        let reopened = StreamRegistry::open(backend).unwrap();
        assert!(reopened.get_stream(&path("alice/phone/steps")).unwrap().is_empty());
    }
}
