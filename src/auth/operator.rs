//! The operation surface adapters talk to.
//!
//! `DatabaseOperator` runs the five stream operations with no permission
//! checks. `AuthOperator` is a proxy around it bound to one caller: it
//! resolves the stream once, checks the caller against the stream's access
//! descriptor, and only then hands the same resolved stream to the inner
//! operator.

use super::access::Action;
use super::identity::Identity;
use crate::data::{Datapoint, StreamPath};
use crate::query::{self, TransformCache, TransformError};
use crate::storage::{StorageError, Stream, StreamConfig, StreamError, StreamRegistry};
use std::sync::Arc;

/// The five data operations every operator supports
pub trait Operator: Send + Sync {
    /// Number of datapoints stored in the stream
    fn length(&self, path: &str) -> Result<usize, OperatorError>;

    /// Insert a batch; returns the count inserted
    fn insert_stream(
        &self,
        path: &str,
        datapoints: Vec<Datapoint>,
        restamp: bool,
    ) -> Result<usize, OperatorError>;

    /// Datapoints with index in `[i1, i2)`, then transformed
    fn index_range(
        &self,
        path: &str,
        i1: i64,
        i2: i64,
        transform: &str,
    ) -> Result<Vec<Datapoint>, OperatorError>;

    /// Datapoints with timestamp in `[t1, t2)`, at most `limit` when positive, then transformed
    fn time_range(
        &self,
        path: &str,
        t1: f64,
        t2: f64,
        limit: i64,
        transform: &str,
    ) -> Result<Vec<Datapoint>, OperatorError>;

    /// Smallest index whose timestamp is at least `t`
    fn time_to_index(&self, path: &str, t: f64) -> Result<usize, OperatorError>;
}

/// Unchecked operator over the shared registry
pub struct DatabaseOperator {
    registry: Arc<StreamRegistry>,
    transforms: Arc<TransformCache>,
}

impl DatabaseOperator {
    pub fn new(registry: Arc<StreamRegistry>, transforms: Arc<TransformCache>) -> Self {
        Self {
            registry,
            transforms,
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn transforms(&self) -> &Arc<TransformCache> {
        &self.transforms
    }

    pub fn resolve(&self, path: &str) -> Result<Arc<Stream>, OperatorError> {
        Ok(self.registry.resolve(path)?)
    }

    pub fn length_of(&self, stream: &Stream) -> usize {
        stream.len()
    }

    pub fn insert_into(
        &self,
        stream: &Stream,
        datapoints: Vec<Datapoint>,
        restamp: bool,
    ) -> Result<usize, OperatorError> {
        Ok(stream.insert(datapoints, restamp)?)
    }

    pub fn index_range_of(
        &self,
        stream: &Stream,
        i1: i64,
        i2: i64,
        transform: &str,
    ) -> Result<Vec<Datapoint>, OperatorError> {
        let pipeline = self.pipeline(transform)?;
        let datapoints = query::index_range(stream, i1, i2);
        self.finish(datapoints, pipeline)
    }

    pub fn time_range_of(
        &self,
        stream: &Stream,
        t1: f64,
        t2: f64,
        limit: i64,
        transform: &str,
    ) -> Result<Vec<Datapoint>, OperatorError> {
        let pipeline = self.pipeline(transform)?;
        let datapoints = query::time_range(stream, t1, t2, limit);
        self.finish(datapoints, pipeline)
    }

    pub fn time_to_index_of(&self, stream: &Stream, t: f64) -> usize {
        query::time_to_index(stream, t)
    }

    /// Parse before touching the store so a bad transform never reads data
    fn pipeline(&self, transform: &str) -> Result<Option<Arc<query::Pipeline>>, OperatorError> {
        if transform.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.transforms.get_or_parse(transform)?))
    }

    fn finish(
        &self,
        datapoints: Vec<Datapoint>,
        pipeline: Option<Arc<query::Pipeline>>,
    ) -> Result<Vec<Datapoint>, OperatorError> {
        match pipeline {
            Some(pipeline) => Ok(pipeline.apply(datapoints)?),
            None => Ok(datapoints),
        }
    }
}

impl Operator for DatabaseOperator {
    fn length(&self, path: &str) -> Result<usize, OperatorError> {
        let stream = self.resolve(path)?;
        Ok(self.length_of(&stream))
    }

    fn insert_stream(
        &self,
        path: &str,
        datapoints: Vec<Datapoint>,
        restamp: bool,
    ) -> Result<usize, OperatorError> {
        let stream = self.resolve(path)?;
        self.insert_into(&stream, datapoints, restamp)
    }

    fn index_range(
        &self,
        path: &str,
        i1: i64,
        i2: i64,
        transform: &str,
    ) -> Result<Vec<Datapoint>, OperatorError> {
        let stream = self.resolve(path)?;
        self.index_range_of(&stream, i1, i2, transform)
    }

    fn time_range(
        &self,
        path: &str,
        t1: f64,
        t2: f64,
        limit: i64,
        transform: &str,
    ) -> Result<Vec<Datapoint>, OperatorError> {
        let stream = self.resolve(path)?;
        self.time_range_of(&stream, t1, t2, limit, transform)
    }

    fn time_to_index(&self, path: &str, t: f64) -> Result<usize, OperatorError> {
        let stream = self.resolve(path)?;
        Ok(self.time_to_index_of(&stream, t))
    }
}

/// Permission-checking proxy bound to a single caller
pub struct AuthOperator {
    inner: Arc<DatabaseOperator>,
    identity: Identity,
}

impl AuthOperator {
    pub fn new(inner: Arc<DatabaseOperator>, identity: Identity) -> Self {
        Self { inner, identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Resolve `path` and check `action` against the stream's descriptor
    fn authorize(&self, path: &str, action: Action) -> Result<Arc<Stream>, OperatorError> {
        let stream = self.inner.resolve(path)?;
        if !stream.config.access.permits(&self.identity, stream.path(), action) {
            tracing::debug!("{} denied {} on {}", self.identity, action, stream.path());
            return Err(OperatorError::Forbidden(format!(
                "{} may not {} {}",
                self.identity,
                action,
                stream.path()
            )));
        }
        Ok(stream)
    }

    /// Only admins and the owning user may create or delete a stream
    fn authorize_admin(&self, path: &StreamPath) -> Result<(), OperatorError> {
        if self.identity.is_admin() || self.identity.name == path.owner {
            Ok(())
        } else {
            Err(OperatorError::Forbidden(format!(
                "{} may not manage streams of {}",
                self.identity, path.owner
            )))
        }
    }

    pub fn create_stream(&self, config: StreamConfig) -> Result<(), OperatorError> {
        self.authorize_admin(&config.path)?;
        self.inner.registry().create_stream(config)?;
        Ok(())
    }

    /// Streams the caller may read, sorted by path
    pub fn list_readable(&self) -> Vec<Arc<Stream>> {
        let registry = self.inner.registry();
        registry
            .list_streams()
            .iter()
            .filter_map(|path| registry.get_stream(path))
            .filter(|s| s.config.access.permits(&self.identity, s.path(), Action::Read))
            .collect()
    }

    pub fn delete_stream(&self, path: &str) -> Result<(), OperatorError> {
        let path = StreamPath::parse(path).map_err(StorageError::from)?;
        self.authorize_admin(&path)?;
        self.inner.registry().delete_stream(&path)?;
        Ok(())
    }
}

impl Operator for AuthOperator {
    fn length(&self, path: &str) -> Result<usize, OperatorError> {
        let stream = self.authorize(path, Action::Read)?;
        Ok(self.inner.length_of(&stream))
    }

    fn insert_stream(
        &self,
        path: &str,
        datapoints: Vec<Datapoint>,
        restamp: bool,
    ) -> Result<usize, OperatorError> {
        let stream = self.authorize(path, Action::Insert)?;
        let count = self.inner.insert_into(&stream, datapoints, restamp)?;
        tracing::debug!(
            "{} inserted {} into {}{}",
            self.identity,
            count,
            stream.path(),
            if restamp { " (restamp)" } else { "" }
        );
        Ok(count)
    }

    fn index_range(
        &self,
        path: &str,
        i1: i64,
        i2: i64,
        transform: &str,
    ) -> Result<Vec<Datapoint>, OperatorError> {
        let stream = self.authorize(path, Action::Read)?;
        self.inner.index_range_of(&stream, i1, i2, transform)
    }

    fn time_range(
        &self,
        path: &str,
        t1: f64,
        t2: f64,
        limit: i64,
        transform: &str,
    ) -> Result<Vec<Datapoint>, OperatorError> {
        let stream = self.authorize(path, Action::Read)?;
        self.inner.time_range_of(&stream, t1, t2, limit, transform)
    }

    fn time_to_index(&self, path: &str, t: f64) -> Result<usize, OperatorError> {
        let stream = self.authorize(path, Action::Read)?;
        Ok(self.inner.time_to_index_of(&stream, t))
    }
}

/// Classified failure of an operation
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for OperatorError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::StreamExists(_) => OperatorError::Conflict(e.to_string()),
            StorageError::StreamNotFound(_) => OperatorError::NotFound(e.to_string()),
            StorageError::InvalidPath(_) => OperatorError::BadRequest(e.to_string()),
            StorageError::Persistence(_) => OperatorError::Internal(e.to_string()),
        }
    }
}

impl From<StreamError> for OperatorError {
    fn from(e: StreamError) -> Self {
        match e {
            // Time-order violations surface as permission failures
            StreamError::OutOfOrder { .. } => OperatorError::Forbidden(e.to_string()),
            StreamError::SchemaMismatch { .. } | StreamError::InvalidTimestamp(_) => {
                OperatorError::BadRequest(e.to_string())
            }
            StreamError::Persistence(_) => OperatorError::Internal(e.to_string()),
        }
    }
}

impl From<TransformError> for OperatorError {
    fn from(e: TransformError) -> Self {
        OperatorError::BadRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessDescriptor, Grant};
    use crate::data::{DataType, Value};
    use crate::storage::persistence::{PersistenceBackend, PersistenceError};

    const STEPS: &str = "alice/phone/steps";

    fn setup() -> Arc<DatabaseOperator> {
        let registry = Arc::new(StreamRegistry::new());
        registry
            .create_stream(StreamConfig::new(StreamPath::parse(STEPS).unwrap()))
            .unwrap();
        Arc::new(DatabaseOperator::new(registry, Arc::new(TransformCache::new())))
    }

    fn as_alice(db: &Arc<DatabaseOperator>) -> AuthOperator {
        AuthOperator::new(Arc::clone(db), Identity::user("alice"))
    }

    fn scenario_a(op: &AuthOperator) {
        let inserted = op
            .insert_stream(
                STEPS,
                vec![Datapoint::new(1.0, 1i64), Datapoint::new(2.0, 2i64)],
                false,
            )
            .unwrap();
        assert_eq!(inserted, 2);
    }

    #[test]
    fn test_scenario_a_insert_and_read() {
        let db = setup();
        let op = as_alice(&db);
        scenario_a(&op);

        assert_eq!(op.length(STEPS).unwrap(), 2);
        assert_eq!(
            op.index_range(STEPS, 0, 2, "").unwrap(),
            vec![Datapoint::new(1.0, 1i64), Datapoint::new(2.0, 2i64)]
        );
    }

    #[test]
    fn test_scenario_b_out_of_order_forbidden() {
        let db = setup();
        let op = as_alice(&db);
        scenario_a(&op);

        let err = op
            .insert_stream(STEPS, vec![Datapoint::new(0.0, 3i64)], false)
            .unwrap_err();
        assert!(matches!(err, OperatorError::Forbidden(_)));
        assert_eq!(op.length(STEPS).unwrap(), 2);
    }

    #[test]
    fn test_scenario_c_restamp() {
        let db = setup();
        let op = as_alice(&db);
        scenario_a(&op);

        assert_eq!(
            op.insert_stream(STEPS, vec![Datapoint::new(0.0, 3i64)], true)
                .unwrap(),
            1
        );
        assert_eq!(op.length(STEPS).unwrap(), 3);

        let stored = op.index_range(STEPS, 0, 3, "").unwrap();
        assert!(stored.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(stored[2].value, Value::Int64(3));
    }

    #[test]
    fn test_scenario_d_time_to_index() {
        let db = setup();
        let op = as_alice(&db);
        scenario_a(&op);

        assert_eq!(op.time_to_index(STEPS, 1.5).unwrap(), 1);
    }

    #[test]
    fn test_scenario_e_time_range_excludes_end() {
        let db = setup();
        let op = as_alice(&db);
        scenario_a(&op);

        assert_eq!(
            op.time_range(STEPS, 0.0, 2.0, 0, "").unwrap(),
            vec![Datapoint::new(1.0, 1i64)]
        );
    }

    #[test]
    fn test_scenario_f_unauthorized_caller() {
        let db = setup();
        scenario_a(&as_alice(&db));

        let mallory = AuthOperator::new(Arc::clone(&db), Identity::user("mallory"));

        assert!(matches!(mallory.length(STEPS), Err(OperatorError::Forbidden(_))));
        assert!(matches!(
            mallory.insert_stream(STEPS, vec![Datapoint::new(9.0, 9i64)], false),
            Err(OperatorError::Forbidden(_))
        ));
        assert!(matches!(
            mallory.insert_stream(STEPS, vec![Datapoint::new(9.0, 9i64)], true),
            Err(OperatorError::Forbidden(_))
        ));
        assert!(matches!(
            mallory.index_range(STEPS, 0, 2, ""),
            Err(OperatorError::Forbidden(_))
        ));
        assert!(matches!(
            mallory.time_range(STEPS, 0.0, 10.0, 0, "count"),
            Err(OperatorError::Forbidden(_))
        ));
        assert!(matches!(
            mallory.time_to_index(STEPS, 1.0),
            Err(OperatorError::Forbidden(_))
        ));

        assert_eq!(db.length(STEPS).unwrap(), 2);
    }

    #[test]
    fn test_missing_stream_not_found() {
        let db = setup();
        let op = as_alice(&db);

        assert!(matches!(
            op.length("alice/phone/nothing"),
            Err(OperatorError::NotFound(_))
        ));
        assert!(matches!(op.length("not-a-path"), Err(OperatorError::BadRequest(_))));
    }

    #[test]
    fn test_read_only_grant() {
        let registry = Arc::new(StreamRegistry::new());
        let path = StreamPath::parse("alice/phone/location").unwrap();
        registry
            .create_stream(
                StreamConfig::new(path).with_access(AccessDescriptor::new(Grant::Public, Grant::Device)),
            )
            .unwrap();
        let db = Arc::new(DatabaseOperator::new(registry, Arc::new(TransformCache::new())));

        let bob = AuthOperator::new(Arc::clone(&db), Identity::user("bob"));
        assert_eq!(bob.length("alice/phone/location").unwrap(), 0);
        assert!(matches!(
            bob.insert_stream("alice/phone/location", vec![Datapoint::new(1.0, 1i64)], false),
            Err(OperatorError::Forbidden(_))
        ));

        let alice_laptop = AuthOperator::new(
            Arc::clone(&db),
            Identity::user("alice").with_device("laptop"),
        );
        assert!(matches!(
            alice_laptop.insert_stream("alice/phone/location", vec![Datapoint::new(1.0, 1i64)], false),
            Err(OperatorError::Forbidden(_))
        ));

        let alice_phone = AuthOperator::new(db, Identity::user("alice").with_device("phone"));
        assert_eq!(
            alice_phone
                .insert_stream("alice/phone/location", vec![Datapoint::new(1.0, 1i64)], false)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_transform_applied_and_validated() {
        let db = setup();
        let op = as_alice(&db);
        op.insert_stream(
            STEPS,
            (1..=5).map(|i| Datapoint::new(i as f64, i as i64)).collect(),
            false,
        )
        .unwrap();

        assert_eq!(
            op.index_range(STEPS, 0, 5, "if > 2 | sum").unwrap(),
            vec![Datapoint::new(5.0, 12i64)]
        );
        assert_eq!(
            op.time_range(STEPS, 2.0, 10.0, 2, "scale 2").unwrap(),
            vec![Datapoint::new(2.0, 4i64), Datapoint::new(3.0, 6i64)]
        );
        assert!(matches!(
            op.index_range(STEPS, 0, 5, "explode"),
            Err(OperatorError::BadRequest(_))
        ));
    }

    #[test]
    fn test_schema_mismatch_is_bad_request() {
        let registry = Arc::new(StreamRegistry::new());
        registry
            .create_stream(
                StreamConfig::new(StreamPath::parse("alice/phone/temp").unwrap())
                    .with_schema(DataType::Number),
            )
            .unwrap();
        let db = Arc::new(DatabaseOperator::new(registry, Arc::new(TransformCache::new())));

        let err = as_alice(&db)
            .insert_stream("alice/phone/temp", vec![Datapoint::new(1.0, "warm")], false)
            .unwrap_err();
        assert!(matches!(err, OperatorError::BadRequest(_)));
    }

    struct BrokenBackend;

    impl PersistenceBackend for BrokenBackend {
        fn append(&self, _key: &str, _data: &[u8]) -> Result<(), PersistenceError> {
            Err(PersistenceError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
        fn write(&self, _key: &str, _data: &[u8]) -> Result<(), PersistenceError> {
            Ok(())
        }
        fn read(&self, _key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
            Ok(None)
        }
        fn truncate(&self, _key: &str, _len: u64) -> Result<(), PersistenceError> {
            Ok(())
        }
        fn delete(&self, _key: &str) -> Result<(), PersistenceError> {
            Ok(())
        }
        fn list_keys(&self) -> Result<Vec<String>, PersistenceError> {
            Ok(Vec::new())
        }
        fn sync(&self) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    #[test]
    fn test_storage_failure_is_internal() {
        let registry = Arc::new(StreamRegistry::open(Arc::new(BrokenBackend)).unwrap());
        registry
            .create_stream(StreamConfig::new(StreamPath::parse(STEPS).unwrap()))
            .unwrap();
        let db = Arc::new(DatabaseOperator::new(registry, Arc::new(TransformCache::new())));
        let op = as_alice(&db);

        let err = op
            .insert_stream(STEPS, vec![Datapoint::new(1.0, 1i64)], false)
            .unwrap_err();
        assert!(matches!(err, OperatorError::Internal(_)));
        assert_eq!(op.length(STEPS).unwrap(), 0);
    }

    #[test]
    fn test_stream_management() {
        let db = setup();
        let alice = as_alice(&db);
        let bob = AuthOperator::new(Arc::clone(&db), Identity::user("bob"));

        let config = StreamConfig::new(StreamPath::parse("alice/phone/heart").unwrap());
        assert!(matches!(
            bob.create_stream(config.clone()),
            Err(OperatorError::Forbidden(_))
        ));
        alice.create_stream(config.clone()).unwrap();
        assert!(matches!(
            alice.create_stream(config),
            Err(OperatorError::Conflict(_))
        ));

        assert!(matches!(
            bob.delete_stream("alice/phone/heart"),
            Err(OperatorError::Forbidden(_))
        ));
        assert_eq!(alice.list_readable().len(), 2);
        assert!(bob.list_readable().is_empty());

        alice.delete_stream("alice/phone/heart").unwrap();
        assert!(matches!(
            alice.length("alice/phone/heart"),
            Err(OperatorError::NotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_authorized_inserts() {
        let db = setup();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let op = as_alice(&db);
                scope.spawn(move || {
                    for i in 0..100 {
                        op.insert_stream(STEPS, vec![Datapoint::new(i as f64, i as i64)], true)
                            .unwrap();
                    }
                });
            }
        });

        let op = as_alice(&db);
        assert_eq!(op.length(STEPS).unwrap(), 400);
        assert_eq!(op.index_range(STEPS, 0, 400, "").unwrap().len(), 400);
    }
}
