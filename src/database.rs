use crate::auth::{AuthOperator, DatabaseOperator, Identity, UserRegistry};
use crate::query::TransformCache;
use crate::storage::{
    FileBackend, PersistenceBackend, PersistenceConfig, StorageError, StreamRegistry,
};
use std::sync::Arc;

/// Everything a running instance shares: streams, users, and the unchecked
/// operator that authorized operators wrap.
pub struct Database {
    registry: Arc<StreamRegistry>,
    users: Arc<UserRegistry>,
    operator: Arc<DatabaseOperator>,
}

impl Database {
    /// Purely in-memory database
    pub fn in_memory(transform_cache_size: u64) -> Self {
        Self::assemble(
            Arc::new(StreamRegistry::new()),
            Arc::new(UserRegistry::new()),
            transform_cache_size,
        )
    }

    /// Open (or create) a database stored under `config.data_dir`
    pub fn open(config: PersistenceConfig, transform_cache_size: u64) -> Result<Self, StorageError> {
        let backend: Arc<dyn PersistenceBackend> = Arc::new(FileBackend::new(config)?);
        let registry = StreamRegistry::open(Arc::clone(&backend))?;
        let users = UserRegistry::open(backend)?;

        tracing::info!(
            "Opened database: {} streams, {} datapoints, {} users",
            registry.stream_count(),
            registry.total_datapoints(),
            users.list().len()
        );

        Ok(Self::assemble(Arc::new(registry), Arc::new(users), transform_cache_size))
    }

    fn assemble(
        registry: Arc<StreamRegistry>,
        users: Arc<UserRegistry>,
        transform_cache_size: u64,
    ) -> Self {
        let transforms = Arc::new(TransformCache::with_capacity(transform_cache_size));
        let operator = Arc::new(DatabaseOperator::new(Arc::clone(&registry), transforms));
        Self {
            registry,
            users,
            operator,
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn users(&self) -> &Arc<UserRegistry> {
        &self.users
    }

    /// Unchecked operator, for administrative tooling
    pub fn operator(&self) -> &Arc<DatabaseOperator> {
        &self.operator
    }

    /// Operator bound to `identity`
    pub fn operator_for(&self, identity: Identity) -> AuthOperator {
        AuthOperator::new(Arc::clone(&self.operator), identity)
    }

    /// Operator for the identity registered under an API key
    pub fn authenticate(&self, key: &str) -> Option<AuthOperator> {
        self.users.authenticate(key).map(|identity| self.operator_for(identity))
    }
}
