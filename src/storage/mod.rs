pub mod persistence;
pub mod registry;
pub mod stream;

pub use persistence::{FileBackend, PersistenceBackend, PersistenceConfig, PersistenceError};
pub use registry::{StorageError, StreamRegistry};
pub use stream::{Stream, StreamConfig, StreamError};
