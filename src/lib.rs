//! Brook: Authorized Time-Series Stream Store
//!
//! Every stream is an append-only sequence of timestamped datapoints,
//! addressed as `owner/device/stream`. All access goes through an
//! authorization operator bound to a caller identity, which checks the
//! stream's access descriptor before touching the data.
//!
//! # Features
//!
//! - **Ordered Appends**: Batches are validated as a whole; out-of-order
//!   timestamps are rejected or restamped on request
//! - **Range Queries**: Index ranges, time ranges with limits, and
//!   time-to-index lookups by binary search
//! - **Transforms**: Lazy pipelines such as `if $ > 5 | sum` applied to
//!   query results
//! - **Access Control**: Per-stream read and insert grants for owners,
//!   devices, named users or the public
//! - **Durability**: Append-only JSON-lines logs recovered on startup
//!
//! # Example
//!
//! ```no_run
//! use brook::auth::{Identity, Operator};
//! use brook::data::{Datapoint, StreamPath};
//! use brook::storage::StreamConfig;
//! use brook::Database;
//!
//! let db = Database::in_memory(1000);
//! db.registry()
//!     .create_stream(StreamConfig::new(StreamPath::parse("alice/phone/steps").unwrap()))
//!     .unwrap();
//!
//! let op = db.operator_for(Identity::user("alice"));
//! op.insert_stream("alice/phone/steps", vec![Datapoint::new(1.0, 120i64)], false)
//!     .unwrap();
//! let total = op.index_range("alice/phone/steps", 0, 10, "sum").unwrap();
//! println!("Results: {:?}", total);
//! ```

pub mod api;
pub mod auth;
pub mod data;
pub mod database;
pub mod plugins;
pub mod query;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use auth::{AuthOperator, Identity, Operator, OperatorError};
pub use data::{DataType, Datapoint, StreamPath, Value};
pub use database::Database;
pub use storage::{StorageError, StreamConfig};
