//! Process lifecycle helpers for the server binary

pub mod lockfile;
pub mod sync;

pub use lockfile::{LockError, PidLock};
pub use sync::{run_sync, SyncWorker};
