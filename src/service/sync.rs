use crate::storage::StreamRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Background worker that periodically flushes stream logs to stable storage
pub struct SyncWorker {
    registry: Arc<StreamRegistry>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl SyncWorker {
    pub fn new(registry: Arc<StreamRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Sync worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;
                run_sync(&self.registry);
            }

            tracing::info!("Sync worker stopped");
        })
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Sync once, logging failures. Returns whether the sync succeeded.
pub fn run_sync(registry: &StreamRegistry) -> bool {
    match registry.sync() {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Sync failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Datapoint, StreamPath};
    use crate::storage::{FileBackend, PersistenceConfig, StreamConfig};
    use tempfile::TempDir;

    #[test]
    fn test_run_sync() {
        let temp_dir = TempDir::new().unwrap();
        let backend = Arc::new(FileBackend::new(PersistenceConfig::new(temp_dir.path())).unwrap());
        let registry = StreamRegistry::open(backend).unwrap();

        let stream = registry
            .create_stream(StreamConfig::new(StreamPath::parse("a/b/c").unwrap()))
            .unwrap();
        stream.insert(vec![Datapoint::new(1.0, 1i64)], false).unwrap();

        assert!(run_sync(&registry));
        assert!(run_sync(&StreamRegistry::new()));
    }

    #[tokio::test]
    async fn test_worker_start_stop() {
        let worker = Arc::new(SyncWorker::new(
            Arc::new(StreamRegistry::new()),
            Duration::from_millis(10),
        ));
        assert!(!worker.is_running());

        let handle = Arc::clone(&worker).start();
        assert!(worker.is_running());

        worker.stop();
        assert!(!worker.is_running());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
