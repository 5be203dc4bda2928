//! Plain-file backend: one file per key under the data directory

use super::{PersistenceBackend, PersistenceConfig, PersistenceError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

type Handle = Arc<Mutex<File>>;

pub struct FileBackend {
    config: PersistenceConfig,
    /// Open append handles, one lock per file so appends to different keys
    /// never wait on each other
    handles: DashMap<String, Handle>,
}

impl FileBackend {
    pub fn new(config: PersistenceConfig) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            handles: DashMap::new(),
        })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.config.data_dir.join(key)
    }

    /// The cached append handle for `key`, opening the file on first use
    fn handle(&self, key: &str) -> Result<Handle, PersistenceError> {
        if let Some(handle) = self.handles.get(key) {
            return Ok(Arc::clone(handle.value()));
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.key_path(key))?;
        let handle = self
            .handles
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(file)));
        Ok(Arc::clone(handle.value()))
    }
}

/// An append target that can be cut back to an earlier length
trait LogFile: Write {
    fn byte_len(&self) -> std::io::Result<u64>;
    fn cut(&mut self, len: u64) -> std::io::Result<()>;
    fn flush_data(&self) -> std::io::Result<()>;
}

impl LogFile for File {
    fn byte_len(&self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn cut(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }

    fn flush_data(&self) -> std::io::Result<()> {
        self.sync_data()
    }
}

/// Write all of `data` or nothing: on failure the file is cut back to the
/// length it had before the write.
fn append_or_rollback<F: LogFile>(file: &mut F, data: &[u8], sync: bool) -> std::io::Result<()> {
    let start = file.byte_len()?;

    let result = file.write_all(data).and_then(|()| {
        if sync {
            file.flush_data()
        } else {
            Ok(())
        }
    });

    if let Err(e) = result {
        if let Err(cut) = file.cut(start) {
            tracing::error!("Failed to roll back partial append to {} bytes: {}", start, cut);
        }
        return Err(e);
    }
    Ok(())
}

impl PersistenceBackend for FileBackend {
    fn append(&self, key: &str, data: &[u8]) -> Result<(), PersistenceError> {
        let handle = self.handle(key)?;
        let mut file = handle.lock();

        if let Err(e) = append_or_rollback(&mut *file, data, self.config.sync_on_append) {
            drop(file);
            // Reopen on the next append rather than reuse a handle in an unknown state
            self.handles.remove_if(key, |_, cached| Arc::ptr_eq(cached, &handle));
            return Err(e.into());
        }

        Ok(())
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<(), PersistenceError> {
        let path = self.key_path(key);
        let tmp = self.key_path(&format!("{}.tmp", key));

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        std::fs::rename(tmp, path)?;

        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let path = self.key_path(key);

        if !path.exists() {
            return Ok(None);
        }

        let data = std::fs::read(path)?;
        Ok(Some(data))
    }

    fn truncate(&self, key: &str, len: u64) -> Result<(), PersistenceError> {
        match self.handles.get(key).map(|h| Arc::clone(h.value())) {
            Some(handle) => handle.lock().set_len(len)?,
            None => OpenOptions::new()
                .write(true)
                .open(self.key_path(key))?
                .set_len(len)?,
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        let path = self.key_path(key);

        self.handles.remove(key);

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, PersistenceError> {
        let mut keys = Vec::new();

        for entry in std::fs::read_dir(&self.config.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(".tmp") {
                    keys.push(name.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn sync(&self) -> Result<(), PersistenceError> {
        // Collect first so no map shard is locked during fsync
        let handles: Vec<Handle> = self.handles.iter().map(|h| Arc::clone(h.value())).collect();

        for handle in handles {
            handle.lock().sync_data()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn backend(dir: &TempDir) -> FileBackend {
        FileBackend::new(PersistenceConfig::new(dir.path())).unwrap()
    }

    /// Accepts `capacity` bytes in total, then fails every write
    struct ShortFile {
        data: Vec<u8>,
        capacity: usize,
        fail_sync: bool,
    }

    impl Write for ShortFile {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let room = self.capacity.saturating_sub(self.data.len());
            if room == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left"));
            }
            let n = room.min(buf.len());
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogFile for ShortFile {
        fn byte_len(&self) -> std::io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn cut(&mut self, len: u64) -> std::io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }

        fn flush_data(&self) -> std::io::Result<()> {
            if self.fail_sync {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "fsync failed"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_append_accumulates() {
        let temp_dir = TempDir::new().unwrap();
        let backend = backend(&temp_dir);

        backend.append("log", b"one\n").unwrap();
        backend.append("log", b"two\n").unwrap();
        backend.sync().unwrap();

        let data = backend.read("log").unwrap().unwrap();
        assert_eq!(data.as_slice(), b"one\ntwo\n");
    }

    #[test]
    fn test_partial_append_is_rolled_back() {
        let mut file = ShortFile {
            data: b"ok\n".to_vec(),
            capacity: 8,
            fail_sync: false,
        };

        assert!(append_or_rollback(&mut file, b"{\"t\":1.0,\"d\":1}\n", false).is_err());
        assert_eq!(file.data, b"ok\n");

        file.capacity = 64;
        append_or_rollback(&mut file, b"next\n", false).unwrap();
        assert_eq!(file.data, b"ok\nnext\n");
    }

    #[test]
    fn test_failed_sync_is_rolled_back() {
        let mut file = ShortFile {
            data: b"ok\n".to_vec(),
            capacity: 64,
            fail_sync: true,
        };

        assert!(append_or_rollback(&mut file, b"line\n", true).is_err());
        assert_eq!(file.data, b"ok\n");
        append_or_rollback(&mut file, b"line\n", false).unwrap();
        assert_eq!(file.data, b"ok\nline\n");
    }

    #[test]
    fn test_truncate() {
        let temp_dir = TempDir::new().unwrap();
        let backend = backend(&temp_dir);

        backend.append("log", b"one\ntw").unwrap();
        backend.truncate("log", 4).unwrap();
        backend.append("log", b"three\n").unwrap();
        assert_eq!(backend.read("log").unwrap().unwrap(), b"one\nthree\n");

        std::fs::write(temp_dir.path().join("cold"), b"abc").unwrap();
        backend.truncate("cold", 1).unwrap();
        assert_eq!(backend.read("cold").unwrap().unwrap(), b"a");
    }

    #[test]
    fn test_appends_to_different_keys_do_not_wait() {
        let temp_dir = TempDir::new().unwrap();
        let backend = backend(&temp_dir);
        backend.append("alice.phone.steps.log", b"1\n").unwrap();

        let busy = backend.handle("alice.phone.steps.log").unwrap();
        let guard = busy.lock();

        let start = Instant::now();
        backend.append("bob.laptop.cpu.log", b"2\n").unwrap();
        assert!(start.elapsed() < Duration::from_millis(250));

        drop(guard);
        backend.append("alice.phone.steps.log", b"3\n").unwrap();
        assert_eq!(backend.read("alice.phone.steps.log").unwrap().unwrap(), b"1\n3\n");
    }

    #[test]
    fn test_write_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let backend = backend(&temp_dir);

        backend.write("meta", b"first").unwrap();
        backend.write("meta", b"second").unwrap();

        let data = backend.read("meta").unwrap().unwrap();
        assert_eq!(data.as_slice(), b"second");
    }

    #[test]
    fn test_list_keys() {
        let temp_dir = TempDir::new().unwrap();
        let backend = backend(&temp_dir);

        backend.write("key1", b"data1").unwrap();
        backend.append("key2", b"data2").unwrap();

        let keys = backend.list_keys().unwrap();
        assert_eq!(keys, vec!["key1".to_string(), "key2".to_string()]);
    }

    #[test]
    fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let backend = backend(&temp_dir);

        backend.append("to_delete", b"data").unwrap();
        assert!(backend.read("to_delete").unwrap().is_some());

        backend.delete("to_delete").unwrap();
        assert!(backend.read("to_delete").unwrap().is_none());
        assert!(backend.read("missing").unwrap().is_none());
    }
}
