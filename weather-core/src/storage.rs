//! Durable string storage behind the cache.
//!
//! Backends store strings under keys and report failures. Encoding, and
//! swallowing those failures, happen in [`crate::cache`].

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt::Debug,
    fs,
    io::ErrorKind,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::error::StorageError;

pub trait KeyValueStorage: Send + Sync + Debug {
    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_string(&self, key: &str) -> Result<(), StorageError>;
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStorage for FileStorage {
    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;

        // replace atomically
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_string(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process storage. Can be switched off to behave like a disabled backend.
#[derive(Debug)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
    available: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// A backend whose every operation fails.
    pub fn unavailable() -> Self {
        let storage = Self::new();
        storage.set_available(false);
        storage
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory storage disabled".to_string()))
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.values.lock().get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_string(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.values.lock().remove(key);
        Ok(())
    }
}
