//! Durable key/value storage for client-side state (session id, conversation history).
//!
//! `FileStore` keeps one file per key under a directory, so two sessions never rewrite each
//! other's data. Keys are URL-encoded into file names (`messages:abc` -> `messages%3Aabc`).
//! Writes go to a temp file and are renamed into place while holding an exclusive lock on
//! `.lock`, so concurrent CLI processes sharing a directory never observe half-written values.

use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// String key/value store with the semantics of browser local storage.
pub trait KeyValueStore: Send + Sync {
    /// Value for `key`, or `None` when it was never set or has been removed.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Directory-backed store: one file per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(urlencoding::encode(key).as_ref())
    }

    /// Exclusive advisory lock on `<dir>/.lock`, released when the returned file is dropped.
    fn lock(&self) -> Result<File, StorageError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let path = self.dir.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        FileExt::lock_exclusive(&file).map_err(|e| io_err(&path, e))?;
        Ok(file)
    }
}

fn io_err(path: &Path, source: io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _lock = self.lock()?;
        let path = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{}.tmp-{}", urlencoding::encode(key), uuid::Uuid::new_v4()));
        fs::write(&tmp, value).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _lock = self.lock()?;
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }
}

/// In-memory store (tests, ephemeral sessions).
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let g = self
            .inner
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".to_string()))?;
        Ok(g.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".to_string()))?;
        g.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".to_string()))?;
        g.remove(key);
        Ok(())
    }
}
