//! Durable client-side storage for the refresh token.
//!
//! The access token never goes through here.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Well-known key of the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage file is corrupted: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

/// Port for the durable refresh token copy.
pub trait TokenStorage: Send + Sync {
    fn load(&self) -> Result<Option<String>, StorageError>;
    fn save(&self, refresh_token: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// JSON key/value file surviving restarts.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    // serializes read-modify-write cycles of this process.
    lock: Mutex<()>,
}

impl FileStorage {
    /// Create a new [`FileStorage`] backed by `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<HashMap<String, String>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // write then rename, so a crash never leaves half a file.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TokenStorage for FileStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(self.read()?.remove(REFRESH_TOKEN_KEY))
    }

    fn save(&self, refresh_token: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut entries = self.read()?;
        entries.insert(REFRESH_TOKEN_KEY.to_owned(), refresh_token.to_owned());
        self.write(&entries)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut entries = self.read()?;
        if entries.remove(REFRESH_TOKEN_KEY).is_some() {
            self.write(&entries)?;
        }
        Ok(())
    }
}

/// Storage kept in memory, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    refresh_token: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage already holding `refresh_token`.
    pub fn with_token(refresh_token: impl Into<String>) -> Self {
        Self {
            refresh_token: Mutex::new(Some(refresh_token.into())),
        }
    }
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .refresh_token
            .lock()
            .map_err(|_| StorageError::Poisoned)?
            .clone())
    }

    fn save(&self, refresh_token: &str) -> Result<(), StorageError> {
        *self.refresh_token.lock().map_err(|_| StorageError::Poisoned)? =
            Some(refresh_token.to_owned());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.refresh_token.lock().map_err(|_| StorageError::Poisoned)? = None;
        Ok(())
    }
}
