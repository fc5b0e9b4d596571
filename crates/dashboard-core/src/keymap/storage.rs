//! Durable storage for the key map JSON

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// File name used for the persisted key map
pub const KEY_MAP_FILE_NAME: &str = "ECU_JSON_MAP.json";

/// Where the last successfully loaded key map JSON is kept
pub trait MapStorage: Send + Sync {
    /// Persist the raw JSON, replacing anything stored before
    fn save(&self, text: &str) -> io::Result<()>;

    /// Read back the stored JSON, `None` if nothing is stored
    fn load(&self) -> io::Result<Option<String>>;

    /// Remove the stored JSON. Returns true if nothing is stored afterwards.
    fn delete(&self) -> io::Result<bool>;
}

/// Key map stored as a plain file
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Store at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the platform data directory (`<data>/dashboard/ECU_JSON_MAP.json`)
    pub fn default_location() -> Option<Self> {
        dirs::data_dir().map(|dir| Self::new(dir.join("dashboard").join(KEY_MAP_FILE_NAME)))
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MapStorage for FileStorage {
    fn save(&self, text: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, text)
    }

    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn delete(&self) -> io::Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        }
    }
}

/// In-memory storage, used by tests and by front ends without a filesystem
#[derive(Debug, Default)]
pub struct MemoryStorage {
    text: Mutex<Option<String>>,
}

impl MemoryStorage {
    /// Empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that already holds `text`
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(Some(text.into())),
        }
    }

    /// Currently stored text
    pub fn stored(&self) -> Option<String> {
        self.text.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl MapStorage for MemoryStorage {
    fn save(&self, text: &str) -> io::Result<()> {
        *self.text.lock().unwrap_or_else(PoisonError::into_inner) = Some(text.to_string());
        Ok(())
    }

    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.stored())
    }

    fn delete(&self) -> io::Result<bool> {
        self.text.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(true)
    }
}
