//! ECU Key Map
//!
//! Bidirectional lookup between the small integer IDs the ECU puts on the wire
//! and the tag / message strings they stand for. The map is generated by the
//! ECU firmware build and handed to the dashboard as a JSON document:
//!
//! ```text
//! [ { "<tag>": <id>, ... }, { "<message>": <id>, ... } ]
//! ```
//!
//! Loads replace both tables at once. Readers on other threads either see the
//! old tables or the new ones, never a mix.

mod error;
mod storage;
mod tables;

pub use error::KeyMapError;
pub use storage::{FileStorage, MapStorage, MemoryStorage, KEY_MAP_FILE_NAME};
pub use tables::{combined_key, KeyTables};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use crate::observer::{ObserverList, SubscriptionId};

/// Status reported to key map listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapStatus {
    /// Whether a map is loaded after the operation
    pub loaded: bool,
    /// JSON involved in the operation, `None` for clears and empty storage
    pub raw: Option<String>,
    /// Generation after the operation; unchanged when nothing was swapped
    pub generation: u64,
}

/// Result of a successful load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// First map loaded
    Loaded,
    /// Replaced a previously loaded map
    Updated,
    /// Nothing new to load, the current map stays
    Unchanged,
}

/// The live key map
pub struct KeyMap {
    tables: RwLock<Option<Arc<KeyTables>>>,
    storage: Option<Box<dyn MapStorage>>,
    pseudo: bool,
    generation: AtomicU64,
    listeners: ObserverList<KeyMapStatus>,
}

impl KeyMap {
    /// Key map persisted to `storage`
    pub fn new(storage: impl MapStorage + 'static) -> Self {
        Self {
            tables: RwLock::new(None),
            storage: Some(Box::new(storage)),
            pseudo: false,
            generation: AtomicU64::new(0),
            listeners: ObserverList::new(),
        }
    }

    /// Key map that is never persisted
    pub fn unpersisted() -> Self {
        Self {
            tables: RwLock::new(None),
            storage: None,
            pseudo: false,
            generation: AtomicU64::new(0),
            listeners: ObserverList::new(),
        }
    }

    /// Transient map built from JSON embedded in a log file.
    ///
    /// Never persisted. If `raw` does not parse the map is simply not loaded.
    pub fn pseudo(raw: &str) -> Self {
        let map = Self {
            tables: RwLock::new(None),
            storage: None,
            pseudo: true,
            generation: AtomicU64::new(0),
            listeners: ObserverList::new(),
        };
        if let Err(e) = map.load(raw) {
            warn!(error = %e, "embedded key map could not be parsed");
        }
        map
    }

    /// Whether this is a pseudo (log decoding) map
    pub fn is_pseudo(&self) -> bool {
        self.pseudo
    }

    /// Whether both tables are loaded
    pub fn is_loaded(&self) -> bool {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Bumped on every table swap and every clear
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// The current tables, if loaded
    pub fn snapshot(&self) -> Option<Arc<KeyTables>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The raw JSON of the current map
    pub fn raw_json(&self) -> Option<String> {
        self.snapshot().map(|t| t.raw().to_string())
    }

    /// Parse and install a new map.
    ///
    /// On error the current tables are left exactly as they were and listeners
    /// are told the previous status (still loaded means "unchanged").
    pub fn load(&self, raw: &str) -> Result<LoadOutcome, KeyMapError> {
        let tables = match KeyTables::parse(raw) {
            Ok(tables) => tables,
            Err(e) => {
                warn!(error = %e, "JSON does not match correct format");
                self.notify(self.is_loaded(), Some(raw.to_string()));
                return Err(e);
            }
        };

        if !self.pseudo {
            if let Some(storage) = &self.storage {
                if let Err(e) = storage.save(raw) {
                    warn!(error = %e, "failed to persist JSON map");
                }
            }
        }

        let outcome = {
            let mut guard = self.tables.write().unwrap_or_else(PoisonError::into_inner);
            let outcome = if guard.is_some() {
                LoadOutcome::Updated
            } else {
                LoadOutcome::Loaded
            };
            *guard = Some(Arc::new(tables));
            self.generation.fetch_add(1, Ordering::AcqRel);
            outcome
        };

        if !self.pseudo {
            match outcome {
                LoadOutcome::Updated => info!("JSON map updated"),
                _ => info!("loaded JSON map"),
            }
        }
        self.notify(true, Some(raw.to_string()));
        Ok(outcome)
    }

    /// Reload the persisted JSON
    pub fn load_from_storage(&self) -> Result<LoadOutcome, KeyMapError> {
        let stored = match &self.storage {
            Some(storage) => storage.load()?,
            None => None,
        };

        match stored {
            Some(raw) => self.load(&raw),
            None if self.is_loaded() => {
                info!("JSON map unchanged");
                self.notify(true, None);
                Ok(LoadOutcome::Unchanged)
            }
            None => {
                warn!("no JSON map has been loaded");
                self.notify(false, None);
                Err(KeyMapError::NotLoaded)
            }
        }
    }

    /// Delete the persisted JSON and unload both tables.
    ///
    /// If the stored copy cannot be deleted the tables stay loaded.
    pub fn clear(&self) -> Result<(), KeyMapError> {
        let deleted = match (&self.storage, self.pseudo) {
            (Some(storage), false) => storage.delete(),
            _ => Ok(true),
        };

        match deleted {
            Ok(true) => {
                *self.tables.write().unwrap_or_else(PoisonError::into_inner) = None;
                self.generation.fetch_add(1, Ordering::AcqRel);
                info!("JSON map deleted");
                self.notify(false, None);
                Ok(())
            }
            Ok(false) => {
                warn!("failed to delete JSON map");
                self.notify(self.is_loaded(), None);
                Err(KeyMapError::DeleteFailed)
            }
            Err(e) => {
                warn!(error = %e, "failed to delete JSON map");
                self.notify(self.is_loaded(), None);
                Err(KeyMapError::Storage(e))
            }
        }
    }

    /// ID of a tag string
    pub fn tag_id(&self, tag: &str) -> Option<u16> {
        self.snapshot()?.tag_id(tag)
    }

    /// ID of a message string
    pub fn string_id(&self, message: &str) -> Option<u16> {
        self.snapshot()?.string_id(message)
    }

    /// Tag string for an ID
    pub fn tag(&self, id: u16) -> Option<String> {
        self.snapshot()?.tag(id).map(str::to_string)
    }

    /// Message string for an ID
    pub fn string(&self, id: u16) -> Option<String> {
        self.snapshot()?.string(id).map(str::to_string)
    }

    /// Combined key of the message the ECU sends as `(tag, message)`
    pub fn request_msg_id(&self, tag: &str, message: &str) -> Option<u32> {
        let Some(tables) = self.snapshot() else {
            warn!("JSON map has not been loaded, unable to process request");
            return None;
        };
        let key = tables.message_key(tag, message);
        if key.is_none() {
            warn!(tag = %tag, text = %message, "unable to match string");
        }
        key
    }

    /// Register a status listener
    pub fn add_status_listener<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&KeyMapStatus) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Remove a status listener
    pub fn remove_status_listener(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn notify(&self, loaded: bool, raw: Option<String>) {
        self.listeners.notify(&KeyMapStatus {
            loaded,
            raw,
            generation: self.generation(),
        });
    }
}

impl std::fmt::Debug for KeyMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMap")
            .field("loaded", &self.is_loaded())
            .field("pseudo", &self.pseudo)
            .field("generation", &self.generation())
            .finish()
    }
}
