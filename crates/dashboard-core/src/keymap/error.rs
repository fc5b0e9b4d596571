//! Key map errors

use thiserror::Error;

/// Errors that can occur while loading or clearing the key map
#[derive(Error, Debug)]
pub enum KeyMapError {
    #[error("JSON map is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON map root must be an array")]
    NotAnArray,

    #[error("JSON map must contain exactly 2 objects, found {0}")]
    WrongArity(usize),

    #[error("JSON map element {0} is not an object")]
    NotAnObject(usize),

    #[error("Invalid ID for '{key}': {value}")]
    InvalidId { key: String, value: String },

    #[error("No JSON map has been loaded")]
    NotLoaded,

    #[error("Key map storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Failed to delete stored JSON map")]
    DeleteFailed,
}
