//! Data Logging
//!
//! Persists raw frames of each ECU session together with the key map they
//! were produced under, and reads them back for decoding or replay.

mod format;
mod reader;
mod session;
mod writer;

pub use format::{
    encode_header, encode_record, split_header, Record, LOG_MAP_END, LOG_MAP_START, RECORD_SIZE,
};
pub use reader::{decode_log_file, interpret_log_file, replay, DecodedLog};
pub use session::{human_readable_bytes, list_sessions, LogSession};
pub use writer::LogWriter;

use std::path::PathBuf;

/// Default session log directory under the platform data directory
pub fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dashboard")
        .join("logs")
}
