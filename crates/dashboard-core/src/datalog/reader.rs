//! Session log reader
//!
//! Recovers the key map snapshot embedded in a binary log and walks its
//! records, either rendering them as text or feeding them back through a
//! [`WireDecoder`].

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use tracing::warn;

use super::format::{split_header, Record, RECORD_SIZE};
use crate::keymap::KeyMap;
use crate::protocol::WireDecoder;

/// Parsed contents of a binary log
#[derive(Debug, Clone, Default)]
pub struct DecodedLog {
    /// Embedded key map JSON
    pub raw_json: Option<String>,
    /// Whole records, in file order
    pub records: Vec<Record>,
    /// Trailing bytes that did not form a record
    pub leftover: usize,
}

impl DecodedLog {
    /// Parse a log held in memory.
    ///
    /// A cut-off final record ends the walk with one warning. Data without a
    /// header has no decodable records.
    pub fn from_bytes(data: &[u8]) -> Self {
        let Some((raw_json, offset)) = split_header(data) else {
            return Self::default();
        };

        let body = &data[offset..];
        let chunks = body.chunks_exact(RECORD_SIZE);
        let leftover = chunks.remainder().len();
        let records = chunks
            .map(|chunk| {
                let mut bytes = [0u8; RECORD_SIZE];
                bytes.copy_from_slice(chunk);
                Record::decode(&bytes)
            })
            .collect();

        if leftover > 0 {
            warn!(leftover, "log file has leftover bytes");
        }

        Self {
            raw_json: Some(raw_json),
            records,
            leftover,
        }
    }

    /// Read and parse a log file
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::from_bytes(&fs::read(path)?))
    }

    /// Whether nothing could be decoded
    pub fn is_empty(&self) -> bool {
        self.raw_json.is_none() && self.records.is_empty()
    }

    /// Transient key map built from the embedded JSON
    pub fn key_map(&self) -> Option<KeyMap> {
        self.raw_json.as_deref().map(KeyMap::pseudo)
    }

    /// Header JSON followed by one `timestamp tagId stringId value` line per record
    pub fn render_numeric(&self) -> String {
        let mut out = String::new();
        if let Some(json) = &self.raw_json {
            out.push_str(json);
            out.push('\n');
        }
        for record in &self.records {
            let frame = record.frame();
            let _ = writeln!(
                out,
                "{} {} {} {}",
                record.timestamp, frame.tag_id, frame.string_id, frame.value
            );
        }
        out
    }

    /// One `tag message value` line per record, names resolved through `map`.
    ///
    /// Unknown IDs render as their number.
    pub fn render_interpreted(&self, map: &KeyMap) -> String {
        let mut out = String::new();
        if !map.is_loaded() {
            return out;
        }
        for record in &self.records {
            let frame = record.frame();
            let tag = map
                .tag(frame.tag_id)
                .unwrap_or_else(|| frame.tag_id.to_string());
            let message = map
                .string(frame.string_id)
                .unwrap_or_else(|| frame.string_id.to_string());
            let _ = writeln!(out, "{tag} {message} {}", frame.value);
        }
        out
    }
}

/// Render a log file as numeric text.
///
/// Files with nothing decodable come back as a lossy string dump.
pub fn decode_log_file(path: impl AsRef<Path>) -> io::Result<String> {
    let data = fs::read(path)?;
    let log = DecodedLog::from_bytes(&data);
    let text = log.render_numeric();
    if text.is_empty() {
        warn!("nothing decodable, returning string interpretation");
        return Ok(String::from_utf8_lossy(&data).into_owned());
    }
    Ok(text)
}

/// Render a log file with tag and message names.
///
/// Uses `override_map` when given, the embedded map otherwise. Falls back to a
/// lossy string dump when no line can be rendered.
pub fn interpret_log_file(
    path: impl AsRef<Path>,
    override_map: Option<&KeyMap>,
) -> io::Result<String> {
    let data = fs::read(path)?;
    let log = DecodedLog::from_bytes(&data);

    let text = match override_map {
        Some(map) => log.render_interpreted(map),
        None => log
            .key_map()
            .map(|map| log.render_interpreted(&map))
            .unwrap_or_default(),
    };

    if text.is_empty() {
        warn!("nothing interpretable, returning string interpretation");
        return Ok(String::from_utf8_lossy(&data).into_owned());
    }
    Ok(text)
}

/// Feed every record of a log through `decoder`.
///
/// Returns the number of records dispatched.
pub fn replay(path: impl AsRef<Path>, decoder: &mut WireDecoder) -> io::Result<usize> {
    let log = DecodedLog::open(path)?;
    for record in &log.records {
        decoder.dispatch(record.timestamp, &record.raw);
    }
    Ok(log.records.len())
}
