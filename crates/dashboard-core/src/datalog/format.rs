//! Binary log file format
//!
//! ```text
//! ---[ LOG MAP START ]---\n
//! <key map JSON>\n
//! ---[ LOG MAP END ]---\n
//! [epochMillis:i64le][frame:8] ...
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::protocol::{Frame, FRAME_SIZE};

/// First line of every log file
pub const LOG_MAP_START: &str = "---[ LOG MAP START ]---\n";

/// Line closing the embedded key map
pub const LOG_MAP_END: &str = "---[ LOG MAP END ]---\n";

/// Size of one body record
pub const RECORD_SIZE: usize = 8 + FRAME_SIZE;

/// Extension of binary session logs
pub const BINARY_EXTENSION: &str = "bin";

/// Extension of session text logs
pub const TEXT_EXTENSION: &str = "txt";

/// Header bytes embedding a key map snapshot
pub fn encode_header(raw_json: &str) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(LOG_MAP_START.len() + raw_json.len() + 1 + LOG_MAP_END.len());
    out.extend_from_slice(LOG_MAP_START.as_bytes());
    out.extend_from_slice(raw_json.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(LOG_MAP_END.as_bytes());
    out
}

/// One body record: arrival timestamp prefix plus the raw frame
pub fn encode_record(timestamp: i64, frame: &[u8; FRAME_SIZE]) -> [u8; RECORD_SIZE] {
    let mut out = [0u8; RECORD_SIZE];
    LittleEndian::write_i64(&mut out[..8], timestamp);
    out[8..].copy_from_slice(frame);
    out
}

/// A decoded body record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    /// Arrival time in epoch milliseconds
    pub timestamp: i64,
    /// Raw frame bytes
    pub raw: [u8; FRAME_SIZE],
}

impl Record {
    /// Decode a record
    pub fn decode(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut raw = [0u8; FRAME_SIZE];
        raw.copy_from_slice(&bytes[8..]);
        Self {
            timestamp: LittleEndian::read_i64(&bytes[..8]),
            raw,
        }
    }

    /// Decoded frame fields
    pub fn frame(&self) -> Frame {
        Frame::decode(&self.raw)
    }
}

/// Locate the embedded key map.
///
/// Returns the JSON text and the offset where the record body starts.
/// Files without a complete header yield `None`.
pub fn split_header(data: &[u8]) -> Option<(String, usize)> {
    let start = LOG_MAP_START.as_bytes();
    let end = LOG_MAP_END.as_bytes();
    if !data.starts_with(start) {
        return None;
    }
    let end_pos = find(&data[start.len()..], end)? + start.len();
    let json = String::from_utf8_lossy(&data[start.len()..end_pos]);
    let json = json.strip_suffix('\n').unwrap_or(&json).to_string();
    Some((json, end_pos + end.len()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = encode_header("[{},{}]");
        assert_eq!(
            header,
            b"---[ LOG MAP START ]---\n[{},{}]\n---[ LOG MAP END ]---\n".to_vec()
        );
    }

    #[test]
    fn test_split_header() {
        let mut data = encode_header(r#"[{"[A]":1},{"b":2}]"#);
        let body = encode_record(1_700_000_000_000, &[1, 0, 5, 0, 42, 0, 0, 0]);
        data.extend_from_slice(&body);

        let (json, offset) = split_header(&data).unwrap();
        assert_eq!(json, r#"[{"[A]":1},{"b":2}]"#);
        assert_eq!(&data[offset..], &body);
    }

    #[test]
    fn test_split_header_missing() {
        assert!(split_header(b"not a log").is_none());
        assert!(split_header(b"---[ LOG MAP START ]---\n[{},{}]\n").is_none());
    }

    #[test]
    fn test_record_decode() {
        let bytes = encode_record(-5, &[1, 0, 5, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        let record = Record::decode(&bytes);
        assert_eq!(record.timestamp, -5);
        let frame = record.frame();
        assert_eq!((frame.tag_id, frame.string_id, frame.value), (1, 5, -1));
    }
}
