//! Parsed tag and string tables

use std::collections::HashMap;

use serde_json::Value;

use super::KeyMapError;

/// Pack a tag ID and a string ID into the 32-bit dispatch key.
///
/// Identical to reading the first four bytes of a frame as a little-endian u32.
pub fn combined_key(tag_id: u16, string_id: u16) -> u32 {
    u32::from(tag_id) | (u32::from(string_id) << 16)
}

/// One immutable snapshot of the key map.
///
/// Both tables are 1:1; the JSON object keys guarantee unique strings and the
/// ECU build tooling guarantees unique IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTables {
    tags: HashMap<u16, String>,
    strings: HashMap<u16, String>,
    raw: String,
}

impl KeyTables {
    /// Parse `[ {tag: id, ...}, {string: id, ...} ]`.
    ///
    /// Anything else is rejected as a whole.
    pub fn parse(raw: &str) -> Result<Self, KeyMapError> {
        let root: Value = serde_json::from_str(raw)?;
        let elements = root.as_array().ok_or(KeyMapError::NotAnArray)?;
        if elements.len() != 2 {
            return Err(KeyMapError::WrongArity(elements.len()));
        }

        Ok(Self {
            tags: parse_table(&elements[0], 0)?,
            strings: parse_table(&elements[1], 1)?,
            raw: raw.to_string(),
        })
    }

    /// The JSON text these tables were parsed from
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Tag text for an ID
    pub fn tag(&self, id: u16) -> Option<&str> {
        self.tags.get(&id).map(String::as_str)
    }

    /// Message text for an ID
    pub fn string(&self, id: u16) -> Option<&str> {
        self.strings.get(&id).map(String::as_str)
    }

    /// Reverse lookup of a tag
    pub fn tag_id(&self, tag: &str) -> Option<u16> {
        key_by_value(&self.tags, tag)
    }

    /// Reverse lookup of a message string
    pub fn string_id(&self, message: &str) -> Option<u16> {
        key_by_value(&self.strings, message)
    }

    /// Combined key of a (tag, message) pair, if both resolve
    pub fn message_key(&self, tag: &str, message: &str) -> Option<u32> {
        Some(combined_key(self.tag_id(tag)?, self.string_id(message)?))
    }

    /// All tag entries
    pub fn tags(&self) -> impl Iterator<Item = (u16, &str)> {
        self.tags.iter().map(|(id, s)| (*id, s.as_str()))
    }

    /// All string entries
    pub fn strings(&self) -> impl Iterator<Item = (u16, &str)> {
        self.strings.iter().map(|(id, s)| (*id, s.as_str()))
    }
}

fn parse_table(element: &Value, index: usize) -> Result<HashMap<u16, String>, KeyMapError> {
    let object = element
        .as_object()
        .ok_or(KeyMapError::NotAnObject(index))?;

    let mut table = HashMap::with_capacity(object.len());
    for (key, value) in object {
        let id = value
            .as_u64()
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| KeyMapError::InvalidId {
                key: key.clone(),
                value: value.to_string(),
            })?;
        table.insert(id, key.clone());
    }
    Ok(table)
}

/// Linear scan; only valid for 1:1 maps
fn key_by_value(map: &HashMap<u16, String>, value: &str) -> Option<u16> {
    map.iter()
        .find(|(_, v)| v.as_str() == value)
        .map(|(k, _)| *k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_key_matches_frame_prefix() {
        let frame = [0x01, 0x00, 0x05, 0x00];
        assert_eq!(combined_key(1, 5), u32::from_le_bytes(frame));
        assert_eq!(combined_key(0xFFFF, 0), 0x0000_FFFF);
        assert_eq!(combined_key(0, 0xFFFF), 0xFFFF_0000);
    }

    #[test]
    fn test_parse_and_lookup() {
        let tables =
            KeyTables::parse(r#"[{"[Front Teensy]":1,"[HeartBeat]":2},{"[ LOG ] Beat":5}]"#)
                .unwrap();

        assert_eq!(tables.tag(1), Some("[Front Teensy]"));
        assert_eq!(tables.tag_id("[HeartBeat]"), Some(2));
        assert_eq!(tables.string(5), Some("[ LOG ] Beat"));
        assert_eq!(tables.string_id("missing"), None);
        assert_eq!(
            tables.message_key("[Front Teensy]", "[ LOG ] Beat"),
            Some(combined_key(1, 5))
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(KeyTables::parse("not json"), Err(KeyMapError::Json(_))));
        assert!(matches!(KeyTables::parse("{}"), Err(KeyMapError::NotAnArray)));
        assert!(matches!(
            KeyTables::parse("[{}]"),
            Err(KeyMapError::WrongArity(1))
        ));
        assert!(matches!(
            KeyTables::parse("[{}, {}, {}]"),
            Err(KeyMapError::WrongArity(3))
        ));
        assert!(matches!(
            KeyTables::parse("[{}, []]"),
            Err(KeyMapError::NotAnObject(1))
        ));
        assert!(matches!(
            KeyTables::parse(r#"[{"a": "1"}, {}]"#),
            Err(KeyMapError::InvalidId { .. })
        ));
        assert!(matches!(
            KeyTables::parse(r#"[{"a": 1.5}, {}]"#),
            Err(KeyMapError::InvalidId { .. })
        ));
        assert!(matches!(
            KeyTables::parse(r#"[{}, {"a": 70000}]"#),
            Err(KeyMapError::InvalidId { .. })
        ));
    }
}
