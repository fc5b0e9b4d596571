//! Frame encoding/decoding
//!
//! Frame format (8 bytes, all little-endian):
//! - 2 bytes: tag ID of the sender
//! - 2 bytes: string ID of the message
//! - 4 bytes: signed 32-bit value

use byteorder::{ByteOrder, LittleEndian};

use super::{ProtocolError, FRAME_SIZE};
use crate::keymap::combined_key;

/// One decoded telemetry frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Tag ID of the sender
    pub tag_id: u16,
    /// String ID of the message
    pub string_id: u16,
    /// Raw value field
    pub value: i32,
}

impl Frame {
    /// Create a frame from its fields
    pub fn new(tag_id: u16, string_id: u16, value: i32) -> Self {
        Self {
            tag_id,
            string_id,
            value,
        }
    }

    /// Decode exactly one frame
    pub fn decode(raw: &[u8; FRAME_SIZE]) -> Self {
        Self {
            tag_id: LittleEndian::read_u16(&raw[0..2]),
            string_id: LittleEndian::read_u16(&raw[2..4]),
            value: LittleEndian::read_i32(&raw[4..8]),
        }
    }

    /// Decode a frame from a slice that must be exactly [`FRAME_SIZE`] long
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        let raw: &[u8; FRAME_SIZE] = data
            .try_into()
            .map_err(|_| ProtocolError::FrameLength(data.len()))?;
        Ok(Self::decode(raw))
    }

    /// Encode the frame to its wire bytes
    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut bytes = [0u8; FRAME_SIZE];
        LittleEndian::write_u16(&mut bytes[0..2], self.tag_id);
        LittleEndian::write_u16(&mut bytes[2..4], self.string_id);
        LittleEndian::write_i32(&mut bytes[4..8], self.value);
        bytes
    }

    /// Registry lookup key of this frame
    pub fn key(&self) -> u32 {
        combined_key(self.tag_id, self.string_id)
    }
}

/// Frames of a received chunk plus the size of any cut-off tail
#[derive(Debug)]
pub struct ChunkFrames<'a> {
    frames: std::slice::ChunksExact<'a, u8>,
}

impl<'a> ChunkFrames<'a> {
    /// Split `chunk` into consecutive frames
    pub fn new(chunk: &'a [u8]) -> Self {
        Self {
            frames: chunk.chunks_exact(FRAME_SIZE),
        }
    }

    /// Bytes at the end of the chunk that do not form a whole frame
    pub fn remainder(&self) -> &'a [u8] {
        self.frames.remainder()
    }
}

impl<'a> Iterator for ChunkFrames<'a> {
    type Item = &'a [u8; FRAME_SIZE];

    fn next(&mut self) -> Option<Self::Item> {
        self.frames.next().and_then(|f| f.try_into().ok())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.frames.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_layout() {
        let frame = Frame::decode(&[0x01, 0x00, 0x05, 0x00, 0x2A, 0x00, 0x00, 0x00]);
        assert_eq!(frame, Frame::new(1, 5, 42));
        assert_eq!(frame.key(), combined_key(1, 5));

        let negative = Frame::decode(&[0x34, 0x12, 0xCD, 0xAB, 0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(negative, Frame::new(0x1234, 0xABCD, -2));
    }

    #[test]
    fn test_reencode_reproduces_bytes() {
        let samples: [[u8; 8]; 3] = [
            [0; 8],
            [0xFF; 8],
            [0x01, 0x02, 0x03, 0x04, 0x80, 0x00, 0x00, 0x80],
        ];
        for raw in samples {
            assert_eq!(Frame::decode(&raw).to_bytes(), raw);
        }
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(matches!(
            Frame::from_bytes(&[0; 7]),
            Err(ProtocolError::FrameLength(7))
        ));
        assert!(Frame::from_bytes(&[0; 8]).is_ok());
    }

    #[test]
    fn test_chunk_split() {
        let chunk = [0u8; 21];
        let mut frames = ChunkFrames::new(&chunk);
        assert_eq!(frames.by_ref().count(), 2);
        assert_eq!(frames.remainder().len(), 5);
    }
}
