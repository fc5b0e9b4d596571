//! Transport boundary
//!
//! The ECU link only needs to move raw bytes: chunks come in through a
//! callback, commands go out through [`Transport::write`].

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Link state reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No device present
    Detached,
    /// Device present but not opened
    Attached,
    /// Port open, data flowing
    Connected,
}

/// Byte channel to the ECU
pub trait Transport: Send + Sync {
    /// Open the link
    fn open(&self) -> Result<(), ProtocolError>;

    /// Close the link; a closed link stays closed until [`Transport::open`]
    fn close(&self);

    /// Write raw bytes
    fn write(&self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Whether the link is open
    fn is_open(&self) -> bool;

    /// Whether a device is present
    fn is_attached(&self) -> bool;
}
