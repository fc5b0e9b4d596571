//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the ECU
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Not connected to ECU")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Frame must be 8 bytes, got {0}")]
    FrameLength(usize),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Unknown interpreter mode: {0}")]
    UnknownMode(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        ProtocolError::SerialError(e.to_string())
    }
}
