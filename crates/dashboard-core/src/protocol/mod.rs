//! ECU Wire Protocol
//!
//! The front ECU streams fixed 8-byte frames over USB serial:
//! `[tagId:u16le][stringId:u16le][value:i32le]`. Commands go the other way
//! as single bytes.

pub mod commands;
pub mod decoder;
mod error;
pub mod frame;
pub mod serial;
pub mod transport;

pub use commands::Command;
pub use decoder::{
    ChunkReport, InterpreterMode, LogSink, Severity, SharedMode, TracingSink, WireDecoder,
};
pub use error::ProtocolError;
pub use frame::{ChunkFrames, Frame};
pub use serial::{usb_ports, ParitySetting, SerialSettings, SerialTransport};
pub use transport::{ConnectionStatus, Transport};

/// Size of one wire frame in bytes
pub const FRAME_SIZE: usize = 8;

/// Default baud rate for ECU communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;
