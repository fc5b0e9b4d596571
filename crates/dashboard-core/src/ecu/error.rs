//! ECU session errors

use thiserror::Error;

use crate::keymap::KeyMapError;
use crate::protocol::ProtocolError;

/// Errors returned by [`super::Ecu`]
#[derive(Error, Debug)]
pub enum EcuError {
    #[error("No JSON map loaded")]
    NoKeyMap,

    #[error("ECU session has shut down")]
    SessionClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    KeyMap(#[from] KeyMapError),
}
