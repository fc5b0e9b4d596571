//! ECU commands
//!
//! The ECU accepts single-byte commands on the same serial line it streams
//! telemetry on.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Commands understood by the front ECU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Enter charging mode
    Charge,
    /// Send a CAN bus message
    SendCanBusMessage,
    /// Clear the latched fault
    ClearFault,
    /// Toggle CAN bus sniffing output
    ToggleCanBusSniff,
    /// Toggle mirror mode
    ToggleMirrorMode,
    /// Enter a mirror set sequence
    EnterMirrorSet,
    /// Ask the ECU to echo
    SendEcho,
    /// Toggle reverse
    ToggleReverse,
    /// Print the lookup table
    PrintLookup,
    /// Set a serial variable
    SetSerialVar,
}

impl Command {
    /// Every command
    pub const ALL: [Command; 10] = [
        Command::Charge,
        Command::SendCanBusMessage,
        Command::ClearFault,
        Command::ToggleCanBusSniff,
        Command::ToggleMirrorMode,
        Command::EnterMirrorSet,
        Command::SendEcho,
        Command::ToggleReverse,
        Command::PrintLookup,
        Command::SetSerialVar,
    ];

    /// The command byte
    pub fn byte(&self) -> u8 {
        match self {
            Command::Charge => 123,
            Command::SendCanBusMessage => 111,
            Command::ClearFault => 45,
            Command::ToggleCanBusSniff => 127,
            Command::ToggleMirrorMode => 90,
            Command::EnterMirrorSet => 0xFF,
            Command::SendEcho => 84,
            Command::ToggleReverse => 25,
            Command::PrintLookup => 101,
            Command::SetSerialVar => 61,
        }
    }

    /// Bytes written to the transport
    pub fn to_bytes(&self) -> [u8; 1] {
        [self.byte()]
    }

    /// Snake-case name, as accepted by [`FromStr`]
    pub fn name(&self) -> &'static str {
        match self {
            Command::Charge => "charge",
            Command::SendCanBusMessage => "send_can_bus_message",
            Command::ClearFault => "clear_fault",
            Command::ToggleCanBusSniff => "toggle_can_bus_sniff",
            Command::ToggleMirrorMode => "toggle_mirror_mode",
            Command::EnterMirrorSet => "enter_mirror_set",
            Command::SendEcho => "send_echo",
            Command::ToggleReverse => "toggle_reverse",
            Command::PrintLookup => "print_lookup",
            Command::SetSerialVar => "set_serial_var",
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::UnknownCommand(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::Charge.byte(), 123);
        assert_eq!(Command::ClearFault.to_bytes(), [45]);
        assert_eq!(Command::EnterMirrorSet.byte(), 0xFF);
    }

    #[test]
    fn test_command_names() {
        for cmd in Command::ALL {
            assert_eq!(cmd.name().parse::<Command>().unwrap(), cmd);
        }
        assert!("launch".parse::<Command>().is_err());
    }
}
