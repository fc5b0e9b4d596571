//! Catalog of telemetry messages the dashboard understands

use serde::{Deserialize, Serialize};

/// How the 32-bit value field of a frame is reinterpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeKind {
    /// Zero-extend all 32 bits
    Unsigned,
    /// Sign-extend the low 8 bits
    SignedByte,
    /// Sign-extend the low 16 bits
    SignedShort,
    /// Full 32-bit signed value
    SignedInt,
}

impl DecodeKind {
    /// Decode the raw value field
    pub fn decode(self, raw: i32) -> i64 {
        match self {
            DecodeKind::Unsigned => i64::from(raw as u32),
            DecodeKind::SignedByte => i64::from(raw as i8),
            DecodeKind::SignedShort => i64::from(raw as i16),
            DecodeKind::SignedInt => i64::from(raw),
        }
    }
}

/// Static description of one catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageDefinition {
    /// Tag of the sender, exactly as in the key map
    pub tag: &'static str,
    /// Message text, exactly as in the key map
    pub message: &'static str,
    /// Decoding of the value field
    pub kind: DecodeKind,
    /// Short display label
    pub label: &'static str,
    /// Display unit, empty when unitless
    pub unit: &'static str,
}

const FRONT: &str = "[Front Teensy]";

/// Known telemetry quantities.
///
/// The discriminant is the fixed catalog index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    Mc0Voltage = 0,
    Mc1Voltage,
    Mc1Current,
    Mc0Current,
    Mc1BoardTemp,
    Mc0BoardTemp,
    Mc1MotorTemp,
    Mc0MotorTemp,
    Speedometer,
    PowerGauge,
    BatteryLife,
    BmsVolt,
    BmsAmp,
    BmsHighTemp,
    BmsLowTemp,
    BmsDischargeLim,
    BmsChargeLim,
    Fault,
    Lag,
    Beat,
    StartLight,
    State,
    SerialVarResponse,
}

impl Metric {
    /// Number of catalog entries
    pub const COUNT: usize = 23;

    /// Every entry, in catalog order
    pub const ALL: [Metric; Metric::COUNT] = [
        Metric::Mc0Voltage,
        Metric::Mc1Voltage,
        Metric::Mc1Current,
        Metric::Mc0Current,
        Metric::Mc1BoardTemp,
        Metric::Mc0BoardTemp,
        Metric::Mc1MotorTemp,
        Metric::Mc0MotorTemp,
        Metric::Speedometer,
        Metric::PowerGauge,
        Metric::BatteryLife,
        Metric::BmsVolt,
        Metric::BmsAmp,
        Metric::BmsHighTemp,
        Metric::BmsLowTemp,
        Metric::BmsDischargeLim,
        Metric::BmsChargeLim,
        Metric::Fault,
        Metric::Lag,
        Metric::Beat,
        Metric::StartLight,
        Metric::State,
        Metric::SerialVarResponse,
    ];

    /// Fixed catalog index
    pub fn index(self) -> usize {
        self as usize
    }

    /// Entry at a catalog index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Static definition of this entry
    pub fn definition(self) -> MessageDefinition {
        use DecodeKind::*;

        let (tag, message, kind, label, unit) = match self {
            Metric::Mc0Voltage => (FRONT, "[ LOG ] MC0 DC BUS Voltage:", SignedShort, "MC0 Voltage", "V"),
            Metric::Mc1Voltage => (FRONT, "[ LOG ] MC1 DC BUS Voltage:", SignedShort, "MC1 Voltage", "V"),
            Metric::Mc1Current => (FRONT, "[ LOG ] MC1 DC BUS Current:", SignedShort, "MC1 Current", "A"),
            Metric::Mc0Current => (FRONT, "[ LOG ] MC0 DC BUS Current:", SignedShort, "MC0 Current", "A"),
            Metric::Mc1BoardTemp => (FRONT, "[ LOG ] MC1 Board Temp:", SignedShort, "MC1 Board Temp", "°C"),
            Metric::Mc0BoardTemp => (FRONT, "[ LOG ] MC0 Board Temp:", SignedShort, "MC0 Board Temp", "°C"),
            Metric::Mc1MotorTemp => (FRONT, "[ LOG ] MC1 Motor Temp:", SignedShort, "MC1 Motor Temp", "°C"),
            Metric::Mc0MotorTemp => (FRONT, "[ LOG ] MC0 Motor Temp:", SignedShort, "MC0 Motor Temp", "°C"),
            Metric::Speedometer => (FRONT, "[ LOG ] Current Motor Speed:", SignedInt, "Speed", "mph"),
            Metric::PowerGauge => (FRONT, "[ LOG ] MC Current Power:", Unsigned, "Power", "kW"),
            Metric::BatteryLife => (FRONT, "[ LOG ] BMS State Of Charge:", SignedByte, "Battery", "%"),
            Metric::BmsVolt => (FRONT, "[ LOG ] BMS Immediate Voltage:", SignedShort, "BMS Voltage", "V"),
            Metric::BmsAmp => (FRONT, "[ LOG ] BMS Pack Average Current:", SignedShort, "BMS Current", "A"),
            Metric::BmsHighTemp => (FRONT, "[ LOG ] BMS Pack Highest Temp:", Unsigned, "BMS High Temp", "°C"),
            Metric::BmsLowTemp => (FRONT, "[ LOG ] BMS Pack Lowest Temp:", Unsigned, "BMS Low Temp", "°C"),
            Metric::BmsDischargeLim => (FRONT, "[ LOG ] BMS Discharge current limit:", SignedShort, "Discharge Limit", "A"),
            Metric::BmsChargeLim => (FRONT, "[ LOG ] BMS Charge current limit:", SignedShort, "Charge Limit", "A"),
            Metric::Fault => (FRONT, "[ LOG ] Fault State", Unsigned, "Fault", ""),
            Metric::Lag => ("[HeartBeat]", "[WARN]  Heartbeat is taking too long", Unsigned, "Lag", "ms"),
            Metric::Beat => (FRONT, "[ LOG ] Beat", Unsigned, "Beat", ""),
            Metric::StartLight => (FRONT, "[ LOG ] Start Light", Unsigned, "Start Light", ""),
            Metric::State => (FRONT, "[ LOG ] Current State", Unsigned, "State", ""),
            Metric::SerialVarResponse => ("[SerialVar]", "[INFO]  Approximate Float value:", Unsigned, "Serial Var", ""),
        };

        MessageDefinition {
            tag,
            message,
            kind,
            label,
            unit,
        }
    }

    /// Tag of the sender
    pub fn tag(self) -> &'static str {
        self.definition().tag
    }

    /// Message text
    pub fn message(self) -> &'static str {
        self.definition().message
    }

    /// Value decoding
    pub fn kind(self) -> DecodeKind {
        self.definition().kind
    }

    /// Display label
    pub fn label(self) -> &'static str {
        self.definition().label
    }

    /// Display unit
    pub fn unit(self) -> &'static str {
        self.definition().unit
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_decode_kinds() {
        assert_eq!(DecodeKind::Unsigned.decode(-1), 0xFFFF_FFFF);
        assert_eq!(DecodeKind::SignedByte.decode(0xFF), -1);
        assert_eq!(DecodeKind::SignedByte.decode(0x17F), 127);
        assert_eq!(DecodeKind::SignedShort.decode(0xFFFE), -2);
        assert_eq!(DecodeKind::SignedShort.decode(0x1_0005), 5);
        assert_eq!(DecodeKind::SignedInt.decode(-42), -42);
    }

    #[test]
    fn test_catalog_indices_match_order() {
        for (i, metric) in Metric::ALL.iter().enumerate() {
            assert_eq!(metric.index(), i);
            assert_eq!(Metric::from_index(i), Some(*metric));
        }
        assert_eq!(Metric::from_index(Metric::COUNT), None);
    }

    #[test]
    fn test_catalog_pairs_are_unique() {
        let pairs: HashSet<_> = Metric::ALL
            .iter()
            .map(|m| (m.tag(), m.message()))
            .collect();
        assert_eq!(pairs.len(), Metric::COUNT);
    }
}
