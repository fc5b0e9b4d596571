//! # Dashboard Core Library
//!
//! Telemetry decoding for an electric vehicle dashboard.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The key map translating ECU tag and message strings to numeric IDs
//! - A fixed catalog of telemetry metrics with typed decoding
//! - Wire frame decoding, console interpretation and vehicle state tracking
//! - A queued dispatch loop per ECU session
//! - Binary session logs with an embedded key map snapshot
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dashboard_core::prelude::*;
//!
//! let config = DashboardConfig::from_file("dashboard.json")?;
//! let key_map = Arc::new(KeyMap::new(FileStorage::new(&config.key_map_path)));
//! key_map.load_from_storage()?;
//!
//! let ecu = Ecu::start(&config, key_map, Arc::new(TracingSink));
//! ecu.on_state_change(|state| println!("now {state}"));
//! ecu.receive_data(&[1, 0, 5, 0, 42, 0, 0, 0]);
//! ```

pub mod config;
pub mod datalog;
pub mod demo;
pub mod ecu;
pub mod keymap;
pub mod observer;
pub mod protocol;
pub mod registry;
pub mod state;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, DashboardConfig};
    pub use crate::datalog::{
        decode_log_file, interpret_log_file, list_sessions, replay, DecodedLog, LogSession,
        LogWriter,
    };
    pub use crate::demo::{demo_key_map_json, DemoSimulator};
    pub use crate::ecu::{Ecu, EcuError};
    pub use crate::keymap::{FileStorage, KeyMap, KeyMapError, KeyMapStatus, LoadOutcome};
    pub use crate::observer::SubscriptionId;
    pub use crate::protocol::{
        Command, Frame, InterpreterMode, LogSink, SerialTransport, Severity, TracingSink,
        Transport, WireDecoder,
    };
    pub use crate::registry::{MessageRegistry, Metric, MetricTable, UpdateMode};
    pub use crate::state::{FaultEvent, StateTracker, VehicleState};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
