//! Wire decoder
//!
//! Turns frames into registry updates, vehicle state changes and fault
//! reports, and optionally renders each frame as a printable line.

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::frame::{ChunkFrames, Frame};
use super::{ProtocolError, FRAME_SIZE};
use crate::keymap::{KeyMap, KeyTables};
use crate::registry::{MessageRegistry, Metric};
use crate::state::{FaultEvent, StateTracker};

/// How received frames are rendered for the console
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum InterpreterMode {
    /// No rendering
    #[default]
    Disabled = 0,
    /// Message text from the key map plus the value
    Ascii,
    /// Frame bytes in hex
    Hex,
    /// Numeric tag, string and value
    Raw,
}

impl InterpreterMode {
    fn from_repr(repr: u8) -> Self {
        match repr {
            1 => InterpreterMode::Ascii,
            2 => InterpreterMode::Hex,
            3 => InterpreterMode::Raw,
            _ => InterpreterMode::Disabled,
        }
    }
}

impl FromStr for InterpreterMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(InterpreterMode::Disabled),
            "ascii" => Ok(InterpreterMode::Ascii),
            "hex" => Ok(InterpreterMode::Hex),
            "raw" => Ok(InterpreterMode::Raw),
            other => Err(ProtocolError::UnknownMode(other.to_string())),
        }
    }
}

/// Interpreter mode shared between the dispatch task and its controllers
#[derive(Debug, Clone, Default)]
pub struct SharedMode(Arc<AtomicU8>);

impl SharedMode {
    /// Shared cell starting at `mode`
    pub fn new(mode: InterpreterMode) -> Self {
        Self(Arc::new(AtomicU8::new(mode as u8)))
    }

    /// Current mode
    pub fn get(&self) -> InterpreterMode {
        InterpreterMode::from_repr(self.0.load(Ordering::Relaxed))
    }

    /// Switch mode; takes effect from the next frame
    pub fn set(&self, mode: InterpreterMode) {
        self.0.store(mode as u8, Ordering::Relaxed);
    }
}

/// Severity of a rendered ECU line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// `[ERROR]`
    Error,
    /// `[FATAL]`
    Fatal,
    /// `[WARN]`
    Warn,
    /// `[DEBUG]`
    Debug,
    /// `[INFO]`, `[ LOG ]` or unmarked
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
            Severity::Warn => "WARN",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
        };
        f.write_str(label)
    }
}

// Checked in this order; the first match wins
const MARKERS: [(Severity, &[&str]); 4] = [
    (Severity::Error, &["[ERROR]"]),
    (Severity::Fatal, &["[FATAL]"]),
    (Severity::Warn, &["[WARN]"]),
    (Severity::Debug, &["[DEBUG]"]),
];
const INFO_MARKERS: &[&str] = &["[INFO]", "[ LOG ]"];

impl Severity {
    /// Classify a message by its bracketed marker and strip the marker.
    ///
    /// Matching ignores case. Messages without a known marker are info.
    pub fn classify(message: &str) -> (Severity, String) {
        let lower = message.to_ascii_lowercase();
        let (severity, markers) = MARKERS
            .iter()
            .find(|(_, markers)| {
                markers
                    .iter()
                    .any(|m| lower.contains(&m.to_ascii_lowercase()))
            })
            .map(|(s, m)| (*s, *m))
            .unwrap_or((Severity::Info, INFO_MARKERS));

        let mut text = message.to_string();
        for marker in markers {
            text = strip_ignore_case(&text, marker);
        }
        (severity, text.trim().to_string())
    }
}

/// Remove every occurrence of an ASCII marker, ignoring case
fn strip_ignore_case(text: &str, marker: &str) -> String {
    let marker = marker.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    // ASCII lowercasing keeps byte offsets
    while let Some(pos) = rest.to_ascii_lowercase().find(&marker) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + marker.len()..];
    }
    out.push_str(rest);
    out
}

/// Receiver of rendered lines and decoder warnings
pub trait LogSink: Send + Sync {
    /// Handle one line
    fn log(&self, severity: Severity, line: &str);
}

/// Sink emitting `tracing` events on the `ecu` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, severity: Severity, line: &str) {
        match severity {
            Severity::Error | Severity::Fatal => tracing::error!(target: "ecu", "{line}"),
            Severity::Warn => tracing::warn!(target: "ecu", "{line}"),
            Severity::Debug => tracing::debug!(target: "ecu", "{line}"),
            Severity::Info => tracing::info!(target: "ecu", "{line}"),
        }
    }
}

/// Outcome of processing one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReport {
    /// Whole frames decoded and dispatched
    pub frames: usize,
    /// Trailing bytes dropped because they did not form a frame
    pub dropped: usize,
}

/// Decodes frames and drives the registry and the state tracker.
///
/// Owned by a single thread; see [`crate::ecu`].
pub struct WireDecoder {
    key_map: Arc<KeyMap>,
    tables: Option<Arc<KeyTables>>,
    resolved_generation: Option<u64>,
    registry: MessageRegistry,
    state: Arc<StateTracker>,
    mode: SharedMode,
    sink: Arc<dyn LogSink>,
}

impl WireDecoder {
    /// Create a decoder. Keys are resolved lazily on the first frame.
    pub fn new(
        key_map: Arc<KeyMap>,
        registry: MessageRegistry,
        state: Arc<StateTracker>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            key_map,
            tables: None,
            resolved_generation: None,
            registry,
            state,
            mode: SharedMode::default(),
            sink,
        }
    }

    /// Use an externally controlled interpreter mode
    pub fn with_mode(mut self, mode: SharedMode) -> Self {
        self.mode = mode;
        self
    }

    /// Handle to the interpreter mode
    pub fn mode(&self) -> SharedMode {
        self.mode.clone()
    }

    /// The registry this decoder updates
    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    /// The state tracker this decoder updates
    pub fn state(&self) -> &Arc<StateTracker> {
        &self.state
    }

    /// The key map frames are resolved against
    pub fn key_map(&self) -> &Arc<KeyMap> {
        &self.key_map
    }

    /// Re-resolve the registry if the key map changed since the last call.
    ///
    /// Returns true if a resolution happened.
    pub fn refresh(&mut self) -> bool {
        let generation = self.key_map.generation();
        if self.resolved_generation == Some(generation) {
            return false;
        }
        self.tables = self.key_map.snapshot();
        self.registry.resolve_with(self.tables.as_deref());
        self.resolved_generation = Some(generation);
        true
    }

    /// Decode the fields of one frame
    pub fn decode_frame(raw: &[u8; FRAME_SIZE]) -> Frame {
        Frame::decode(raw)
    }

    /// Decode one frame and dispatch it.
    ///
    /// Returns the catalog entry the frame updated, if any.
    pub fn dispatch(&mut self, timestamp: i64, raw: &[u8; FRAME_SIZE]) -> Option<Metric> {
        self.refresh();
        let frame = Frame::decode(raw);

        match self.mode.get() {
            InterpreterMode::Disabled => {}
            InterpreterMode::Ascii => self.interpret(&frame),
            InterpreterMode::Hex => self.sink.log(Severity::Debug, &hex(raw)),
            InterpreterMode::Raw => self.sink.log(
                Severity::Debug,
                &format!("{} {} {}", frame.tag_id, frame.string_id, frame.value),
            ),
        }

        let matched = self.registry.update(frame.key(), frame.value);
        if matched == Some(Metric::State) {
            self.apply_state();
        }

        if let Some(message) = self.registry.check_fault(frame.string_id) {
            self.state.report_fault(FaultEvent {
                timestamp,
                tag_id: frame.tag_id,
                string_id: frame.string_id,
                message: message.to_string(),
                value: frame.value,
            });
        }

        matched
    }

    /// Split a chunk into frames and dispatch them all with the chunk's timestamp.
    ///
    /// `on_frame` sees every whole frame after it was dispatched. A cut-off
    /// tail is dropped and reported once to the sink.
    pub fn process_chunk<F>(&mut self, timestamp: i64, chunk: &[u8], mut on_frame: F) -> ChunkReport
    where
        F: FnMut(&[u8; FRAME_SIZE]),
    {
        let mut frames = ChunkFrames::new(chunk);
        let mut count = 0;
        for raw in frames.by_ref() {
            self.dispatch(timestamp, raw);
            on_frame(raw);
            count += 1;
        }

        let dropped = frames.remainder().len();
        if dropped > 0 {
            self.sink.log(
                Severity::Warn,
                &format!("Received cutoff array, dropped {dropped} trailing bytes"),
            );
        }

        ChunkReport {
            frames: count,
            dropped,
        }
    }

    fn apply_state(&self) {
        let value = self.registry.value_of(Metric::State);
        let state = u16::try_from(value)
            .ok()
            .and_then(|tag_id| self.registry.state_for_tag(tag_id));
        match state {
            Some(state) => {
                if self.state.set(state) {
                    debug!(%state, "vehicle state changed");
                }
            }
            None => debug!(value, "state value does not match a known state tag"),
        }
    }

    fn interpret(&self, frame: &Frame) {
        let Some(message) = self
            .tables
            .as_ref()
            .and_then(|t| t.string(frame.string_id))
        else {
            return;
        };
        let (severity, text) = Severity::classify(message);
        self.sink
            .log(severity, &format!("{text} {}", frame.value));
    }
}

impl std::fmt::Debug for WireDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireDecoder")
            .field("resolved_generation", &self.resolved_generation)
            .field("mode", &self.mode.get())
            .finish()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(Severity, String)>>);

    impl LogSink for RecordingSink {
        fn log(&self, severity: Severity, line: &str) {
            self.0.lock().unwrap().push((severity, line.to_string()));
        }
    }

    const MAP: &str = r#"[{"[Front Teensy]":1},{"[ LOG ] Beat":5,"[error] Motor stalled":6,"[WARN]  Slow loop":7,"Plain text":8}]"#;

    fn decoder() -> (WireDecoder, Arc<RecordingSink>) {
        let map = Arc::new(KeyMap::unpersisted());
        map.load(MAP).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let decoder = WireDecoder::new(
            map,
            MessageRegistry::new(),
            Arc::new(StateTracker::new()),
            sink.clone(),
        );
        (decoder, sink)
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            Severity::classify("[ERROR] Motor stalled"),
            (Severity::Error, "Motor stalled".to_string())
        );
        assert_eq!(
            Severity::classify("[Fatal] boom"),
            (Severity::Fatal, "boom".to_string())
        );
        assert_eq!(
            Severity::classify("[WARN]  Heartbeat is taking too long"),
            (Severity::Warn, "Heartbeat is taking too long".to_string())
        );
        assert_eq!(
            Severity::classify("[ LOG ] Beat"),
            (Severity::Info, "Beat".to_string())
        );
        assert_eq!(
            Severity::classify("no marker"),
            (Severity::Info, "no marker".to_string())
        );
        // Error wins over warn
        assert_eq!(Severity::classify("[WARN] [ERROR] x").0, Severity::Error);
    }

    #[test]
    fn test_ascii_mode_renders_lines() {
        let (mut decoder, sink) = decoder();
        decoder.mode().set(InterpreterMode::Ascii);

        decoder.dispatch(0, &Frame::new(1, 6, -3).to_bytes());
        decoder.dispatch(0, &Frame::new(1, 7, 4).to_bytes());
        decoder.dispatch(0, &Frame::new(1, 8, 1).to_bytes());
        decoder.dispatch(0, &Frame::new(1, 99, 1).to_bytes());

        let lines = sink.0.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                (Severity::Error, "Motor stalled -3".to_string()),
                (Severity::Warn, "Slow loop 4".to_string()),
                (Severity::Info, "Plain text 1".to_string()),
            ]
        );
    }

    #[test]
    fn test_disabled_mode_renders_nothing_but_dispatches() {
        let (mut decoder, sink) = decoder();
        let matched = decoder.dispatch(0, &Frame::new(1, 5, 42).to_bytes());

        assert_eq!(matched, Some(Metric::Beat));
        assert_eq!(decoder.registry().value_of(Metric::Beat), 42);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_hex_and_raw_modes() {
        let (mut decoder, sink) = decoder();
        let raw = Frame::new(1, 5, 42).to_bytes();

        decoder.mode().set(InterpreterMode::Hex);
        decoder.dispatch(0, &raw);
        decoder.mode().set(InterpreterMode::Raw);
        decoder.dispatch(0, &raw);

        let lines = sink.0.lock().unwrap();
        assert_eq!(lines[0].1, "01 00 05 00 2A 00 00 00");
        assert_eq!(lines[1].1, "1 5 42");
    }

    #[test]
    fn test_cutoff_chunk_reports_once() {
        let (mut decoder, sink) = decoder();
        let mut chunk = Vec::new();
        for v in 0..3 {
            chunk.extend_from_slice(&Frame::new(1, 5, v).to_bytes());
        }
        chunk.extend_from_slice(&[1, 2, 3]);

        let mut seen = 0;
        let report = decoder.process_chunk(0, &chunk, |_| seen += 1);

        assert_eq!(report, ChunkReport { frames: 3, dropped: 3 });
        assert_eq!(seen, 3);
        assert_eq!(decoder.registry().value_of(Metric::Beat), 2);
        let lines = sink.0.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, Severity::Warn);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("ASCII".parse::<InterpreterMode>().unwrap(), InterpreterMode::Ascii);
        assert_eq!("off".parse::<InterpreterMode>().unwrap(), InterpreterMode::Disabled);
        assert!("binary".parse::<InterpreterMode>().is_err());
    }
}
