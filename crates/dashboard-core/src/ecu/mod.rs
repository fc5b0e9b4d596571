//! ECU Session
//!
//! [`Ecu`] ties the pieces of a live connection together: the transport
//! callback enqueues received chunks, one spawned dispatch task decodes them
//! in arrival order, updates the registry and the vehicle state and appends
//! every frame to the session log.
//!
//! Enqueueing never blocks and there is no backpressure. Key map changes are
//! picked up by the dispatch task before the next chunk.

mod dispatch;
mod error;

pub use error::EcuError;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DashboardConfig;
use crate::datalog::LogWriter;
use crate::keymap::{KeyMap, LoadOutcome};
use crate::observer::SubscriptionId;
use crate::protocol::{
    Command, InterpreterMode, LogSink, ProtocolError, SharedMode, Transport, WireDecoder,
};
use crate::registry::{MessageRegistry, MetricTable};
use crate::state::{FaultEvent, StateTracker, VehicleState};
use dispatch::{DispatchLoop, DispatchMessage, SessionSink};

/// Rate limit for the "no map" warning: first drop, then every Nth
struct NoMapWarning {
    dropped: AtomicU32,
    interval: u32,
}

impl NoMapWarning {
    fn new(interval: u32) -> Self {
        Self {
            dropped: AtomicU32::new(0),
            interval: interval.max(1),
        }
    }

    /// Count one dropped chunk; true when it should be reported
    fn record(&self) -> bool {
        self.dropped.fetch_add(1, Ordering::Relaxed) % self.interval == 0
    }
}

/// A running ECU session
pub struct Ecu {
    key_map: Arc<KeyMap>,
    metrics: Arc<MetricTable>,
    state: Arc<StateTracker>,
    mode: SharedMode,
    tx: mpsc::UnboundedSender<DispatchMessage>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    transport: Option<Arc<dyn Transport>>,
    no_map: NoMapWarning,
    key_map_listener: SubscriptionId,
}

impl Ecu {
    /// Spawn the dispatch task for a new session.
    ///
    /// Must be called from within a tokio runtime. If `key_map` is already
    /// loaded a session log is opened right away; every later successful
    /// load opens a fresh one embedding the new JSON.
    pub fn start(config: &DashboardConfig, key_map: Arc<KeyMap>, sink: Arc<dyn LogSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let registry = MessageRegistry::with_fault_messages(config.fault_messages.clone());
        let metrics = registry.handle();
        let state = Arc::new(StateTracker::new());
        let mode = SharedMode::new(config.interpreter_mode);
        let writer = Arc::new(Mutex::new(LogWriter::new(&config.log_dir)));

        let sink: Arc<dyn LogSink> = Arc::new(SessionSink::new(sink, Arc::clone(&writer)));
        let decoder = WireDecoder::new(Arc::clone(&key_map), registry, Arc::clone(&state), sink)
            .with_mode(mode.clone());

        if let Some(raw) = key_map.raw_json() {
            let _ = tx.send(DispatchMessage::NewLog(raw));
        }

        let last_generation = AtomicU64::new(key_map.generation());
        let listener_tx = tx.clone();
        let key_map_listener = key_map.add_status_listener(move |status| {
            let Some(raw) = status.raw.as_ref().filter(|_| status.loaded) else {
                return;
            };
            if last_generation.swap(status.generation, Ordering::AcqRel) != status.generation {
                let _ = listener_tx.send(DispatchMessage::NewLog(raw.clone()));
            }
        });

        let task = tokio::spawn(
            DispatchLoop {
                decoder,
                writer,
                rx,
                cancel: cancel.clone(),
            }
            .run(),
        );

        info!(log_dir = %config.log_dir.display(), "ECU session started");

        Self {
            key_map,
            metrics,
            state,
            mode,
            tx,
            cancel,
            task: Mutex::new(Some(task)),
            transport: None,
            no_map: NoMapWarning::new(config.no_map_warning_interval),
            key_map_listener,
        }
    }

    /// Route commands through `transport`
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Producer entry point for bytes read from the ECU.
    ///
    /// Chunks arriving while no key map is loaded are dropped. Returns whether
    /// the chunk was queued.
    pub fn receive_data(&self, bytes: &[u8]) -> bool {
        if !self.key_map.is_loaded() {
            if self.no_map.record() {
                warn!("No JSON map loaded");
            }
            return false;
        }
        self.post_payload(bytes)
    }

    /// Queue a chunk stamped with the current time
    pub fn post_payload(&self, bytes: &[u8]) -> bool {
        self.post_payload_at(chrono::Utc::now().timestamp_millis(), bytes)
    }

    /// Queue a chunk with an explicit arrival time in epoch milliseconds
    pub fn post_payload_at(&self, timestamp: i64, bytes: &[u8]) -> bool {
        self.tx
            .send(DispatchMessage::Payload {
                timestamp,
                bytes: bytes.to_vec(),
            })
            .is_ok()
    }

    /// Switch how frames are rendered; applies from the next frame
    pub fn set_interpreter_mode(&self, mode: InterpreterMode) {
        debug!(?mode, "interpreter mode changed");
        self.mode.set(mode);
    }

    /// Current interpreter mode
    pub fn interpreter_mode(&self) -> InterpreterMode {
        self.mode.get()
    }

    /// Subscribe to vehicle state changes
    pub fn on_state_change<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&VehicleState) + Send + Sync + 'static,
    {
        self.state.on_state_change(listener)
    }

    /// Subscribe to fault frames
    pub fn on_fault<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&FaultEvent) + Send + Sync + 'static,
    {
        self.state.on_fault(listener)
    }

    /// Remove a state or fault subscription
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.unsubscribe(id)
    }

    /// Current vehicle state
    pub fn state(&self) -> VehicleState {
        self.state.state()
    }

    /// Decoded values and their listeners
    pub fn metrics(&self) -> &Arc<MetricTable> {
        &self.metrics
    }

    /// The session's key map
    pub fn key_map(&self) -> &Arc<KeyMap> {
        &self.key_map
    }

    /// Send a command byte to the ECU
    pub fn issue_command(&self, command: Command) -> Result<(), EcuError> {
        debug!(command = command.name(), "issuing command");
        self.write(&command.to_bytes())
    }

    /// Write raw bytes to the ECU
    pub fn write(&self, data: &[u8]) -> Result<(), EcuError> {
        let transport = self
            .transport
            .as_ref()
            .filter(|t| t.is_open())
            .ok_or(ProtocolError::NotConnected)?;
        transport.write(data)?;
        Ok(())
    }

    /// Load a new key map; a new session log follows on success
    pub fn load_key_map(&self, raw: &str) -> Result<LoadOutcome, EcuError> {
        Ok(self.key_map.load(raw)?)
    }

    /// Start a new session log with the current key map
    pub fn new_log(&self) -> Result<(), EcuError> {
        let raw = self.key_map.raw_json().ok_or(EcuError::NoKeyMap)?;
        self.send(DispatchMessage::NewLog(raw))
    }

    /// Close the session log
    pub fn close_log(&self) -> Result<(), EcuError> {
        self.send(DispatchMessage::CloseLog)
    }

    /// Delete the key map and close the session log.
    ///
    /// Every resolution is dropped before the next chunk is dispatched.
    pub fn clear_key_map(&self) -> Result<(), EcuError> {
        self.key_map.clear()?;
        self.send(DispatchMessage::CloseLog)
    }

    /// Wait until everything queued so far has been dispatched and logged
    pub async fn sync(&self) -> Result<(), EcuError> {
        let (done, wait) = oneshot::channel();
        self.send(DispatchMessage::Sync(done))?;
        wait.await.map_err(|_| EcuError::SessionClosed)
    }

    /// Whether the dispatch task is still accepting work
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }

    /// Stop the dispatch task and close the session log.
    ///
    /// Chunks still queued are abandoned.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.key_map.remove_status_listener(self.key_map_listener);
        if let Some(transport) = &self.transport {
            transport.close();
        }

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "dispatch task ended abnormally");
            }
        }
        info!("ECU session stopped");
    }

    fn send(&self, message: DispatchMessage) -> Result<(), EcuError> {
        self.tx.send(message).map_err(|_| EcuError::SessionClosed)
    }
}

impl Drop for Ecu {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.key_map.remove_status_listener(self.key_map_listener);
    }
}

impl std::fmt::Debug for Ecu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ecu")
            .field("state", &self.state())
            .field("mode", &self.mode.get())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Severity;
    use crate::registry::Metric;
    use std::sync::Mutex as StdMutex;

    const MAP: &str = r#"[{"[Front Teensy]":1},{"[ LOG ] Beat":5}]"#;

    #[derive(Default)]
    struct Lines(StdMutex<Vec<(Severity, String)>>);

    impl LogSink for Lines {
        fn log(&self, severity: Severity, line: &str) {
            self.0.lock().unwrap().push((severity, line.to_string()));
        }
    }

    #[derive(Default)]
    struct Loopback {
        open: std::sync::atomic::AtomicBool,
        written: StdMutex<Vec<u8>>,
    }

    impl Transport for Loopback {
        fn open(&self) -> Result<(), ProtocolError> {
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
        fn write(&self, data: &[u8]) -> Result<(), ProtocolError> {
            self.written.lock().unwrap().extend_from_slice(data);
            Ok(())
        }
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
        fn is_attached(&self) -> bool {
            true
        }
    }

    fn config(dir: &std::path::Path) -> DashboardConfig {
        DashboardConfig {
            log_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_map_warning_rate() {
        let warning = NoMapWarning::new(8);
        let reported: Vec<bool> = (0..17).map(|_| warning.record()).collect();
        let hits: Vec<usize> = reported
            .iter()
            .enumerate()
            .filter(|(_, r)| **r)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(hits, vec![0, 8, 16]);
    }

    #[tokio::test]
    async fn test_receive_without_map_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let ecu = Ecu::start(
            &config(dir.path()),
            Arc::new(KeyMap::unpersisted()),
            Arc::new(Lines::default()),
        );
        assert!(!ecu.receive_data(&[1, 0, 5, 0, 42, 0, 0, 0]));
        ecu.shutdown().await;
    }

    #[tokio::test]
    async fn test_ascii_lines_reach_sink() {
        let dir = tempfile::tempdir().unwrap();
        let key_map = Arc::new(KeyMap::unpersisted());
        key_map.load(MAP).unwrap();
        let lines = Arc::new(Lines::default());
        let ecu = Ecu::start(&config(dir.path()), key_map, lines.clone());

        assert!(ecu.receive_data(&[1, 0, 5, 0, 42, 0, 0, 0]));
        ecu.sync().await.unwrap();

        assert_eq!(ecu.metrics().value_of(Metric::Beat), 42);
        assert_eq!(
            lines.0.lock().unwrap().as_slice(),
            &[(Severity::Info, "Beat 42".to_string())]
        );

        ecu.set_interpreter_mode(InterpreterMode::Disabled);
        ecu.receive_data(&[1, 0, 5, 0, 43, 0, 0, 0]);
        ecu.sync().await.unwrap();
        assert_eq!(lines.0.lock().unwrap().len(), 1);
        assert_eq!(ecu.metrics().value_of(Metric::Beat), 43);

        ecu.shutdown().await;
        assert!(!ecu.is_running());
        assert!(matches!(ecu.sync().await, Err(EcuError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_commands_need_open_transport() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(Loopback::default());
        let ecu = Ecu::start(
            &config(dir.path()),
            Arc::new(KeyMap::unpersisted()),
            Arc::new(Lines::default()),
        )
        .with_transport(transport.clone());

        assert!(matches!(
            ecu.issue_command(Command::ClearFault),
            Err(EcuError::Protocol(ProtocolError::NotConnected))
        ));

        transport.open().unwrap();
        ecu.issue_command(Command::ClearFault).unwrap();
        ecu.issue_command(Command::Charge).unwrap();
        assert_eq!(transport.written.lock().unwrap().as_slice(), &[45, 123]);

        ecu.shutdown().await;
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_new_log_requires_map() {
        let dir = tempfile::tempdir().unwrap();
        let ecu = Ecu::start(
            &config(dir.path()),
            Arc::new(KeyMap::unpersisted()),
            Arc::new(Lines::default()),
        );
        assert!(matches!(ecu.new_log(), Err(EcuError::NoKeyMap)));
        ecu.shutdown().await;
    }
}
