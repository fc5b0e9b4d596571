//! Dispatch task
//!
//! Single consumer of the session queue. Owns the [`WireDecoder`] and is the
//! only code that writes the session log.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::datalog::LogWriter;
use crate::protocol::{LogSink, Severity, WireDecoder};

/// Work item on the session queue
#[derive(Debug)]
pub(crate) enum DispatchMessage {
    /// A received chunk and its arrival time in epoch milliseconds
    Payload { timestamp: i64, bytes: Vec<u8> },
    /// Close the current log and start one embedding this key map JSON
    NewLog(String),
    /// Close the current log
    CloseLog,
    /// Flush the log and signal once everything queued before was handled
    Sync(oneshot::Sender<()>),
}

/// Sink forwarding interpreted lines to the user's sink and the session text log
pub(crate) struct SessionSink {
    inner: Arc<dyn LogSink>,
    writer: Arc<Mutex<LogWriter>>,
}

impl SessionSink {
    pub(crate) fn new(inner: Arc<dyn LogSink>, writer: Arc<Mutex<LogWriter>>) -> Self {
        Self { inner, writer }
    }
}

impl LogSink for SessionSink {
    fn log(&self, severity: Severity, line: &str) {
        self.inner.log(severity, line);
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.write_text(&format!("[{severity}] {line}")) {
            warn!(error = %e, "failed to write session text log");
        }
    }
}

pub(crate) struct DispatchLoop {
    pub(crate) decoder: WireDecoder,
    pub(crate) writer: Arc<Mutex<LogWriter>>,
    pub(crate) rx: mpsc::UnboundedReceiver<DispatchMessage>,
    pub(crate) cancel: CancellationToken,
}

impl DispatchLoop {
    /// Run until cancelled or every sender is gone
    pub(crate) async fn run(mut self) {
        debug!("dispatch loop started");
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                message = self.rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
            }
        }

        if let Err(e) = self.lock_writer().close() {
            warn!(error = %e, "failed to close session log");
        }
        debug!("dispatch loop stopped");
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, LogWriter> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&mut self, message: DispatchMessage) {
        match message {
            DispatchMessage::Payload { timestamp, bytes } => {
                let writer = &self.writer;
                let mut failed = false;
                self.decoder.process_chunk(timestamp, &bytes, |raw| {
                    let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Err(e) = writer.append_record(timestamp, raw) {
                        if !failed {
                            warn!(error = %e, "failed to append to session log");
                        }
                        failed = true;
                    }
                });
            }
            DispatchMessage::NewLog(raw) => {
                if let Err(e) = self.lock_writer().open_log(&raw) {
                    warn!(error = %e, "failed to open session log");
                }
            }
            DispatchMessage::CloseLog => {
                if let Err(e) = self.lock_writer().close() {
                    warn!(error = %e, "failed to close session log");
                }
            }
            DispatchMessage::Sync(done) => {
                if let Err(e) = self.lock_writer().flush() {
                    warn!(error = %e, "failed to flush session log");
                }
                let _ = done.send(());
            }
        }
    }
}
