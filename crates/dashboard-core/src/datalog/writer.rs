//! Session log writer
//!
//! Writes the binary frame log and the interpreted text log of one session.
//! Owned by the dispatch task.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::format::{encode_header, encode_record, BINARY_EXTENSION, TEXT_EXTENSION};
use crate::protocol::FRAME_SIZE;

/// Writer for the current session's files
pub struct LogWriter {
    dir: PathBuf,
    /// Session start, epoch seconds
    session: Option<i64>,
    binary: Option<BufWriter<File>>,
    text: Option<BufWriter<File>>,
    records: u64,
}

impl LogWriter {
    /// Writer storing sessions under `dir`; nothing is created until needed
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            session: None,
            binary: None,
            text: None,
            records: 0,
        }
    }

    /// Directory sessions are written to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start of the current session, epoch seconds
    pub fn session(&self) -> Option<i64> {
        self.session
    }

    /// Path of the open binary log
    pub fn active_file(&self) -> Option<PathBuf> {
        self.binary
            .as_ref()
            .and(self.session)
            .map(|s| self.session_path(s, BINARY_EXTENSION))
    }

    /// Records appended since the log was opened
    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Whether a binary log is open
    pub fn is_open(&self) -> bool {
        self.binary.is_some()
    }

    fn session_path(&self, session: i64, extension: &str) -> PathBuf {
        self.dir.join(format!("{session}.{extension}"))
    }

    /// Pick a session name that no existing binary log uses
    fn next_session(&self) -> i64 {
        let mut session = chrono::Utc::now().timestamp();
        if let Some(previous) = self.session {
            session = session.max(previous + 1);
        }
        while self.session_path(session, BINARY_EXTENSION).exists() {
            session += 1;
        }
        session
    }

    /// Close the current session and start a new binary log with `raw_json`
    /// as its header.
    pub fn open_log(&mut self, raw_json: &str) -> io::Result<PathBuf> {
        self.close()?;
        fs::create_dir_all(&self.dir)?;

        let session = self.next_session();
        let path = self.session_path(session, BINARY_EXTENSION);
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(&encode_header(raw_json))?;
        writer.flush()?;

        info!(path = %path.display(), "opened session log");
        self.session = Some(session);
        self.binary = Some(writer);
        self.records = 0;
        Ok(path)
    }

    /// Append bytes verbatim to the binary log.
    ///
    /// Does nothing while no log is open.
    pub fn append_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.binary.as_mut() {
            Some(writer) => writer.write_all(bytes),
            None => Ok(()),
        }
    }

    /// Append one timestamped frame record
    pub fn append_record(&mut self, timestamp: i64, frame: &[u8; FRAME_SIZE]) -> io::Result<()> {
        if self.binary.is_none() {
            return Ok(());
        }
        self.append_frame(&encode_record(timestamp, frame))?;
        self.records += 1;
        Ok(())
    }

    /// Append one line to the session text log, opening it on first use
    pub fn write_text(&mut self, line: &str) -> io::Result<()> {
        if self.text.is_none() {
            fs::create_dir_all(&self.dir)?;
            let session = match self.session {
                Some(session) => session,
                None => {
                    let session = self.next_session();
                    self.session = Some(session);
                    session
                }
            };
            let path = self.session_path(session, TEXT_EXTENSION);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!(path = %path.display(), "opened session text log");
            self.text = Some(BufWriter::new(file));
        }

        if let Some(writer) = self.text.as_mut() {
            writer.write_all(line.as_bytes())?;
            if !line.ends_with('\n') {
                writer.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    /// Flush both files
    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(writer) = self.binary.as_mut() {
            writer.flush()?;
        }
        if let Some(writer) = self.text.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Flush and close the session's files
    pub fn close(&mut self) -> io::Result<()> {
        let result = self.flush();
        if self.binary.take().is_some() {
            info!(records = self.records, "closed session log");
        }
        self.text = None;
        result
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close session log");
        }
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("dir", &self.dir)
            .field("session", &self.session)
            .field("records", &self.records)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datalog::format::{LOG_MAP_END, LOG_MAP_START, RECORD_SIZE};

    #[test]
    fn test_open_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = LogWriter::new(dir.path());
        assert!(!writer.is_open());

        let path = writer.open_log("[{},{}]").unwrap();
        writer.append_record(1000, &[1, 0, 5, 0, 42, 0, 0, 0]).unwrap();
        writer.append_record(1001, &[1, 0, 5, 0, 43, 0, 0, 0]).unwrap();
        assert_eq!(writer.record_count(), 2);
        writer.close().unwrap();

        let data = std::fs::read(&path).unwrap();
        let header = format!("{LOG_MAP_START}[{{}},{{}}]\n{LOG_MAP_END}");
        assert!(data.starts_with(header.as_bytes()));
        assert_eq!(data.len(), header.len() + 2 * RECORD_SIZE);
    }

    #[test]
    fn test_append_without_log_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = LogWriter::new(dir.path().join("logs"));
        writer.append_record(1, &[0; 8]).unwrap();
        assert_eq!(writer.record_count(), 0);
        assert!(!dir.path().join("logs").exists());
    }

    #[test]
    fn test_new_log_gets_new_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = LogWriter::new(dir.path());
        let first = writer.open_log("[{},{}]").unwrap();
        let second = writer.open_log("[{},{}]").unwrap();
        assert_ne!(first, second);
        assert_eq!(writer.active_file(), Some(second));
    }

    #[test]
    fn test_text_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = LogWriter::new(dir.path());
        writer.open_log("[{},{}]").unwrap();
        writer.write_text("Beat 42").unwrap();
        writer.write_text("Beat 43\n").unwrap();
        let session = writer.session().unwrap();
        writer.close().unwrap();

        let text = std::fs::read_to_string(dir.path().join(format!("{session}.txt"))).unwrap();
        assert_eq!(text, "Beat 42\nBeat 43\n");
    }
}
