//! Stored sessions
//!
//! A session is every file in the log directory sharing one epoch-seconds stem.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};

use super::format::{BINARY_EXTENSION, TEXT_EXTENSION};

/// Files of one recorded session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSession {
    epoch_seconds: i64,
    files: Vec<PathBuf>,
}

impl LogSession {
    /// Session start, epoch seconds
    pub fn epoch_seconds(&self) -> i64 {
        self.epoch_seconds
    }

    /// All files of the session
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn with_extension(&self, extension: &str) -> Option<&Path> {
        self.files
            .iter()
            .find(|p| p.extension().and_then(|e| e.to_str()) == Some(extension))
            .map(PathBuf::as_path)
    }

    /// Binary frame log
    pub fn binary_file(&self) -> Option<&Path> {
        self.with_extension(BINARY_EXTENSION)
    }

    /// Interpreted text log
    pub fn text_file(&self) -> Option<&Path> {
        self.with_extension(TEXT_EXTENSION)
    }

    /// Combined size of the session's files
    pub fn total_bytes(&self) -> u64 {
        self.files
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    /// Local start time, `YYYY-MM-DD HH:MM:SS`
    pub fn date(&self) -> String {
        match Local.timestamp_opt(self.epoch_seconds, 0).single() {
            Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => self.epoch_seconds.to_string(),
        }
    }

    /// Name shown in session lists: date and size
    pub fn formatted_name(&self) -> String {
        format!("{} - {}", self.date(), human_readable_bytes(self.total_bytes()))
    }

    /// Remove every file of the session
    pub fn delete(&self) -> io::Result<()> {
        for file in &self.files {
            match fs::remove_file(file) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Sessions stored under `dir`, newest first.
///
/// A missing directory has no sessions. Files whose stem is not an epoch are
/// ignored.
pub fn list_sessions(dir: impl AsRef<Path>) -> io::Result<Vec<LogSession>> {
    let entries = match fs::read_dir(dir.as_ref()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut grouped: BTreeMap<i64, Vec<PathBuf>> = BTreeMap::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(epoch) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<i64>().ok())
        else {
            continue;
        };
        grouped.entry(epoch).or_default().push(path);
    }

    Ok(grouped
        .into_iter()
        .rev()
        .map(|(epoch_seconds, mut files)| {
            files.sort();
            LogSession {
                epoch_seconds,
                files,
            }
        })
        .collect())
}

/// Size with a binary unit, one decimal above bytes
pub fn human_readable_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_readable_bytes() {
        assert_eq!(human_readable_bytes(0), "0 B");
        assert_eq!(human_readable_bytes(1023), "1023 B");
        assert_eq!(human_readable_bytes(1024), "1.0 KB");
        assert_eq!(human_readable_bytes(1536), "1.5 KB");
        assert_eq!(human_readable_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_list_sessions_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("100.bin"), [0u8; 10]).unwrap();
        fs::write(dir.path().join("100.txt"), b"hi").unwrap();
        fs::write(dir.path().join("200.bin"), [0u8; 4]).unwrap();
        fs::write(dir.path().join("notes.md"), b"x").unwrap();

        let sessions = list_sessions(dir.path()).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].epoch_seconds(), 200);
        assert_eq!(sessions[1].epoch_seconds(), 100);
        assert_eq!(sessions[1].total_bytes(), 12);
        assert!(sessions[1].text_file().is_some());
        assert!(sessions[0].text_file().is_none());
        assert!(sessions[1].formatted_name().ends_with(" - 12 B"));
    }

    #[test]
    fn test_delete_session() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("100.bin"), [0u8; 10]).unwrap();
        fs::write(dir.path().join("100.txt"), b"hi").unwrap();

        let sessions = list_sessions(dir.path()).unwrap();
        sessions[0].delete().unwrap();
        assert!(list_sessions(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_sessions(dir.path().join("nope")).unwrap().is_empty());
    }
}
