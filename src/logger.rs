//! Thread-safe transaction logger: a CSV file sink with size-based rotation
//! plus a colorized console formatter. These are two independent outputs —
//! every decision point the proxy reaches emits exactly one [`LogRecord`] to
//! each.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use colored::Colorize;
use parking_lot::Mutex;

use crate::error::Result;

pub const CSV_HEADER: &str = "timestamp,transaction_id,source_ip,source_port,function_code,function_name,action,reason,unit_id,data_length";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    Allow,
    Block,
    Error,
}

impl LogAction {
    fn as_str(self) -> &'static str {
        match self {
            LogAction::Allow => "ALLOW",
            LogAction::Block => "BLOCK",
            LogAction::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub transaction_id: u16,
    pub source_ip: String,
    pub source_port: u16,
    pub function_code: u8,
    pub function_name: &'static str,
    pub action: LogAction,
    pub reason: String,
    pub unit_id: u8,
    pub data_length: usize,
}

impl LogRecord {
    fn sanitized_reason(&self) -> String {
        // Reason fields must not contain commas; substitute spaces.
        self.reason.replace(',', " ")
    }

    fn to_csv_line(&self) -> String {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
        format!(
            "{timestamp},{},{},{},{},{},{},{},{},{}",
            self.transaction_id,
            self.source_ip,
            self.source_port,
            self.function_code,
            self.function_name,
            self.action.as_str(),
            self.sanitized_reason(),
            self.unit_id,
            self.data_length,
        )
    }

    fn to_console_line(&self) -> String {
        let colored_action = match self.action {
            LogAction::Allow => self.action.as_str().green(),
            LogAction::Block => self.action.as_str().red(),
            LogAction::Error => self.action.as_str().yellow(),
        };
        format!(
            "{} {}:{} fc=0x{:02X} ({}) unit={} -- {}",
            colored_action,
            self.source_ip,
            self.source_port,
            self.function_code,
            self.function_name,
            self.unit_id,
            self.reason,
        )
    }
}

struct RotatingFile {
    path: PathBuf,
    file: File,
    size: u64,
    rotate_bytes: u64,
    backup_count: u32,
}

impl RotatingFile {
    fn open(path: &Path, rotate_bytes: u64, backup_count: u32) -> Result<Self> {
        let existed = path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();
        if !existed || size == 0 {
            writeln!(file, "{CSV_HEADER}")?;
        }
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
            rotate_bytes,
            backup_count,
        })
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        if self.size >= self.rotate_bytes {
            self.rotate()?;
        }
        writeln!(self.file, "{line}")?;
        self.size += line.len() as u64 + 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        // Oldest backup is pruned; remaining backups shift up one suffix.
        let oldest = self.backup_path(self.backup_count);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.backup_count).rev() {
            let src = self.backup_path(n);
            if src.exists() {
                fs::rename(&src, self.backup_path(n + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(self.file, "{CSV_HEADER}")?;
        self.size = self.file.metadata()?.len();
        Ok(())
    }

    fn backup_path(&self, n: u32) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("modbus_firewall.log.csv")
            .to_string();
        name.push_str(&format!(".{n}"));
        self.path.with_file_name(name)
    }
}

/// Owns the log sink. A single mutex serializes the write call so concurrent
/// connection proxies never interleave lines byte-wise; the lock is held
/// only across one formatted write, never across I/O that could block
/// indefinitely.
pub struct TransactionLogger {
    file: Mutex<RotatingFile>,
    console: bool,
}

impl TransactionLogger {
    pub fn new(path: &Path, rotate_bytes: u64, backup_count: u32, console: bool) -> Result<Self> {
        Ok(Self {
            file: Mutex::new(RotatingFile::open(path, rotate_bytes, backup_count)?),
            console,
        })
    }

    pub fn log(&self, record: &LogRecord) {
        if self.console {
            println!("{}", record.to_console_line());
        }
        let line = record.to_csv_line();
        let mut file = self.file.lock();
        if let Err(e) = file.write_line(&line) {
            tracing::error!("failed to write transaction log: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(action: LogAction, reason: &str) -> LogRecord {
        LogRecord {
            transaction_id: 1,
            source_ip: "10.0.0.1".to_string(),
            source_port: 5000,
            function_code: 0x03,
            function_name: "ReadHoldingRegisters",
            action,
            reason: reason.to_string(),
            unit_id: 1,
            data_length: 4,
        }
    }

    #[test]
    fn writes_header_once_and_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let logger = TransactionLogger::new(&path, 10 * 1024 * 1024, 5, false).unwrap();

        logger.log(&record(LogAction::Allow, "allowed"));
        logger.log(&record(LogAction::Block, "blocked, by policy"));

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines.len(), 3);
        // A comma in the reason must not introduce an extra column.
        assert_eq!(lines[2].split(',').count(), 10, "line: {}", lines[2]);
    }

    #[test]
    fn rotates_when_size_threshold_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let logger = TransactionLogger::new(&path, 64, 2, false).unwrap();

        for _ in 0..20 {
            logger.log(&record(LogAction::Allow, "allowed"));
        }

        assert!(dir.path().join("log.csv.1").exists());
    }

    #[test]
    fn backup_count_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let logger = TransactionLogger::new(&path, 32, 2, false).unwrap();

        for _ in 0..200 {
            logger.log(&record(LogAction::Allow, "allowed"));
        }

        assert!(!dir.path().join("log.csv.3").exists());
    }
}
