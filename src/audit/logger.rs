//! Audit Logger
//!
//! Appends run entries to a plain text file. Existing lines are never
//! rewritten.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::entry::RunEntry;
use crate::error::{CustodyError, Result};

#[derive(Clone)]
pub struct AuditLogger {
    log_path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl AuditLogger {
    pub fn new(log_path: impl Into<PathBuf>) -> Result<Self> {
        let log_path = log_path.into();

        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        info!("Audit log opened at {}", log_path.display());
        Ok(Self {
            log_path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub async fn append(&self, entry: &RunEntry) -> Result<()> {
        let mut file = self.file.lock().await;
        writeln!(file, "{}", entry)?;
        file.flush()?;
        file.sync_data()?;

        debug!("Appended audit entry: {}", entry);
        Ok(())
    }

    /// Read every entry back, skipping blank lines.
    pub fn entries(&self) -> Result<Vec<RunEntry>> {
        let reader = BufReader::new(File::open(&self.log_path)?);
        let mut entries = Vec::new();

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = line.parse::<RunEntry>().map_err(|e| {
                CustodyError::validation(format!("audit line {}: {}", number + 1, e))
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }
}
