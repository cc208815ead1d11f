//! Runtime configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `CUSTODY_*` environment variables (nested keys use `__`, e.g.
//! `CUSTODY_AUDIT__LOG_PATH`). Command-line flags are applied on top by the
//! binary.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CustodyError, Result};

/// File picked up when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "custody.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Remove an existing database before collecting. Keys live only for one
    /// run, so records left by an earlier run can never verify.
    #[serde(default = "default_true")]
    pub reset_database: bool,
    #[serde(default = "default_collectors")]
    pub collectors: usize,
    #[serde(default = "default_devices")]
    pub devices: usize,
    #[serde(default = "default_events_per_device")]
    pub events_per_device: usize,
    #[serde(default)]
    pub device_seed: u64,
    #[serde(default = "default_verify_workers")]
    pub verify_workers: usize,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_audit_log_path")]
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_csv_path")]
    pub csv_path: PathBuf,
    #[serde(default = "default_txt_path")]
    pub txt_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("forensic.db")
}

fn default_true() -> bool {
    true
}

fn default_collectors() -> usize {
    1
}

fn default_devices() -> usize {
    10
}

fn default_events_per_device() -> usize {
    5
}

fn default_verify_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("audit_log.txt")
}

fn default_csv_path() -> PathBuf {
    PathBuf::from("verify_summary.csv")
}

fn default_txt_path() -> PathBuf {
    PathBuf::from("verify_summary.txt")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: default_audit_log_path(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            csv_path: default_csv_path(),
            txt_path: default_txt_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration. An explicit `path` must exist; otherwise
    /// [`DEFAULT_CONFIG_FILE`] is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::new(&path.to_string_lossy(), FileFormat::Toml).required(true),
            None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
        };

        let config: AppConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("CUSTODY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.collectors == 0 {
            return Err(CustodyError::ConfigError(
                "at least one collector is required".to_string(),
            ));
        }
        if self.devices == 0 {
            return Err(CustodyError::ConfigError(
                "at least one device is required".to_string(),
            ));
        }
        if self.verify_workers == 0 {
            return Err(CustodyError::ConfigError(
                "verify_workers must be positive".to_string(),
            ));
        }

        let paths = [
            ("database_path", &self.database_path),
            ("audit.log_path", &self.audit.log_path),
            ("report.csv_path", &self.report.csv_path),
            ("report.txt_path", &self.report.txt_path),
        ];
        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                return Err(CustodyError::ConfigError(format!("{} must not be empty", name)));
            }
        }

        Ok(())
    }

    /// Names of the configured collectors: `collector-01`, `collector-02`, ...
    pub fn collector_ids(&self) -> Vec<String> {
        (1..=self.collectors)
            .map(|i| format!("collector-{:02}", i))
            .collect()
    }

    pub fn total_events(&self) -> usize {
        self.devices * self.events_per_device
    }
}
