//! Logging configuration
//!
//! Per-component log levels and output destinations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for daily JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include file location in console logs
    pub include_file_location: bool,

    /// Level for the search itself; `trace` logs every Powell iteration
    pub optimizer_level: String,

    /// Level for stack loading and export
    pub io_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            optimizer_level: "info".to_string(),
            io_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose logging with file output under `logs/`
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            console_output: true,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            optimizer_level: "trace".to_string(),
            io_level: "debug".to_string(),
        }
    }

    /// File-only logging of warnings and run summaries
    pub fn production() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: false,
            log_directory: Some(PathBuf::from("/var/log/projection-alignment")),
            include_file_location: false,
            optimizer_level: "info".to_string(),
            io_level: "warn".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, level) in [
            ("global_level", &self.global_level),
            ("optimizer_level", &self.optimizer_level),
            ("io_level", &self.io_level),
        ] {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    /// Get the effective log level for a specific component
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "optimizer" | "algorithms" => &self.optimizer_level,
            "io" | "export" => &self.io_level,
            _ => &self.global_level,
        }
    }

    /// `EnvFilter` directives for this crate's modules.
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        format!(
            "{krate}={global},{krate}::algorithms={optimizer},{krate}::session={optimizer},{krate}::io={io},{krate}::data::loader={io}",
            krate = krate,
            global = self.global_level,
            optimizer = self.get_component_level("optimizer"),
            io = self.get_component_level("io"),
        )
    }
}
