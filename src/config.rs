//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.packscan.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::report::ReportOptions;
use crate::scanner::ScanOptions;

pub const DEFAULT_CONFIG_FILE: &str = ".packscan.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Scan settings.
    #[serde(default)]
    pub scan: ScanConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "packscan_report.md".to_string()
}

/// Scan pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// How long filter queries may run per asset.
    #[serde(default = "default_filter_timeout")]
    pub filter_timeout_secs: u64,

    /// How long the resolved job may run per asset.
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,

    /// Assets handled per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Version tag stored with resolved plans; a change forces re-resolution.
    #[serde(default = "default_resolved_version")]
    pub resolved_version: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            filter_timeout_secs: default_filter_timeout(),
            execution_timeout_secs: default_execution_timeout(),
            batch_size: default_batch_size(),
            resolved_version: default_resolved_version(),
        }
    }
}

fn default_filter_timeout() -> u64 {
    5
}

fn default_execution_timeout() -> u64 {
    10
}

fn default_batch_size() -> usize {
    100
}

fn default_resolved_version() -> String {
    "v2".to_string()
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Output format: `markdown` or `json`.
    #[serde(default = "default_format")]
    pub format: String,

    /// Include collected datapoints in the report.
    #[serde(default = "default_true")]
    pub include_data: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            include_data: true,
        }
    }
}

fn default_format() -> String {
    "markdown".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(format) = args.format {
            self.report.format = format.as_str().to_string();
        }
        if let Some(secs) = args.filter_timeout {
            self.scan.filter_timeout_secs = secs;
        }
        if let Some(secs) = args.timeout {
            self.scan.execution_timeout_secs = secs;
        }
        if args.no_data {
            self.report.include_data = false;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            include_data: self.report.include_data,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

impl From<&Config> for ScanOptions {
    fn from(config: &Config) -> Self {
        Self {
            filter_timeout: Duration::from_secs(config.scan.filter_timeout_secs),
            execution_timeout: Duration::from_secs(config.scan.execution_timeout_secs),
            batch_size: config.scan.batch_size,
            resolved_version: config.scan.resolved_version.clone(),
            show_progress: false,
        }
    }
}
