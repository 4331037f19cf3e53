//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// packscan - run query packs against an asset inventory
///
/// Discovers the assets of an inventory, decides which query packs apply
/// to each of them and collects the results into one report.
///
/// Examples:
///   packscan --inventory inventory.toml --bundle packs/
///   packscan --job job.toml --format json --output report.json
///   packscan --inventory inventory.toml --bundle packs/ --querypack acme/linux
///   packscan --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Job file holding inventory, bundle, pack filters and props
    ///
    /// Flags given next to it extend or override its contents.
    #[arg(short, long, value_name = "FILE")]
    pub job: Option<PathBuf>,

    /// Inventory file (TOML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub inventory: Option<PathBuf>,

    /// Bundle file or directory of bundle files (repeatable)
    #[arg(short, long, value_name = "PATH")]
    pub bundle: Vec<PathBuf>,

    /// Only run these query packs: MRN, uid or namespace/uid (repeatable)
    #[arg(long, value_name = "PACK")]
    pub querypack: Vec<String>,

    /// Property passed to every query as props.<key> (repeatable)
    #[arg(long, value_name = "KEY=VALUE", value_parser = parse_prop)]
    pub props: Vec<(String, String)>,

    /// Output file path for the report
    ///
    /// Use - to print the report to stdout.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Seconds to wait for filter queries per asset
    #[arg(long, value_name = "SECS")]
    pub filter_timeout: Option<u64>,

    /// Seconds to wait for query execution per asset
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Leave collected datapoints out of the report
    #[arg(long)]
    pub no_data: bool,

    /// Path to configuration file
    ///
    /// If not specified, looks for .packscan.toml in the current directory
    #[arg(short, long, value_name = "FILE", env = "PACKSCAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Don't draw progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Generate a default .packscan.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
        }
    }
}

fn parse_prop(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.job.is_none() && self.inventory.is_none() {
            return Err("Either --job or --inventory is required".to_string());
        }
        if self.job.is_none() && self.bundle.is_empty() {
            return Err("At least one --bundle is required without --job".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        for (flag, value) in [
            ("--timeout", self.timeout),
            ("--filter-timeout", self.filter_timeout),
        ] {
            if value == Some(0) {
                return Err(format!("{} must be at least 1 second", flag));
            }
        }

        let missing = self
            .job
            .iter()
            .chain(self.inventory.iter())
            .chain(self.bundle.iter())
            .find(|p| !p.exists());
        if let Some(path) = missing {
            return Err(format!("Path does not exist: {}", path.display()));
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Progress bars would interleave with log lines, so they only show at
    /// the default verbosity.
    pub fn show_progress(&self) -> bool {
        !(self.no_progress || self.quiet || self.verbose)
    }

    pub fn props_map(&self) -> BTreeMap<String, String> {
        self.props.iter().cloned().collect()
    }
}
