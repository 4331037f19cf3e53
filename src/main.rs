//! packscan - query pack scanner for asset inventories
//!
//! Discovers the assets of an inventory, matches them against the filters
//! of a bundle's query packs, runs the applicable queries and reports the
//! collected data.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (invalid job, config, unreadable files, etc.)
//!   2 - Every scanned asset failed

mod cli;
mod config;
mod error;
mod executor;
mod models;
mod mrn;
mod progress;
mod provider;
mod query;
mod report;
mod scanner;
mod store;
#[cfg(test)]
mod testutil;

use anyhow::{Context, Result};
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use models::{Bundle, Inventory, Job, ReportCollection};
use provider::StaticProvider;
use query::SimpleCompiler;
use scanner::{LocalScanner, ScanOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("packscan v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_scan(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Scan failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .packscan.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize timeouts, report format and output path.");
    Ok(())
}

/// Logs go to stderr so a report printed to stdout stays clean. `RUST_LOG`
/// wins over the verbosity flags when set.
fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level().to_string().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete scan workflow. Returns exit code (0 or 2).
async fn run_scan(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let job = build_job(&args)?;

    let mut options = ScanOptions::from(&config);
    options.show_progress = args.show_progress();
    let scanner = LocalScanner::new(
        Arc::new(StaticProvider::new()),
        Arc::new(SimpleCompiler::new()),
        options,
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current asset");
            ctrl_c.cancel();
        }
    });

    let rc = scanner
        .run_incognito(&job, &cancel)
        .await
        .context("Scan job failed")?;

    let output = config.general.output.as_str();
    let options = config.report_options();
    if output == "-" {
        let content = report::render(&rc, &config.report.format, options)?;
        println!("{}", content);
    } else {
        report::write_report(&rc, &config.report.format, options, Path::new(output))
            .with_context(|| format!("Failed to write report to {}", output))?;
        print_summary(&rc, start_time.elapsed().as_secs_f64());
        println!("\n✅ Scan complete! Report saved to: {}", output);
    }

    if rc.all_failed() {
        eprintln!("\n⛔ No asset could be scanned (exit code 2).");
        return Ok(2);
    }
    Ok(0)
}

fn print_summary(rc: &ReportCollection, duration: f64) {
    println!("\n📊 Scan Summary:");
    println!("   Assets: {}", rc.assets.len());
    println!("   Succeeded: {} | Failed: {}", rc.reports.len(), rc.errors.len());
    println!("   Duration: {:.1}s", duration);
}

/// Assembles the job from the job file and the input flags.
fn build_job(args: &Args) -> Result<Job> {
    let mut job = match args.job {
        Some(ref path) => {
            info!("Loading job from: {}", path.display());
            Job::from_file(path)?
        }
        None => Job::default(),
    };

    if let Some(ref path) = args.inventory {
        info!("Loading inventory from: {}", path.display());
        job.inventory = Some(Inventory::from_file(path)?);
    }

    if !args.bundle.is_empty() {
        let loaded = Bundle::from_paths(&args.bundle)?;
        info!("Loaded {} query pack(s)", loaded.packs.len());
        match job.bundle {
            Some(ref mut bundle) => bundle.add_bundle(loaded),
            None => job.bundle = Some(loaded),
        }
    }

    job.query_pack_filters.extend(args.querypack.iter().cloned());
    job.props.extend(args.props_map());
    Ok(job)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const INVENTORY: &str = r#"
[[assets]]
name = "web-1"

[[assets.connections]]
type = "static"

[assets.facts]
platform = { name = "debian" }
"#;

    const BUNDLE: &str = r#"
[[packs]]
uid = "linux"

[[packs.queries]]
uid = "os"
mql = "platform.name"
"#;

    #[test]
    fn test_build_job_merges_flags() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = dir.path().join("inventory.toml");
        let bundle = dir.path().join("bundle.toml");
        std::fs::write(&inventory, INVENTORY).unwrap();
        std::fs::write(&bundle, BUNDLE).unwrap();

        let args = Args::parse_from([
            "packscan",
            "--inventory",
            inventory.to_str().unwrap(),
            "--bundle",
            bundle.to_str().unwrap(),
            "--querypack",
            "linux",
            "--props",
            "owner=ops",
        ]);

        let job = build_job(&args).unwrap();
        assert_eq!(job.inventory.unwrap().assets.len(), 1);
        assert_eq!(job.bundle.unwrap().packs.len(), 1);
        assert_eq!(job.query_pack_filters, vec!["linux"]);
        assert_eq!(job.props.get("owner").map(String::as_str), Some("ops"));
    }

    #[test]
    fn test_scan_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = dir.path().join("inventory.toml");
        let bundle = dir.path().join("bundle.toml");
        std::fs::write(&inventory, INVENTORY).unwrap();
        std::fs::write(&bundle, BUNDLE).unwrap();

        let args = Args::parse_from([
            "packscan",
            "--inventory",
            inventory.to_str().unwrap(),
            "--bundle",
            bundle.to_str().unwrap(),
        ]);
        let job = build_job(&args).unwrap();

        let scanner = LocalScanner::new(
            Arc::new(StaticProvider::new()),
            Arc::new(SimpleCompiler::new()),
            ScanOptions::default(),
        );
        let rc = tokio_test::block_on(scanner.run_incognito(&job, &CancellationToken::new()))
            .unwrap();
        assert_eq!(rc.reports.len(), 1);
        assert!(!rc.all_failed());

        let markdown =
            report::render(&rc, "markdown", Config::default().report_options()).unwrap();
        assert!(markdown.contains("### web-1"));
        assert!(markdown.contains("\"debian\""));
    }
}
