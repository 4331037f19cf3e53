//! Scan orchestration.
//!
//! [`LocalScanner::run_incognito`] validates a job, discovers its assets and
//! scans them one after another. Per-asset failures end up in the report
//! collection; only an invalid job fails the whole run.

pub mod asset;
pub mod discovery;

pub use asset::AssetJob;
pub use discovery::{discover_assets, DiscoveredAssets};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ScanError;
use crate::models::{preprocess_query_pack_filters, Asset, Bundle, Inventory, Job, ReportCollection};
use crate::mrn;
use crate::progress::{AssetProgress, MultiProgress, NoopMultiProgress, ProgressBars};
use crate::provider::{Provider, Runtime};
use crate::query::QueryCompiler;
use crate::report::AggregateReporter;
use asset::AssetScanner;

/// Tunables for a scan run.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Wait for filter queries
    pub filter_timeout: Duration,
    /// Wait for the resolved job of one asset
    pub execution_timeout: Duration,
    /// Assets handled per batch
    pub batch_size: usize,
    /// Version tag stored with every resolved plan
    pub resolved_version: String,
    pub show_progress: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            filter_timeout: Duration::from_secs(5),
            execution_timeout: Duration::from_secs(10),
            batch_size: 100,
            resolved_version: "v2".to_string(),
            show_progress: false,
        }
    }
}

pub struct LocalScanner {
    provider: Arc<dyn Provider>,
    compiler: Arc<dyn QueryCompiler>,
    options: ScanOptions,
}

impl LocalScanner {
    pub fn new(
        provider: Arc<dyn Provider>,
        compiler: Arc<dyn QueryCompiler>,
        options: ScanOptions,
    ) -> Self {
        Self {
            provider,
            compiler,
            options,
        }
    }

    /// Scans every asset of the job without contacting any upstream service.
    pub async fn run_incognito(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<ReportCollection, ScanError> {
        let (inventory, mut bundle) = validate_job(job)?;

        let mut pack_filters = job.query_pack_filters.clone();
        pack_filters.extend(preprocess_query_pack_filters(&job.query_pack_filters));
        if bundle.filter_query_packs(&pack_filters) {
            return Err(ScanError::Validation(
                "all available packs filtered out. nothing to do".to_string(),
            ));
        }

        info!("Discovering related assets for {} asset(s)", inventory.assets.len());
        let mut discovered = discover_assets(inventory, self.provider.as_ref())?;

        let mut reporter = AggregateReporter::new();
        for failed in &mut discovered.errors {
            ensure_mrn(&mut failed.asset);
            reporter.add_scan_error(&failed.asset, failed.error.clone());
        }
        if discovered.is_empty() {
            return Ok(reporter.reports());
        }

        for a in &mut discovered.assets {
            ensure_mrn(&mut a.asset);
        }
        reporter.add_assets(discovered.assets.iter().map(|a| &a.asset));

        let multi = self.create_progress(&discovered);
        let batch_size = self.options.batch_size.max(1);
        'batches: for batch in discovered.assets.chunks(batch_size) {
            for entry in batch {
                if cancel.is_cancelled() {
                    warn!("Scan has been canceled");
                    break 'batches;
                }

                let key = entry.asset.platform_ids.first().cloned().unwrap_or_default();
                let asset_job = AssetJob {
                    asset: &entry.asset,
                    bundle: &bundle,
                    props: &job.props,
                    progress: Arc::new(AssetProgress::new(multi.clone(), key)),
                };
                self.run_asset_job(&asset_job, &entry.runtime, &mut reporter).await;
                entry.runtime.close();
            }
        }

        multi.close();
        discovered.close_all();
        if let Err(e) = reporter.error() {
            debug!("scan finished with asset errors: {}", e);
        }
        Ok(reporter.reports())
    }

    /// Scans the asset over each of its connections and records the outcome.
    ///
    /// The discovered runtime serves the first connection; further ones are
    /// opened here and closed before the next one starts.
    pub async fn run_asset_job(
        &self,
        job: &AssetJob<'_>,
        runtime: &Runtime,
        reporter: &mut AggregateReporter,
    ) {
        debug!(asset = %job.asset.human_name(), "Connecting to asset");
        let connections = job.asset.connections.len().max(1);

        for index in 0..connections {
            let opened;
            let current = if index == 0 {
                runtime
            } else {
                let conf = &job.asset.connections[index];
                match self.provider.connect(job.asset, conf) {
                    Ok(conn) => {
                        opened = Runtime::new(conn);
                        &opened
                    }
                    Err(e) => {
                        self.record_error(job, e, reporter);
                        continue;
                    }
                }
            };

            let mut asset = job.asset.clone();
            if asset.platform.is_none() {
                asset.platform = current.asset().platform;
            }
            let conn_job = AssetJob {
                asset: &asset,
                bundle: job.bundle,
                props: job.props,
                progress: job.progress.clone(),
            };

            let scanner = AssetScanner::new(
                self.compiler.as_ref(),
                current.query_runtime(),
                &conn_job,
                &self.options,
            );
            match scanner.run().await {
                Ok(report) => reporter.add_report(&asset, report),
                Err(e) => self.record_error(&conn_job, e, reporter),
            }
        }
    }

    fn record_error(&self, job: &AssetJob<'_>, err: ScanError, reporter: &mut AggregateReporter) {
        debug!(asset = %job.asset.human_name(), "Could not scan asset: {}", err);
        if err.is_not_applicable() {
            job.progress.not_applicable();
        } else {
            job.progress.errored();
        }
        reporter.add_scan_error(job.asset, err);
    }

    fn create_progress(&self, discovered: &DiscoveredAssets) -> Arc<dyn MultiProgress> {
        if !self.options.show_progress {
            return Arc::new(NoopMultiProgress);
        }

        let elements: Vec<(String, String)> = discovered
            .assets
            .iter()
            .filter_map(|a| {
                a.asset
                    .platform_ids
                    .first()
                    .map(|id| (id.clone(), a.asset.human_name().to_string()))
            })
            .collect();
        Arc::new(ProgressBars::new(&elements))
    }
}

/// Fails fast on jobs that cannot produce any report.
pub fn validate_job(job: &Job) -> Result<(&Inventory, Bundle), ScanError> {
    let inventory = job
        .inventory
        .as_ref()
        .ok_or_else(|| ScanError::Validation("missing inventory".to_string()))?;
    let bundle = job
        .bundle
        .as_ref()
        .ok_or_else(|| ScanError::Validation("missing bundle".to_string()))?;
    if bundle.packs.is_empty() {
        return Err(ScanError::Validation(
            "bundle doesn't contain any query packs".to_string(),
        ));
    }

    let uids: BTreeSet<&str> = bundle
        .packs
        .iter()
        .map(|p| p.uid.as_str())
        .filter(|u| !u.is_empty())
        .collect();
    if uids.len() != bundle.packs.iter().filter(|p| !p.uid.is_empty()).count() {
        return Err(ScanError::Validation(
            "bundle contains query packs with the same uid".to_string(),
        ));
    }

    Ok((inventory, bundle.clone()))
}

fn ensure_mrn(asset: &mut Asset) {
    if asset.mrn.is_empty() {
        asset.mrn = mrn::new_asset_mrn();
    }
}
