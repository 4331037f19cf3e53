//! Scan of a single asset over one connection.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::ScanOptions;
use crate::error::ScanError;
use crate::executor::{run_execution_job, run_filter_queries};
use crate::models::{Asset, AssetReport, Bundle};
use crate::progress::Progress;
use crate::provider::QueryRuntime;
use crate::query::QueryCompiler;
use crate::store::ResolutionStore;

pub struct AssetJob<'a> {
    pub asset: &'a Asset,
    pub bundle: &'a Bundle,
    pub props: &'a BTreeMap<String, String>,
    pub progress: Arc<dyn Progress>,
}

/// Drives one asset through bundle setup, filtering, resolution and
/// execution against its own store.
pub(crate) struct AssetScanner<'a> {
    store: ResolutionStore,
    compiler: &'a dyn QueryCompiler,
    runtime: Arc<dyn QueryRuntime>,
    job: &'a AssetJob<'a>,
    options: &'a ScanOptions,
}

impl<'a> AssetScanner<'a> {
    pub fn new(
        compiler: &'a dyn QueryCompiler,
        runtime: Arc<dyn QueryRuntime>,
        job: &'a AssetJob<'a>,
        options: &'a ScanOptions,
    ) -> Self {
        Self {
            store: ResolutionStore::in_memory(),
            compiler,
            runtime,
            job,
            options,
        }
    }

    pub async fn run(&self) -> Result<AssetReport, ScanError> {
        self.prepare_asset()?;
        let res = self.run_query_pack().await;
        debug!(asset = %self.mrn(), "scan complete");
        res
    }

    fn mrn(&self) -> &str {
        &self.job.asset.mrn
    }

    fn prepare_asset(&self) -> Result<(), ScanError> {
        if self.job.bundle.packs.is_empty() {
            return Err(ScanError::Validation(
                "bundle doesn't contain any query packs".to_string(),
            ));
        }

        let stored = self.store.set_bundle(self.job.bundle, self.compiler)?;
        self.store.assign(self.mrn(), &stored.pack_mrns())?;
        if !self.job.props.is_empty() {
            self.store.set_props(self.mrn(), self.job.props)?;
        }
        Ok(())
    }

    async fn run_query_pack(&self) -> Result<AssetReport, ScanError> {
        let mrn = self.mrn();

        debug!(asset = %mrn, "client> request bundle for asset");
        let asset_bundle = self.store.get_bundle(mrn)?;
        let raw_filters = self.store.get_filters(mrn)?;
        let props = self.store.get_asset(mrn)?.props;

        let (filters, errors) = run_filter_queries(
            self.runtime.as_ref(),
            self.compiler,
            &raw_filters,
            &props,
            self.options.filter_timeout,
        )
        .await;
        if !errors.is_empty() {
            debug!(asset = %mrn, "client> some filter queries failed: {}", errors);
        }
        debug!(asset = %mrn, matched = filters.len(), total = raw_filters.len(), "client> updated filters");

        let resolved = self.store.resolve(
            mrn,
            &filters,
            self.compiler,
            &self.options.resolved_version,
        )?;
        debug!(asset = %mrn, "client> got resolved bundle for asset");

        let executor = run_execution_job(
            self.runtime.as_ref(),
            &resolved.execution_job,
            &props,
            self.job.progress.clone(),
        )?;
        executor.wait_until_done(self.options.execution_timeout).await?;
        executor.store_query_data(&self.store, mrn)?;

        debug!(asset = %mrn, "generate report");
        let report = self.store.get_report(mrn, mrn)?;
        Ok(AssetReport {
            mrn: mrn.to_string(),
            bundle: Some(asset_bundle),
            resolved: Some(resolved),
            report,
        })
    }
}
