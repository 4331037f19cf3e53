//! Collects per-asset reports and errors into one collection.

use std::collections::BTreeMap;

use crate::error::{Errors, ScanError};
use crate::models::{Asset, AssetReport, Bundle, Report, ReportCollection, ResolvedPack};

#[derive(Debug, Default)]
pub struct AggregateReporter {
    assets: BTreeMap<String, Asset>,
    reports: BTreeMap<String, Report>,
    errors: BTreeMap<String, ScanError>,
    resolved: BTreeMap<String, ResolvedPack>,
    bundle: Option<Bundle>,
}

impl AggregateReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the asset summaries, keyed by MRN.
    pub fn add_assets<'a>(&mut self, assets: impl IntoIterator<Item = &'a Asset>) {
        for asset in assets {
            self.assets.insert(asset_key(asset), asset.clone());
        }
    }

    pub fn add_report(&mut self, asset: &Asset, report: AssetReport) {
        let key = asset_key(asset);
        self.assets.insert(key.clone(), asset.clone());
        if self.bundle.is_none() {
            self.bundle = report.bundle;
        }
        if let Some(resolved) = report.resolved {
            self.resolved.insert(key.clone(), resolved);
        }
        self.reports.insert(key, report.report);
    }

    pub fn add_scan_error(&mut self, asset: &Asset, err: ScanError) {
        let key = asset_key(asset);
        self.assets.insert(key.clone(), asset.clone());
        self.errors.insert(key, err);
    }

    pub fn reports(&self) -> ReportCollection {
        ReportCollection {
            assets: self.assets.clone(),
            bundle: self.bundle.clone(),
            reports: self.reports.clone(),
            errors: self
                .errors
                .iter()
                .map(|(mrn, err)| (mrn.clone(), err.to_string()))
                .collect(),
            resolved: self.resolved.clone(),
        }
    }

    /// All recorded per-asset errors folded into one.
    pub fn error(&self) -> Result<(), ScanError> {
        self.errors.values().cloned().collect::<Errors>().into_result()
    }
}

/// Assets that never got an MRN are keyed by their name.
fn asset_key(asset: &Asset) -> String {
    if asset.mrn.is_empty() {
        asset.human_name().to_string()
    } else {
        asset.mrn.clone()
    }
}
