//! Bundle, assignment and resolution operations on top of the store.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::resolution::ResolutionStore;
use crate::error::ScanError;
use crate::models::{
    Bundle, DataQueryInfo, ExecutionJob, ExecutionQuery, Query, QueryPack, RawResult,
    ResolvedPack, Value,
};
use crate::query::QueryCompiler;

impl ResolutionStore {
    /// Compiles and stores every pack of the bundle.
    ///
    /// Queries that fail to compile are dropped from their pack. Filters keep
    /// their place even when they fail to compile; they just never match.
    pub fn set_bundle(
        &self,
        bundle: &Bundle,
        compiler: &dyn QueryCompiler,
    ) -> Result<Bundle, ScanError> {
        let mut bundle = bundle.clone();
        bundle.refresh_mrns()?;

        for pack in &mut bundle.packs {
            for filter in &mut pack.filters {
                match compiler.compile(&filter.mql) {
                    Ok(code) => {
                        filter.mrn = format!("{}/filter/{}", pack.mrn, code.id);
                        filter.code_id = code.id;
                    }
                    Err(e) => warn!(pack = %pack.mrn, "Skipping filter: {}", e),
                }
            }

            pack.queries.retain_mut(|query| match compiler.compile(&query.mql) {
                Ok(code) => {
                    query.code_id = code.id;
                    true
                }
                Err(e) => {
                    warn!(pack = %pack.mrn, query = %query.mrn, "Removing failing query: {}", e);
                    false
                }
            });

            for query in &pack.queries {
                self.set_query(&query.mrn, query)?;
            }
            self.set_query_pack(pack, &pack.filters)?;
            debug!(
                pack = %pack.mrn,
                queries = pack.queries.len(),
                filters = pack.filters.len(),
                "hub> stored query pack"
            );
        }

        Ok(bundle)
    }

    /// Records the packs an asset is scanned with.
    pub fn assign(&self, asset_mrn: &str, pack_mrns: &[String]) -> Result<(), ScanError> {
        if pack_mrns.is_empty() {
            return Err(ScanError::Validation(
                "no query pack MRNs were provided".to_string(),
            ));
        }
        for mrn in pack_mrns {
            self.get_query_pack(mrn)?;
        }

        let mut asset = self.ensure_asset(asset_mrn)?;
        for mrn in pack_mrns {
            if !asset.pack_mrns.contains(mrn) {
                asset.pack_mrns.push(mrn.clone());
            }
        }
        self.put_asset(asset)
    }

    pub fn set_props(
        &self,
        asset_mrn: &str,
        props: &BTreeMap<String, String>,
    ) -> Result<(), ScanError> {
        let mut asset = self.ensure_asset(asset_mrn)?;
        for (name, value) in props {
            asset.props.insert(name.clone(), Value::from(value.as_str()));
        }
        self.put_asset(asset)
    }

    /// The bundle of an asset (its assigned packs) or of a single pack.
    pub fn get_bundle(&self, mrn: &str) -> Result<Bundle, ScanError> {
        if let Ok(asset) = self.get_asset(mrn) {
            let packs = asset
                .pack_mrns
                .iter()
                .map(|m| self.get_query_pack(m))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Bundle {
                owner_mrn: mrn.to_string(),
                packs,
            });
        }

        let pack = self
            .get_query_pack(mrn)
            .map_err(|_| ScanError::not_found("bundle", mrn))?;
        Ok(Bundle {
            owner_mrn: pack.owner_mrn.clone(),
            packs: vec![pack],
        })
    }

    /// Filters of a pack, or the union of filters of an asset's packs.
    ///
    /// Compiled filters come first, deduplicated by code id. Filters that
    /// failed to compile follow so callers see their failure.
    pub fn get_filters(&self, mrn: &str) -> Result<Vec<Query>, ScanError> {
        let bundle = self.get_bundle(mrn)?;
        let mut scoped = Bundle {
            owner_mrn: bundle.owner_mrn,
            packs: Vec::with_capacity(bundle.packs.len()),
        };
        for mut pack in bundle.packs {
            pack.filters = self.get_query_pack_filters(&pack.mrn)?;
            scoped.packs.push(pack);
        }

        let mut filters = scoped.filters();
        let mut failed = BTreeSet::new();
        for pack in &scoped.packs {
            for filter in pack.filters.iter().filter(|f| f.code_id.is_empty()) {
                if failed.insert(filter.mql.as_str()) {
                    filters.push(filter.clone());
                }
            }
        }
        Ok(filters)
    }

    /// Builds and stores the asset's execution plan from the filters that
    /// matched it.
    pub fn resolve(
        &self,
        asset_mrn: &str,
        asset_filters: &[Query],
        compiler: &dyn QueryCompiler,
        version: &str,
    ) -> Result<ResolvedPack, ScanError> {
        let bundle = self.get_bundle(asset_mrn)?;
        let supported: BTreeSet<String> = asset_filters
            .iter()
            .filter(|f| !f.code_id.is_empty())
            .map(|f| f.code_id.clone())
            .collect();

        let packs: Vec<&QueryPack> = bundle
            .packs
            .iter()
            .filter(|p| p.supports(&supported))
            .collect();
        if packs.is_empty() {
            return Err(ScanError::NotApplicable {
                asset: asset_mrn.to_string(),
                reason: format!("none of {} filters matched", asset_filters.len()),
            });
        }

        let filters_checksum = filters_checksum(&packs, &supported);
        let mut job = ExecutionJob::default();
        for pack in &packs {
            for query in &pack.queries {
                let code = compiler.compile(&query.mql)?;
                for checksum in code.all_checksums() {
                    job.datapoints.insert(
                        checksum.clone(),
                        DataQueryInfo {
                            data_type: code.declared_type(checksum),
                        },
                    );
                }
                job.queries.insert(
                    code.id.clone(),
                    ExecutionQuery {
                        query: query.mql.clone(),
                        query_mrn: query.mrn.clone(),
                        code,
                    },
                );
            }
        }

        let resolved = ResolvedPack::new(job, filters_checksum);
        self.set_resolved_pack(
            &format!("{}/resolved/{}", asset_mrn, resolved.filters_checksum),
            &resolved,
        )?;
        self.set_asset_resolved_pack(asset_mrn, &resolved, version)?;

        debug!(
            asset = %asset_mrn,
            packs = packs.len(),
            datapoints = resolved.execution_job.datapoints.len(),
            checksum = %resolved.graph_execution_checksum,
            "hub> resolved execution job"
        );
        Ok(resolved)
    }

    pub fn store_results(
        &self,
        asset_mrn: &str,
        results: &BTreeMap<String, RawResult>,
    ) -> Result<BTreeSet<String>, ScanError> {
        self.update_data(asset_mrn, results)?.into_result()
    }
}

fn filters_checksum(packs: &[&QueryPack], supported: &BTreeSet<String>) -> String {
    let mut hasher = blake3::Hasher::new();
    for pack in packs {
        hasher.update(b"pack:");
        hasher.update(pack.mrn.as_bytes());
    }
    for code_id in supported {
        hasher.update(b"filter:");
        hasher.update(code_id.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
