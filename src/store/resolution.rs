//! Resolution store: entity classes on top of the keyed store.
//!
//! Every entity class lives under its own key prefix. Read-modify-write
//! sequences (the pack index, the resolved-pack short-circuit) are only
//! consistent when one logical thread drives a store at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

use super::keyed::{KeyValueStore, MemoryStore};
use crate::error::{Errors, ScanError};
use crate::models::{
    DataType, Datum, QueryPack, Query, RawResult, Report, ResolvedPack, Value,
};

const PREFIX_ASSET: &str = "asset:";
const PREFIX_QUERY: &str = "query:";
const PREFIX_PACK: &str = "pack:";
const PREFIX_RESOLVED: &str = "resolved:";
const PREFIX_DATA: &str = "data:";
const KEY_PACK_INDEX: &str = "index:packs";

const DEFAULT_COST: i64 = 1;

/// Per-asset state kept during one scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetRecord {
    pub mrn: String,
    /// Packs assigned to this asset; together they form its bundle.
    pub pack_mrns: Vec<String>,
    pub props: BTreeMap<String, Value>,
    pub resolved_pack: Option<ResolvedPack>,
    pub resolved_version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackRecord {
    pub pack: QueryPack,
    pub filters: Vec<Query>,
}

/// Values held in the keyed store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Asset(AssetRecord),
    Query(Query),
    Pack(PackRecord),
    PackIndex(Vec<String>),
    Resolved(ResolvedPack),
    Datum(Datum),
}

/// Outcome of [`ResolutionStore::update_data`].
///
/// Accepted values are stored even when other values in the same batch
/// were rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataUpdate {
    pub updated: BTreeSet<String>,
    pub errors: Errors,
}

impl DataUpdate {
    pub fn into_result(self) -> Result<BTreeSet<String>, ScanError> {
        self.errors.into_result()?;
        Ok(self.updated)
    }
}

pub struct ResolutionStore {
    kv: Arc<dyn KeyValueStore<StoreValue>>,
}

impl ResolutionStore {
    pub fn new(kv: Arc<dyn KeyValueStore<StoreValue>>) -> Self {
        Self { kv }
    }

    /// A store backed by a fresh in-memory map.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn set(&self, key: String, value: StoreValue) -> Result<(), ScanError> {
        if self.kv.set(&key, value, DEFAULT_COST) {
            Ok(())
        } else {
            Err(ScanError::Execution(format!("store rejected write for {}", key)))
        }
    }

    // --- assets ---

    /// Returns the asset record, creating an empty one on first use.
    pub fn ensure_asset(&self, mrn: &str) -> Result<AssetRecord, ScanError> {
        if let Ok(existing) = self.get_asset(mrn) {
            return Ok(existing);
        }

        let record = AssetRecord {
            mrn: mrn.to_string(),
            ..AssetRecord::default()
        };
        self.set(asset_key(mrn), StoreValue::Asset(record.clone()))?;
        trace!(asset = %mrn, "store> created asset");
        Ok(record)
    }

    pub fn get_asset(&self, mrn: &str) -> Result<AssetRecord, ScanError> {
        match self.kv.get(&asset_key(mrn)) {
            Some(StoreValue::Asset(record)) => Ok(record),
            _ => Err(ScanError::not_found("asset", mrn)),
        }
    }

    pub(super) fn put_asset(&self, record: AssetRecord) -> Result<(), ScanError> {
        let key = asset_key(&record.mrn);
        self.set(key, StoreValue::Asset(record))
    }

    // --- queries ---

    pub fn set_query(&self, mrn: &str, query: &Query) -> Result<(), ScanError> {
        if mrn.is_empty() {
            return Err(ScanError::Validation("query mrn is required".to_string()));
        }
        self.set(format!("{}{}", PREFIX_QUERY, mrn), StoreValue::Query(query.clone()))
    }

    #[allow(dead_code)] // stored queries are read back through their packs during a scan
    pub fn get_query(&self, mrn: &str) -> Result<Query, ScanError> {
        match self.kv.get(&format!("{}{}", PREFIX_QUERY, mrn)) {
            Some(StoreValue::Query(q)) => Ok(q),
            _ => Err(ScanError::not_found("query", mrn)),
        }
    }

    #[allow(dead_code)] // stored queries are read back through their packs during a scan
    pub fn query_exists(&self, mrn: &str) -> bool {
        self.get_query(mrn).is_ok()
    }

    // --- query packs ---

    pub fn set_query_pack(&self, pack: &QueryPack, filters: &[Query]) -> Result<(), ScanError> {
        if pack.mrn.is_empty() {
            return Err(ScanError::Validation("query pack mrn is required".to_string()));
        }

        self.set(
            pack_key(&pack.mrn),
            StoreValue::Pack(PackRecord {
                pack: pack.clone(),
                filters: filters.to_vec(),
            }),
        )?;

        let mut index = self.pack_index();
        if !index.contains(&pack.mrn) {
            index.push(pack.mrn.clone());
            self.set(KEY_PACK_INDEX.to_string(), StoreValue::PackIndex(index))?;
        }
        Ok(())
    }

    fn get_pack_record(&self, mrn: &str) -> Result<PackRecord, ScanError> {
        match self.kv.get(&pack_key(mrn)) {
            Some(StoreValue::Pack(record)) => Ok(record),
            _ => Err(ScanError::not_found("query pack", mrn)),
        }
    }

    pub fn get_query_pack(&self, mrn: &str) -> Result<QueryPack, ScanError> {
        self.get_pack_record(mrn).map(|r| r.pack)
    }

    pub fn get_query_pack_filters(&self, mrn: &str) -> Result<Vec<Query>, ScanError> {
        self.get_pack_record(mrn).map(|r| r.filters)
    }

    #[allow(dead_code)] // pack management for long-lived stores
    pub fn delete_query_pack(&self, mrn: &str) -> Result<(), ScanError> {
        self.get_pack_record(mrn)?;
        self.kv.del(&pack_key(mrn));

        let mut index = self.pack_index();
        index.retain(|m| m != mrn);
        self.set(KEY_PACK_INDEX.to_string(), StoreValue::PackIndex(index))
    }

    /// All stored packs owned by `owner_mrn`, in insertion order.
    #[allow(dead_code)] // pack management for long-lived stores
    pub fn list_query_packs(&self, owner_mrn: &str) -> Vec<QueryPack> {
        self.pack_index()
            .iter()
            .filter_map(|mrn| self.get_query_pack(mrn).ok())
            .filter(|p| p.owner_mrn == owner_mrn)
            .collect()
    }

    fn pack_index(&self) -> Vec<String> {
        match self.kv.get(KEY_PACK_INDEX) {
            Some(StoreValue::PackIndex(list)) => list,
            _ => Vec::new(),
        }
    }

    // --- resolved packs ---

    pub fn set_resolved_pack(&self, mrn: &str, resolved: &ResolvedPack) -> Result<(), ScanError> {
        self.set(
            format!("{}{}", PREFIX_RESOLVED, mrn),
            StoreValue::Resolved(resolved.clone()),
        )
    }

    #[allow(dead_code)] // plans are read from the asset record during a scan
    pub fn get_resolved_pack(&self, mrn: &str) -> Result<ResolvedPack, ScanError> {
        match self.kv.get(&format!("{}{}", PREFIX_RESOLVED, mrn)) {
            Some(StoreValue::Resolved(r)) => Ok(r),
            _ => Err(ScanError::not_found("resolved pack", mrn)),
        }
    }

    /// Makes `resolved` the asset's current plan.
    ///
    /// No-op when the asset already holds a plan with the same graph
    /// execution checksum and version. Otherwise every declared datapoint
    /// without stored data gets a pending placeholder first.
    pub fn set_asset_resolved_pack(
        &self,
        asset_mrn: &str,
        resolved: &ResolvedPack,
        version: &str,
    ) -> Result<(), ScanError> {
        let mut asset = self.get_asset(asset_mrn)?;

        if let Some(current) = &asset.resolved_pack {
            if current.graph_execution_checksum == resolved.graph_execution_checksum
                && asset.resolved_version == version
            {
                debug!(asset = %asset_mrn, "store> resolved pack unchanged");
                return Ok(());
            }
        }

        for checksum in resolved.execution_job.datapoints.keys() {
            let key = data_key(asset_mrn, checksum);
            if self.kv.get(&key).is_none() {
                self.set(key, StoreValue::Datum(Datum::Pending))?;
            }
        }

        asset.resolved_pack = Some(resolved.clone());
        asset.resolved_version = version.to_string();
        self.put_asset(asset)
    }

    // --- data ---

    pub fn get_datum(&self, asset_mrn: &str, checksum: &str) -> Option<Datum> {
        match self.kv.get(&data_key(asset_mrn, checksum)) {
            Some(StoreValue::Datum(d)) => Some(d),
            _ => None,
        }
    }

    /// Stores results for the asset's declared datapoints.
    ///
    /// Values whose type disagrees with the declared type are rejected and
    /// reported; the rest of the batch is still stored. Results that carry
    /// an error have no value and skip the type check.
    pub fn update_data(
        &self,
        asset_mrn: &str,
        results: &BTreeMap<String, RawResult>,
    ) -> Result<DataUpdate, ScanError> {
        let asset = self.get_asset(asset_mrn)?;
        let resolved = asset
            .resolved_pack
            .ok_or_else(|| ScanError::not_found("resolved pack for asset", asset_mrn))?;
        let datapoints = &resolved.execution_job.datapoints;

        let mut update = DataUpdate::default();
        for (checksum, result) in results {
            let Some(info) = datapoints.get(checksum) else {
                update.errors.add(ScanError::not_found("datapoint", checksum.as_str()));
                continue;
            };

            let actual = result.value.data_type();
            if info.data_type != DataType::Unset
                && result.error.is_none()
                && actual != info.data_type
            {
                update.errors.add(ScanError::TypeMismatch {
                    checksum: checksum.clone(),
                    expected: info.data_type,
                    actual,
                });
                continue;
            }

            self.set(
                data_key(asset_mrn, checksum),
                StoreValue::Datum(Datum::Computed(result.clone())),
            )?;
            update.updated.insert(checksum.clone());
        }

        debug!(
            asset = %asset_mrn,
            updated = update.updated.len(),
            rejected = update.errors.len(),
            "store> updated data"
        );
        Ok(update)
    }

    /// Reads every computed datapoint of the asset's current plan.
    pub fn get_report(&self, asset_mrn: &str, pack_mrn: &str) -> Result<Report, ScanError> {
        let asset = self.get_asset(asset_mrn)?;
        let resolved = asset
            .resolved_pack
            .ok_or_else(|| ScanError::not_found("resolved pack for asset", asset_mrn))?;

        let mut report = Report::empty(asset_mrn, pack_mrn);
        for checksum in resolved.execution_job.datapoints.keys() {
            if let Some(Datum::Computed(res)) = self.get_datum(asset_mrn, checksum) {
                report.data.insert(checksum.clone(), res);
            }
        }
        Ok(report)
    }
}

fn asset_key(mrn: &str) -> String {
    format!("{}{}", PREFIX_ASSET, mrn)
}

fn pack_key(mrn: &str) -> String {
    format!("{}{}", PREFIX_PACK, mrn)
}

fn data_key(asset_mrn: &str, checksum: &str) -> String {
    format!("{}{}\u{0}{}", PREFIX_DATA, asset_mrn, checksum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataQueryInfo, ExecutionJob};

    const ASSET: &str = "//explorer.packscan.io/assets/a1";

    fn plan(datapoints: &[(&str, DataType)]) -> ResolvedPack {
        let mut job = ExecutionJob::default();
        for (checksum, data_type) in datapoints {
            job.datapoints.insert(
                checksum.to_string(),
                DataQueryInfo {
                    data_type: *data_type,
                },
            );
        }
        ResolvedPack::new(job, "filters".to_string())
    }

    fn pack(mrn: &str, owner: &str) -> QueryPack {
        QueryPack {
            mrn: mrn.to_string(),
            owner_mrn: owner.to_string(),
            ..QueryPack::default()
        }
    }

    #[test]
    fn test_ensure_asset_is_idempotent() {
        let store = ResolutionStore::in_memory();
        let first = store.ensure_asset(ASSET).unwrap();
        assert_eq!(first.mrn, ASSET);

        let mut record = first.clone();
        record.pack_mrns.push("//p".to_string());
        store.put_asset(record).unwrap();

        let again = store.ensure_asset(ASSET).unwrap();
        assert_eq!(again.pack_mrns, vec!["//p".to_string()]);
    }

    #[test]
    fn test_query_crud() {
        let store = ResolutionStore::in_memory();
        let q = Query::new("os", "platform.name");

        assert!(!store.query_exists("//q/os"));
        assert!(matches!(
            store.get_query("//q/os"),
            Err(ScanError::NotFound { kind: "query", .. })
        ));
        assert!(store.set_query("", &q).is_err());

        store.set_query("//q/os", &q).unwrap();
        assert!(store.query_exists("//q/os"));
        assert_eq!(store.get_query("//q/os").unwrap(), q);
    }

    #[test]
    fn test_pack_index_follows_inserts_and_deletes() {
        let store = ResolutionStore::in_memory();
        store.set_query_pack(&pack("//p/1", "//owner"), &[]).unwrap();
        store.set_query_pack(&pack("//p/2", "//owner"), &[]).unwrap();
        store.set_query_pack(&pack("//p/3", "//other"), &[]).unwrap();
        store.set_query_pack(&pack("//p/1", "//owner"), &[]).unwrap();

        let listed: Vec<_> = store
            .list_query_packs("//owner")
            .into_iter()
            .map(|p| p.mrn)
            .collect();
        assert_eq!(listed, vec!["//p/1".to_string(), "//p/2".to_string()]);

        store.delete_query_pack("//p/1").unwrap();
        assert!(store.get_query_pack("//p/1").is_err());
        assert_eq!(store.list_query_packs("//owner").len(), 1);
        assert!(store.delete_query_pack("//p/1").is_err());
    }

    #[test]
    fn test_pack_filters_roundtrip() {
        let store = ResolutionStore::in_memory();
        let filter = Query {
            code_id: "f1".to_string(),
            ..Query::new("", "platform.name == debian")
        };
        store
            .set_query_pack(&pack("//p/1", "//owner"), std::slice::from_ref(&filter))
            .unwrap();
        assert_eq!(store.get_query_pack_filters("//p/1").unwrap(), vec![filter]);
    }

    #[test]
    fn test_resolved_pack_by_mrn() {
        let store = ResolutionStore::in_memory();
        let resolved = plan(&[("c1", DataType::Bool)]);
        assert!(store.get_resolved_pack("//r").is_err());
        store.set_resolved_pack("//r", &resolved).unwrap();
        assert_eq!(store.get_resolved_pack("//r").unwrap(), resolved);
    }

    #[test]
    fn test_set_asset_resolved_pack_requires_asset() {
        let store = ResolutionStore::in_memory();
        let err = store
            .set_asset_resolved_pack(ASSET, &plan(&[]), "v2")
            .unwrap_err();
        assert!(matches!(err, ScanError::NotFound { kind: "asset", .. }));
    }

    #[test]
    fn test_set_asset_resolved_pack_declares_placeholders() {
        let store = ResolutionStore::in_memory();
        store.ensure_asset(ASSET).unwrap();
        store
            .set_asset_resolved_pack(ASSET, &plan(&[("c1", DataType::Bool), ("c2", DataType::Unset)]), "v2")
            .unwrap();

        assert_eq!(store.get_datum(ASSET, "c1"), Some(Datum::Pending));
        assert_eq!(store.get_datum(ASSET, "c2"), Some(Datum::Pending));
        assert_eq!(store.get_datum(ASSET, "c3"), None);
    }

    #[test]
    fn test_set_asset_resolved_pack_is_idempotent() {
        let kv = Arc::new(MemoryStore::new());
        let store = ResolutionStore::new(kv.clone());
        store.ensure_asset(ASSET).unwrap();

        let resolved = plan(&[("c1", DataType::Bool)]);
        store.set_asset_resolved_pack(ASSET, &resolved, "v2").unwrap();
        let mut results = BTreeMap::new();
        results.insert("c1".to_string(), RawResult::new("c1", Value::Bool(true)));
        store.update_data(ASSET, &results).unwrap();

        let before = kv.snapshot();
        store.set_asset_resolved_pack(ASSET, &resolved, "v2").unwrap();
        assert_eq!(kv.snapshot(), before);

        // a new version is not short-circuited, but keeps computed data
        store.set_asset_resolved_pack(ASSET, &resolved, "v3").unwrap();
        assert_eq!(store.get_asset(ASSET).unwrap().resolved_version, "v3");
        assert!(matches!(
            store.get_datum(ASSET, "c1"),
            Some(Datum::Computed(_))
        ));
    }

    #[test]
    fn test_update_data_rejects_mismatched_types_but_keeps_the_rest() {
        let store = ResolutionStore::in_memory();
        store.ensure_asset(ASSET).unwrap();
        store
            .set_asset_resolved_pack(
                ASSET,
                &plan(&[
                    ("bool", DataType::Bool),
                    ("any", DataType::Unset),
                    ("int", DataType::Int),
                ]),
                "v2",
            )
            .unwrap();

        let mut results = BTreeMap::new();
        results.insert("bool".to_string(), RawResult::new("bool", Value::from("yes")));
        results.insert("any".to_string(), RawResult::new("any", Value::from("whatever")));
        results.insert("int".to_string(), RawResult::new("int", Value::Int(3)));
        results.insert("undeclared".to_string(), RawResult::new("undeclared", Value::Int(1)));

        let update = store.update_data(ASSET, &results).unwrap();
        let updated: Vec<_> = update.updated.iter().cloned().collect();
        assert_eq!(updated, vec!["any".to_string(), "int".to_string()]);
        assert_eq!(update.errors.len(), 2);
        assert!(update.errors.iter().any(|e| matches!(
            e,
            ScanError::TypeMismatch {
                expected: DataType::Bool,
                actual: DataType::String,
                ..
            }
        )));

        assert_eq!(store.get_datum(ASSET, "bool"), Some(Datum::Pending));
        assert!(update.into_result().is_err());
        let report = store.get_report(ASSET, ASSET).unwrap();
        assert_eq!(report.data.len(), 2);
    }

    #[test]
    fn test_update_data_accepts_failed_results() {
        let store = ResolutionStore::in_memory();
        store.ensure_asset(ASSET).unwrap();
        store
            .set_asset_resolved_pack(ASSET, &plan(&[("bool", DataType::Bool)]), "v2")
            .unwrap();

        let mut results = BTreeMap::new();
        results.insert("bool".to_string(), RawResult::failed("bool", "fact missing"));
        let updated = store.update_data(ASSET, &results).unwrap().into_result().unwrap();
        assert!(updated.contains("bool"));
    }

    #[test]
    fn test_update_data_unknown_asset_fails_immediately() {
        let store = ResolutionStore::in_memory();
        let err = store.update_data(ASSET, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ScanError::NotFound { .. }));
    }

    #[test]
    fn test_report_before_and_after_update() {
        let store = ResolutionStore::in_memory();
        store.ensure_asset(ASSET).unwrap();
        store
            .set_asset_resolved_pack(ASSET, &plan(&[("c1", DataType::Bool)]), "v2")
            .unwrap();

        let before = store.get_report(ASSET, ASSET).unwrap();
        assert!(!before.data.contains_key("c1"));

        let mut results = BTreeMap::new();
        results.insert("c1".to_string(), RawResult::new("c1", Value::Bool(false)));
        store.update_data(ASSET, &results).unwrap();

        let after = store.get_report(ASSET, ASSET).unwrap();
        assert_eq!(
            after.data.get("c1"),
            Some(&RawResult::new("c1", Value::Bool(false)))
        );
    }
}
