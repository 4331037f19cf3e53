//! Execution plans, stored data and reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Asset, Bundle, DataType, RawResult};
use crate::query::CodeBundle;

/// Declared type of a datapoint in a resolved plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataQueryInfo {
    #[serde(rename = "type")]
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionQuery {
    pub query: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query_mrn: String,
    pub code: CodeBundle,
}

/// Everything needed to run the resolved queries against one asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionJob {
    /// Queries keyed by code id.
    pub queries: BTreeMap<String, ExecutionQuery>,
    /// Datapoints keyed by checksum.
    pub datapoints: BTreeMap<String, DataQueryInfo>,
}

impl ExecutionJob {
    /// Cache key for the plan: changes whenever the set of code or datapoints changes.
    pub fn graph_execution_checksum(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for code_id in self.queries.keys() {
            hasher.update(b"query:");
            hasher.update(code_id.as_bytes());
        }
        for (checksum, info) in &self.datapoints {
            hasher.update(b"datapoint:");
            hasher.update(checksum.as_bytes());
            hasher.update(info.data_type.to_string().as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// An asset-specific, materialized execution plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPack {
    pub execution_job: ExecutionJob,
    #[serde(default)]
    pub filters_checksum: String,
    #[serde(default)]
    pub graph_execution_checksum: String,
}

impl ResolvedPack {
    pub fn new(execution_job: ExecutionJob, filters_checksum: String) -> Self {
        let graph_execution_checksum = execution_job.graph_execution_checksum();
        Self {
            execution_job,
            filters_checksum,
            graph_execution_checksum,
        }
    }
}

/// A stored raw result for one (asset, checksum) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "result", rename_all = "lowercase")]
pub enum Datum {
    /// Declared by the asset's plan, not computed yet.
    Pending,
    Computed(RawResult),
}

/// Results of one asset for its assigned packs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub entity_mrn: String,
    pub pack_mrn: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub data: BTreeMap<String, RawResult>,
}

impl Report {
    pub fn empty(entity_mrn: &str, pack_mrn: &str) -> Self {
        Self {
            entity_mrn: entity_mrn.to_string(),
            pack_mrn: pack_mrn.to_string(),
            created_at: Utc::now(),
            data: BTreeMap::new(),
        }
    }
}

/// Everything the scan produced for one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetReport {
    pub mrn: String,
    pub bundle: Option<Bundle>,
    pub resolved: Option<ResolvedPack>,
    pub report: Report,
}

/// Aggregated output of a scan, keyed by asset MRN.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportCollection {
    #[serde(default)]
    pub assets: BTreeMap<String, Asset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<Bundle>,
    #[serde(default)]
    pub reports: BTreeMap<String, Report>,
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
    #[serde(default)]
    pub resolved: BTreeMap<String, ResolvedPack>,
}

impl ReportCollection {
    /// True when assets were requested but none produced a report.
    pub fn all_failed(&self) -> bool {
        self.reports.is_empty() && !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;

    #[test]
    fn test_graph_checksum_tracks_datapoint_types() {
        let mut job = ExecutionJob::default();
        job.datapoints.insert("c1".to_string(), DataQueryInfo::default());
        let a = job.graph_execution_checksum();
        assert_eq!(a, job.graph_execution_checksum());

        job.datapoints.insert(
            "c1".to_string(),
            DataQueryInfo {
                data_type: DataType::Bool,
            },
        );
        assert_ne!(a, job.graph_execution_checksum());
    }

    #[test]
    fn test_datum_serialization_distinguishes_pending() {
        let pending = serde_json::to_string(&Datum::Pending).unwrap();
        assert_eq!(pending, r#"{"state":"pending"}"#);

        let computed = Datum::Computed(RawResult::new("c1", Value::Nil));
        let json = serde_json::to_string(&computed).unwrap();
        assert!(json.contains(r#""state":"computed""#));
        assert_eq!(serde_json::from_str::<Datum>(&json).unwrap(), computed);
    }

    #[test]
    fn test_all_failed() {
        let mut rc = ReportCollection::default();
        assert!(!rc.all_failed());
        rc.errors.insert("//a".to_string(), "boom".to_string());
        assert!(rc.all_failed());
        rc.reports
            .insert("//b".to_string(), Report::empty("//b", "//b"));
        assert!(!rc.all_failed());
    }
}
