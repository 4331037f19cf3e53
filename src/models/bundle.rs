//! Queries, query packs and bundles.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::ScanError;
use crate::mrn::{self, COLLECTION_QUERIES, COLLECTION_QUERYPACKS, LOCAL_OWNER_MRN};

/// A declarative check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mrn: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub mql: String,
    /// Id of the compiled code, filled in when the query is stored.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code_id: String,
}

impl Query {
    #[allow(dead_code)] // bundles are deserialized; fixtures build queries in code
    pub fn new(uid: &str, mql: &str) -> Self {
        Self {
            uid: uid.to_string(),
            mql: mql.to_string(),
            ..Self::default()
        }
    }
}

/// A named group of queries that applies to assets matching its filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPack {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mrn: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner_mrn: String,
    /// Applicability filters; an asset must match one of them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Query>,
    #[serde(default)]
    pub queries: Vec<Query>,
}

impl QueryPack {
    /// A pack without filters applies everywhere; otherwise any matching filter suffices.
    pub fn supports(&self, supported: &BTreeSet<String>) -> bool {
        self.filters.is_empty()
            || self
                .filters
                .iter()
                .any(|f| supported.contains(&f.code_id))
    }
}

/// The unit of policy content submitted to a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner_mrn: String,
    #[serde(default)]
    pub packs: Vec<QueryPack>,
}

impl Bundle {
    /// Loads bundle files or directories of bundle files and merges them.
    pub fn from_paths(paths: &[PathBuf]) -> Result<Self> {
        let mut files = Vec::new();
        for path in paths {
            if path.is_dir() {
                for entry in WalkDir::new(path).sort_by_file_name() {
                    let entry = entry
                        .with_context(|| format!("Failed to walk {}", path.display()))?;
                    if entry.file_type().is_file() && is_bundle_file(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
            } else {
                files.push(path.clone());
            }
        }

        let mut bundle = Bundle::default();
        for file in &files {
            debug!("Loading bundle file {}", file.display());
            bundle.add_bundle(Self::from_file(file)?);
        }
        Ok(bundle)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bundle file: {}", path.display()))?;

        let bundle = if has_extension(path, "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse bundle file: {}", path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse bundle file: {}", path.display()))?
        };
        Ok(bundle)
    }

    /// Merges another bundle's packs into this one.
    pub fn add_bundle(&mut self, other: Bundle) {
        if self.owner_mrn.is_empty() {
            self.owner_mrn = other.owner_mrn;
        }
        self.packs.extend(other.packs);
    }

    /// Derives missing MRNs for packs and queries from the owner.
    pub fn refresh_mrns(&mut self) -> Result<(), ScanError> {
        if self.owner_mrn.is_empty() {
            self.owner_mrn = LOCAL_OWNER_MRN.to_string();
        }

        for pack in &mut self.packs {
            pack.mrn = mrn::refresh_mrn(&self.owner_mrn, &pack.mrn, COLLECTION_QUERYPACKS, &pack.uid)?;
            pack.owner_mrn = self.owner_mrn.clone();
            for query in &mut pack.queries {
                query.mrn = mrn::refresh_mrn(&self.owner_mrn, &query.mrn, COLLECTION_QUERIES, &query.uid)?;
            }
        }
        Ok(())
    }

    /// Keeps only the packs named by `ids` (MRN or UID).
    ///
    /// Does nothing for an empty list. Returns true when every pack was
    /// filtered out.
    pub fn filter_query_packs(&mut self, ids: &[String]) -> bool {
        if ids.is_empty() {
            return false;
        }

        let valid: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
        self.packs.retain(|pack| {
            if !pack.mrn.is_empty() {
                if valid.contains(pack.mrn.as_str()) {
                    return true;
                }
                // packs with an MRN are matched by the uid inside it, not their uid field
                return mrn::resource(&pack.mrn, COLLECTION_QUERYPACKS)
                    .map(|uid| valid.contains(uid.as_str()))
                    .unwrap_or(false);
            }
            valid.contains(pack.uid.as_str())
        });

        self.packs.is_empty()
    }

    /// Compiled filters of all packs, deduplicated by code id.
    pub fn filters(&self) -> Vec<Query> {
        let mut uniq: BTreeMap<&str, &Query> = BTreeMap::new();
        for pack in &self.packs {
            for filter in &pack.filters {
                if !filter.code_id.is_empty() {
                    uniq.entry(filter.code_id.as_str()).or_insert(filter);
                }
            }
        }
        uniq.into_values().cloned().collect()
    }

    pub fn pack_mrns(&self) -> Vec<String> {
        self.packs.iter().map(|p| p.mrn.clone()).collect()
    }
}

/// Expands short `namespace/uid` pack names into full query pack MRNs.
pub fn preprocess_query_pack_filters(filters: &[String]) -> Vec<String> {
    filters
        .iter()
        .map(|f| {
            if f.starts_with("//") {
                return f.clone();
            }
            match f.split('/').collect::<Vec<_>>().as_slice() {
                [namespace, uid] => mrn::query_pack_mrn(namespace, uid),
                _ => f.clone(),
            }
        })
        .collect()
}

fn is_bundle_file(path: &Path) -> bool {
    has_extension(path, "toml") || has_extension(path, "json")
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}
