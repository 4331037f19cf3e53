//! Assets, inventories and scan jobs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{Bundle, Value};

/// Best-effort platform metadata for an asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub runtime: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub family: Vec<String>,
}

/// How to reach an asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// A scan target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mrn: String,
    #[serde(default)]
    pub name: String,
    /// Stable external ids used to detect the same asset reached twice.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platform_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<ConnectionConfig>,
    /// Provider-specific inventory data.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub facts: BTreeMap<String, Value>,
    /// Child assets a provider reports behind this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discovered: Vec<Asset>,
}

impl Asset {
    pub fn human_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else if !self.mrn.is_empty() {
            &self.mrn
        } else {
            self.platform_ids.first().map(String::as_str).unwrap_or("unnamed asset")
        }
    }

    /// Copies labels from the root asset that this asset doesn't set itself.
    pub fn inherit_labels(&mut self, root: &Asset) {
        for (k, v) in &root.labels {
            self.labels.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// Input accepted by the scanner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Inventory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<Bundle>,
    /// Pack MRNs, UIDs or `namespace/uid` short names to run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_pack_filters: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, String>,
}

impl Job {
    pub fn from_file(path: &Path) -> Result<Self> {
        read_structured(path, "job")
    }
}

impl Inventory {
    pub fn from_file(path: &Path) -> Result<Self> {
        read_structured(path, "inventory")
    }
}

fn read_structured<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} file: {}", what, path.display()))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {} file: {}", what, path.display()))
    } else {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse {} file: {}", what, path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_toml() {
        let job: Job = toml::from_str(
            r#"
query_pack_filters = ["acme/linux"]

[props]
owner = "ops"

[[inventory.assets]]
name = "web-1"
platform_ids = ["//platformid/host/web-1"]

[[inventory.assets.connections]]
type = "static"

[inventory.assets.facts]
arch = "x86_64"
platform = { name = "debian", version = "12" }

[[bundle.packs]]
uid = "linux"

[[bundle.packs.queries]]
uid = "os"
mql = "platform.name"
"#,
        )
        .unwrap();

        let inventory = job.inventory.unwrap();
        assert_eq!(inventory.assets.len(), 1);
        let asset = &inventory.assets[0];
        assert_eq!(asset.connections[0].kind, "static");
        assert_eq!(asset.facts.get("arch"), Some(&Value::from("x86_64")));
        assert_eq!(job.bundle.unwrap().packs[0].queries.len(), 1);
        assert_eq!(job.props.get("owner").map(String::as_str), Some("ops"));
    }

    #[test]
    fn test_human_name_fallbacks() {
        let mut asset = Asset::default();
        assert_eq!(asset.human_name(), "unnamed asset");
        asset.platform_ids.push("pid".to_string());
        assert_eq!(asset.human_name(), "pid");
        asset.mrn = "//m".to_string();
        assert_eq!(asset.human_name(), "//m");
        asset.name = "web".to_string();
        assert_eq!(asset.human_name(), "web");
    }

    #[test]
    fn test_inherit_labels_keeps_own_values() {
        let mut root = Asset::default();
        root.labels.insert("env".to_string(), "prod".to_string());
        root.labels.insert("team".to_string(), "ops".to_string());

        let mut child = Asset::default();
        child.labels.insert("env".to_string(), "dev".to_string());
        child.inherit_labels(&root);

        assert_eq!(child.labels.get("env").map(String::as_str), Some("dev"));
        assert_eq!(child.labels.get("team").map(String::as_str), Some("ops"));
    }
}
