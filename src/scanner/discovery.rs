//! Asset discovery and deduplication by platform ID.

use std::collections::HashSet;
use tracing::{debug, error};

use crate::error::ScanError;
use crate::models::{Asset, Inventory};
use crate::provider::{Provider, Runtime};

pub struct AssetWithRuntime {
    pub asset: Asset,
    pub runtime: Runtime,
}

#[derive(Debug)]
pub struct AssetWithError {
    pub asset: Asset,
    pub error: ScanError,
}

/// Unique assets found during discovery, plus the ones that failed to connect.
#[derive(Default)]
pub struct DiscoveredAssets {
    platform_ids: HashSet<String>,
    pub assets: Vec<AssetWithRuntime>,
    pub errors: Vec<AssetWithError>,
}

impl DiscoveredAssets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the asset unless one of its platform IDs was already claimed.
    /// A rejected asset's runtime is closed right away.
    pub fn add(&mut self, asset: Asset, runtime: Runtime) -> bool {
        if asset.platform_ids.iter().any(|id| self.platform_ids.contains(id)) {
            debug!(asset = %asset.human_name(), "discovery> skipping duplicate asset");
            runtime.close();
            return false;
        }

        self.platform_ids.extend(asset.platform_ids.iter().cloned());
        self.assets.push(AssetWithRuntime { asset, runtime });
        true
    }

    pub fn add_error(&mut self, asset: Asset, error: ScanError) {
        self.errors.push(AssetWithError { asset, error });
    }

    /// Assets carrying `platform_id`, or every asset for an empty id.
    #[allow(dead_code)] // lookup for upstream callers; the local scanner walks every asset
    pub fn get_assets_by_platform_id(&self, platform_id: &str) -> Vec<&AssetWithRuntime> {
        self.assets
            .iter()
            .filter(|a| {
                platform_id.is_empty() || a.asset.platform_ids.iter().any(|p| p == platform_id)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn close_all(&self) {
        for a in &self.assets {
            a.runtime.close();
        }
    }
}

/// Connects to every inventory asset and everything found behind them.
pub fn discover_assets(
    inventory: &Inventory,
    provider: &dyn Provider,
) -> Result<DiscoveredAssets, ScanError> {
    if inventory.assets.is_empty() {
        return Err(ScanError::Validation(
            "could not find an asset that we can connect to".to_string(),
        ));
    }

    let mut discovered = DiscoveredAssets::new();
    for root in &inventory.assets {
        let runtime = match Runtime::connect(provider, root) {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(asset = %root.human_name(), "Unable to create runtime for asset: {}", e);
                discovered.add_error(root.clone(), e);
                continue;
            }
        };

        let mut resolved = runtime.asset();
        let children = runtime
            .connection()
            .inventory()
            .map(|inv| inv.assets)
            .unwrap_or_default();

        if resolved.platform_ids.is_empty() {
            runtime.close();
        } else {
            resolved.inherit_labels(root);
            discovered.add(resolved.clone(), runtime);
        }

        discover_children(children, &resolved, provider, &mut discovered);
    }

    if discovered.len() == 1 {
        let name = &inventory.assets[0].name;
        let asset = &mut discovered.assets[0].asset;
        if !name.is_empty() && *name != asset.name {
            debug!(asset = %asset.name, "discovery> overriding asset name with {}", name);
            asset.name = name.clone();
        }
    }

    Ok(discovered)
}

fn discover_children(
    children: Vec<Asset>,
    root: &Asset,
    provider: &dyn Provider,
    discovered: &mut DiscoveredAssets,
) {
    for child in children {
        let runtime = match Runtime::connect(provider, &child) {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(asset = %child.human_name(), "Unable to create runtime for asset: {}", e);
                discovered.add_error(child, e);
                continue;
            }
        };

        let mut resolved = runtime.asset();
        if resolved.platform_ids.is_empty() {
            let grandchildren = runtime
                .connection()
                .inventory()
                .map(|inv| inv.assets)
                .unwrap_or_default();
            runtime.close();
            discover_children(grandchildren, root, provider, discovered);
        } else {
            resolved.inherit_labels(root);
            discovered.add(resolved, runtime);
        }
    }
}
