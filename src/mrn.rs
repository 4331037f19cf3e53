//! Resource names (MRNs).
//!
//! An MRN looks like `//service.name/collection/id/collection/id`. The
//! service name is the first path segment; everything after it is the
//! relative resource name.

use std::fmt;
use uuid::Uuid;

use crate::error::ScanError;

pub const REGISTRY_SERVICE_NAME: &str = "registry.packscan.io";
pub const EXPLORER_SERVICE_NAME: &str = "explorer.packscan.io";
pub const LOCAL_OWNER_MRN: &str = "//local.packscan.io/spaces/local";

pub const COLLECTION_NAMESPACE: &str = "namespace";
pub const COLLECTION_QUERYPACKS: &str = "querypacks";
pub const COLLECTION_QUERIES: &str = "queries";
pub const COLLECTION_ASSETS: &str = "assets";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mrn {
    pub service_name: String,
    pub relative_resource_name: String,
}

impl Mrn {
    pub fn parse(raw: &str) -> Result<Self, ScanError> {
        let rest = raw
            .strip_prefix("//")
            .ok_or_else(|| ScanError::Validation(format!("mrn '{}' must start with //", raw)))?;

        let (service, relative) = rest.split_once('/').unwrap_or((rest, ""));
        if service.is_empty() {
            return Err(ScanError::Validation(format!(
                "mrn '{}' has no service name",
                raw
            )));
        }

        Ok(Self {
            service_name: service.to_string(),
            relative_resource_name: relative.trim_matches('/').to_string(),
        })
    }

    /// Returns the id following `collection` in the resource path.
    pub fn resource(&self, collection: &str) -> Option<&str> {
        let mut parts = self.relative_resource_name.split('/');
        while let Some(part) = parts.next() {
            if part == collection {
                return parts.next().filter(|id| !id.is_empty());
            }
        }
        None
    }
}

impl fmt::Display for Mrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relative_resource_name.is_empty() {
            write!(f, "//{}", self.service_name)
        } else {
            write!(f, "//{}/{}", self.service_name, self.relative_resource_name)
        }
    }
}

/// Extracts the id of `collection` from a raw MRN.
pub fn resource(raw: &str, collection: &str) -> Option<String> {
    Mrn::parse(raw)
        .ok()
        .and_then(|m| m.resource(collection).map(String::from))
}

pub fn query_pack_mrn(namespace: &str, uid: &str) -> String {
    format!(
        "//{}/{}/{}/{}/{}",
        REGISTRY_SERVICE_NAME, COLLECTION_NAMESPACE, namespace, COLLECTION_QUERYPACKS, uid
    )
}

/// A random MRN for assets that arrive without one.
pub fn new_asset_mrn() -> String {
    format!(
        "//{}/{}/{}",
        EXPLORER_SERVICE_NAME,
        COLLECTION_ASSETS,
        Uuid::new_v4()
    )
}

/// Derives the MRN of a child object from its owner.
///
/// An existing MRN always wins; otherwise the uid is appended to the owner
/// under `collection`.
pub fn refresh_mrn(
    owner_mrn: &str,
    existing: &str,
    collection: &str,
    uid: &str,
) -> Result<String, ScanError> {
    if !existing.is_empty() {
        return Ok(existing.to_string());
    }
    if uid.is_empty() {
        return Err(ScanError::Validation(format!(
            "cannot derive {} mrn under {}: neither mrn nor uid is set",
            collection, owner_mrn
        )));
    }
    Ok(format!(
        "{}/{}/{}",
        owner_mrn.trim_end_matches('/'),
        collection,
        uid
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let m = Mrn::parse("//registry.packscan.io/namespace/acme/querypacks/linux").unwrap();
        assert_eq!(m.service_name, "registry.packscan.io");
        assert_eq!(m.resource(COLLECTION_QUERYPACKS), Some("linux"));
        assert_eq!(m.resource(COLLECTION_NAMESPACE), Some("acme"));
        assert_eq!(m.resource(COLLECTION_QUERIES), None);
        assert_eq!(
            m.to_string(),
            "//registry.packscan.io/namespace/acme/querypacks/linux"
        );
    }

    #[test]
    fn test_parse_rejects_relative() {
        assert!(Mrn::parse("querypacks/linux").is_err());
        assert!(Mrn::parse("///x").is_err());
    }

    #[test]
    fn test_query_pack_mrn() {
        assert_eq!(
            query_pack_mrn("acme", "linux"),
            "//registry.packscan.io/namespace/acme/querypacks/linux"
        );
    }

    #[test]
    fn test_new_asset_mrns_are_unique() {
        let a = new_asset_mrn();
        let b = new_asset_mrn();
        assert_ne!(a, b);
        assert!(resource(&a, COLLECTION_ASSETS).is_some());
    }

    #[test]
    fn test_refresh_mrn() {
        assert_eq!(
            refresh_mrn(LOCAL_OWNER_MRN, "", COLLECTION_QUERIES, "uname").unwrap(),
            "//local.packscan.io/spaces/local/queries/uname"
        );
        assert_eq!(
            refresh_mrn(LOCAL_OWNER_MRN, "//x/y", COLLECTION_QUERIES, "uname").unwrap(),
            "//x/y"
        );
        assert!(refresh_mrn(LOCAL_OWNER_MRN, "", COLLECTION_QUERIES, "").is_err());
    }
}
