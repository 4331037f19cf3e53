//! Provider for assets described entirely in the inventory.
//!
//! A static asset carries a `facts` table that queries read from. Facts
//! under `props.` resolve from the job properties instead. Children listed
//! under `discovered` are reported as found behind the connection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::{Connection, Provider, QueryRuntime, ResultCollector};
use crate::error::ScanError;
use crate::models::{Asset, ConnectionConfig, Inventory, Platform, RawResult, Value};
use crate::query::{CodeBundle, CompareOp, Expr};

pub const CONNECTION_TYPE: &str = "static";
const PLATFORM_ID_PREFIX: &str = "//platformid.packscan.io/static";

#[derive(Debug, Default)]
pub struct StaticProvider {
    next_id: AtomicU32,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Provider for StaticProvider {
    fn connect(
        &self,
        asset: &Asset,
        conf: &ConnectionConfig,
    ) -> Result<Box<dyn Connection>, ScanError> {
        if conf.kind != CONNECTION_TYPE {
            return Err(ScanError::connection(
                asset.human_name(),
                format!("unsupported connection type '{}'", conf.kind),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(connection = id, asset = %asset.human_name(), "opened static connection");
        Ok(Box::new(StaticConnection::new(id, asset, conf)))
    }
}

struct StaticConnection {
    id: u32,
    asset: Asset,
    children: Vec<Asset>,
    runtime: Arc<StaticRuntime>,
}

impl StaticConnection {
    fn new(id: u32, asset: &Asset, conf: &ConnectionConfig) -> Self {
        let mut resolved = asset.clone();
        let children = std::mem::take(&mut resolved.discovered)
            .into_iter()
            .map(|mut child| {
                if child.connections.is_empty() {
                    child.connections.push(conf.clone());
                }
                child
            })
            .collect::<Vec<_>>();

        if resolved.platform.is_none() {
            resolved.platform = platform_from_facts(&resolved.facts);
        }
        // an asset that only groups children is traversed, not scanned
        if resolved.platform_ids.is_empty() && children.is_empty() && !resolved.name.is_empty() {
            resolved
                .platform_ids
                .push(format!("{}/{}", PLATFORM_ID_PREFIX, resolved.name));
        }

        let runtime = Arc::new(StaticRuntime::new(resolved.facts.clone()));
        Self {
            id,
            asset: resolved,
            children,
            runtime,
        }
    }
}

impl Connection for StaticConnection {
    fn id(&self) -> u32 {
        self.id
    }

    fn asset(&self) -> Asset {
        self.asset.clone()
    }

    fn inventory(&self) -> Option<Inventory> {
        if self.children.is_empty() {
            None
        } else {
            Some(Inventory {
                assets: self.children.clone(),
            })
        }
    }

    fn runtime(&self) -> Arc<dyn QueryRuntime> {
        self.runtime.clone()
    }

    fn close(&self) {
        trace!(connection = self.id, "closed static connection");
    }
}

/// Evaluates code synchronously against a fact table.
#[derive(Debug, Clone, Default)]
pub struct StaticRuntime {
    facts: Value,
}

impl StaticRuntime {
    pub fn new(facts: BTreeMap<String, Value>) -> Self {
        Self {
            facts: Value::Map(facts),
        }
    }

    fn lookup<'a>(
        &'a self,
        path: &str,
        props: &'a BTreeMap<String, Value>,
    ) -> Option<&'a Value> {
        match path.strip_prefix("props.") {
            Some(name) => props.get(name),
            None => self.facts.lookup(path),
        }
    }

    fn evaluate(
        &self,
        checksum: &str,
        expr: &Expr,
        props: &BTreeMap<String, Value>,
    ) -> RawResult {
        match expr {
            Expr::Lookup { path } => match self.lookup(path, props) {
                Some(value) => RawResult::new(checksum, value.clone()),
                None => RawResult::failed(checksum, format!("fact '{}' not found", path)),
            },
            Expr::Compare { path, op, literal } => {
                let actual = self.lookup(path, props).unwrap_or(&Value::Nil);
                let equal = loosely_equal(actual, literal);
                let matched = match op {
                    CompareOp::Eq => equal,
                    CompareOp::Ne => !equal,
                };
                RawResult::new(checksum, Value::Bool(matched))
            }
        }
    }
}

impl QueryRuntime for StaticRuntime {
    fn execute(
        &self,
        code: &CodeBundle,
        props: &BTreeMap<String, Value>,
        collect: ResultCollector,
    ) -> Result<(), ScanError> {
        for checksum in code.all_checksums() {
            let node = code.nodes.get(checksum).ok_or_else(|| {
                ScanError::Execution(format!(
                    "code {} has no node for checksum {}",
                    code.id, checksum
                ))
            })?;
            collect(self.evaluate(checksum, &node.expr, props));
        }
        Ok(())
    }
}

/// Equality that tolerates numbers and text written differently.
fn loosely_equal(actual: &Value, literal: &Value) -> bool {
    match (actual, literal) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        (Value::String(s), Value::Int(_) | Value::Float(_) | Value::Bool(_)) => {
            *s == literal.to_string()
        }
        _ => actual == literal,
    }
}

fn platform_from_facts(facts: &BTreeMap<String, Value>) -> Option<Platform> {
    let Value::Map(fields) = facts.get("platform")? else {
        return None;
    };
    let text = |key: &str| match fields.get(key) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    let family = match fields.get("family") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    Some(Platform {
        name: text("name"),
        kind: text("kind"),
        runtime: text("runtime"),
        version: text("version"),
        family,
    })
}
