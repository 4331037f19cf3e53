//! Test doubles for providers, connections and query runtimes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::ScanError;
use crate::models::{Asset, ConnectionConfig, Inventory, RawResult, Value};
use crate::progress::Progress;
use crate::provider::{Connection, Provider, QueryRuntime, ResultCollector};
use crate::query::CodeBundle;

/// Answers every checksum with a scripted value.
pub struct MockRuntime {
    pub values: BTreeMap<String, Value>,
    pub default: Value,
    /// Checksums that never produce a result.
    pub withhold: BTreeSet<String>,
    /// Delivers results from a spawned task after this delay.
    pub delay: Option<Duration>,
    pub fail: bool,
    pub executed: AtomicUsize,
}

impl MockRuntime {
    pub fn answering(default: Value) -> Self {
        Self {
            values: BTreeMap::new(),
            default,
            withhold: BTreeSet::new(),
            delay: None,
            fail: false,
            executed: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::answering(Value::Nil)
        }
    }
}

impl QueryRuntime for MockRuntime {
    fn execute(
        &self,
        code: &CodeBundle,
        _props: &BTreeMap<String, Value>,
        collect: ResultCollector,
    ) -> Result<(), ScanError> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ScanError::Execution(format!("cannot run {}", code.source)));
        }

        let results: Vec<RawResult> = code
            .all_checksums()
            .filter(|c| !self.withhold.contains(*c))
            .map(|c| {
                let value = self.values.get(c).cloned().unwrap_or_else(|| self.default.clone());
                RawResult::new(c, value)
            })
            .collect();

        match self.delay {
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for res in results {
                        collect(res);
                    }
                });
            }
            None => results.into_iter().for_each(|res| collect(res)),
        }
        Ok(())
    }
}

struct MockConnection {
    id: u32,
    asset: Asset,
    children: Vec<Asset>,
    runtime: Arc<dyn QueryRuntime>,
    closed: Arc<AtomicUsize>,
}

impl Connection for MockConnection {
    fn id(&self) -> u32 {
        self.id
    }

    fn asset(&self) -> Asset {
        self.asset.clone()
    }

    fn inventory(&self) -> Option<Inventory> {
        (!self.children.is_empty()).then(|| Inventory {
            assets: self.children.clone(),
        })
    }

    fn runtime(&self) -> Arc<dyn QueryRuntime> {
        self.runtime.clone()
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connects to anything except the asset names listed in `failing`.
pub struct MockProvider {
    pub runtime: Arc<dyn QueryRuntime>,
    pub failing: BTreeSet<String>,
    next_id: AtomicU32,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::with_runtime(Arc::new(MockRuntime::answering(Value::Bool(true))))
    }

    pub fn with_runtime(runtime: Arc<dyn QueryRuntime>) -> Self {
        Self {
            runtime,
            failing: BTreeSet::new(),
            next_id: AtomicU32::new(0),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_for(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Provider for MockProvider {
    fn connect(
        &self,
        asset: &Asset,
        conf: &ConnectionConfig,
    ) -> Result<Box<dyn Connection>, ScanError> {
        if self.failing.contains(&asset.name) {
            return Err(ScanError::connection(asset.human_name(), "connection refused"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let mut resolved = asset.clone();
        let children = std::mem::take(&mut resolved.discovered)
            .into_iter()
            .map(|mut child| {
                if child.connections.is_empty() {
                    child.connections.push(conf.clone());
                }
                child
            })
            .collect();

        Ok(Box::new(MockConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            asset: resolved,
            children,
            runtime: self.runtime.clone(),
            closed: self.closed.clone(),
        }))
    }
}

/// Records every progress event.
#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

impl Progress for RecordingProgress {
    fn on_progress(&self, current: usize, total: usize) {
        self.events.lock().push(format!("{}/{}", current, total));
    }

    fn errored(&self) {
        self.events.lock().push("errored".to_string());
    }

    fn not_applicable(&self) {
        self.events.lock().push("not_applicable".to_string());
    }

    fn completed(&self) {
        self.events.lock().push("completed".to_string());
    }
}

/// A scannable asset reached through a mock connection.
pub fn mock_asset(name: &str, platform_ids: &[&str]) -> Asset {
    Asset {
        name: name.to_string(),
        platform_ids: platform_ids.iter().map(|s| s.to_string()).collect(),
        connections: vec![ConnectionConfig {
            kind: "mock".to_string(),
            ..ConnectionConfig::default()
        }],
        ..Asset::default()
    }
}
