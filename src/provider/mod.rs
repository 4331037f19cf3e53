//! Connections to scan targets.
//!
//! A [`Provider`] opens a [`Connection`] for one of an asset's configured
//! endpoints. The connection describes the asset as seen through it, lists
//! child assets found behind it, and hands out a [`QueryRuntime`] that runs
//! compiled code against the target.

pub mod static_provider;

pub use static_provider::StaticProvider;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::ScanError;
use crate::models::{Asset, ConnectionConfig, Inventory, RawResult, Value};
use crate::query::CodeBundle;

/// Receives results from a running query. May be called from any thread.
pub type ResultCollector = Arc<dyn Fn(RawResult) + Send + Sync>;

/// Runs compiled code against one connected asset.
pub trait QueryRuntime: Send + Sync {
    /// Starts executing `code`. Every produced result goes through `collect`,
    /// either before this returns or later from another task.
    fn execute(
        &self,
        code: &CodeBundle,
        props: &BTreeMap<String, Value>,
        collect: ResultCollector,
    ) -> Result<(), ScanError>;
}

pub trait Connection: Send + Sync {
    fn id(&self) -> u32;

    /// The asset as seen through this connection, platform details included.
    fn asset(&self) -> Asset;

    /// Child assets found behind this connection, if any.
    fn inventory(&self) -> Option<Inventory>;

    fn runtime(&self) -> Arc<dyn QueryRuntime>;

    fn close(&self);
}

pub trait Provider: Send + Sync {
    fn connect(
        &self,
        asset: &Asset,
        conf: &ConnectionConfig,
    ) -> Result<Box<dyn Connection>, ScanError>;
}

/// An open connection that is closed exactly once, at the latest on drop.
pub struct Runtime {
    connection: Box<dyn Connection>,
    closed: AtomicBool,
}

impl Runtime {
    pub fn new(connection: Box<dyn Connection>) -> Self {
        Self {
            connection,
            closed: AtomicBool::new(false),
        }
    }

    /// Opens the asset's first configured connection.
    pub fn connect(provider: &dyn Provider, asset: &Asset) -> Result<Self, ScanError> {
        let conf = asset.connections.first().ok_or_else(|| {
            ScanError::connection(asset.human_name(), "no connection configured")
        })?;
        provider.connect(asset, conf).map(Self::new)
    }

    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub fn asset(&self) -> Asset {
        self.connection.asset()
    }

    pub fn query_runtime(&self) -> Arc<dyn QueryRuntime> {
        self.connection.runtime()
    }

    #[allow(dead_code)] // close() is idempotent; callers never need to ask
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(connection = self.connection.id(), "closing connection");
            self.connection.close();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.close();
    }
}
