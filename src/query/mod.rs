//! Query compilation.
//!
//! The scanner never interprets query text itself. A [`QueryCompiler`] turns
//! a query into a [`CodeBundle`]: a checksum-addressed set of nodes, some of
//! which are datapoints (values worth storing) and some entrypoints (results
//! that are reported or used as filters).

pub mod compiler;

pub use compiler::SimpleCompiler;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ScanError;
use crate::models::{DataType, Value};

/// Turns query text into executable code.
pub trait QueryCompiler: Send + Sync {
    fn compile(&self, mql: &str) -> Result<CodeBundle, ScanError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
}

/// One computation in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Reads a fact by dotted path.
    Lookup { path: String },
    /// Compares a fact against a literal.
    Compare {
        path: String,
        op: CompareOp,
        literal: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub expr: Expr,
    pub data_type: DataType,
}

/// Compiled form of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBundle {
    /// Stable id of the compiled code; equal source yields equal ids.
    pub id: String,
    pub source: String,
    pub nodes: BTreeMap<String, Node>,
    datapoints: Vec<String>,
    entrypoints: Vec<String>,
}

impl CodeBundle {
    pub fn new(
        id: String,
        source: String,
        nodes: BTreeMap<String, Node>,
        datapoints: Vec<String>,
        entrypoints: Vec<String>,
    ) -> Self {
        Self {
            id,
            source,
            nodes,
            datapoints,
            entrypoints,
        }
    }

    /// Checksums of intermediate values that are stored but not reported.
    pub fn datapoint_checksums(&self) -> &[String] {
        &self.datapoints
    }

    /// Checksums of directly reportable results.
    pub fn entrypoint_checksums(&self) -> &[String] {
        &self.entrypoints
    }

    /// Every checksum this code produces a result for.
    pub fn all_checksums(&self) -> impl Iterator<Item = &String> {
        self.datapoints.iter().chain(self.entrypoints.iter())
    }

    pub fn declared_type(&self, checksum: &str) -> DataType {
        self.nodes
            .get(checksum)
            .map(|n| n.data_type)
            .unwrap_or_default()
    }
}
