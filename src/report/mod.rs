//! Report aggregation and rendering.

pub mod aggregator;
pub mod generator;

pub use aggregator::AggregateReporter;
pub use generator::{render, write_report, ReportOptions};
