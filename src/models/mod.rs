//! Data models shared across the scan pipeline.

pub mod asset;
pub mod bundle;
pub mod report;
pub mod value;

pub use asset::{Asset, ConnectionConfig, Inventory, Job, Platform};
pub use bundle::{preprocess_query_pack_filters, Bundle, Query, QueryPack};
pub use report::{
    AssetReport, DataQueryInfo, Datum, ExecutionJob, ExecutionQuery, Report, ReportCollection,
    ResolvedPack,
};
pub use value::{DataType, RawResult, Value};
