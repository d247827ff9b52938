//! # jobfeed-etl
//!
//! Job-listing ETL library: pulls records from a paginated search API,
//! normalizes them into a fixed tabular schema, stages them as a
//! tab-delimited file and bulk-loads that file into an analytical
//! warehouse table, with SQL maintenance utilities layered on top.
//!
//! Core pieces:
//!
//! - **Connection pool** with bounded retry-with-backoff and
//!   health-checked return-to-pool
//! - **Extract/Transform/Stage** pipeline producing a TSV staging
//!   artifact (optionally gzip-compressed)
//! - **Bulk loader** driving the warehouse's native COPY, including
//!   load-error introspection and row-count reconciliation
//! - **SQL runner** for parameterized scripts, sequential or across a
//!   bounded worker pool, plus table maintenance helpers
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jobfeed_etl::{Config, Pipeline, warehouse_pool};
//! use jobfeed_etl::source::{JobListingTransformer, JobSearchExtractor, SearchQuery};
//!
//! #[tokio::main]
//! async fn main() -> jobfeed_etl::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let pool = Arc::new(warehouse_pool(&config));
//!     let search = SearchQuery::new("data engineer", "austin, tx", 1);
//!     let mut extractor = JobSearchExtractor::new(&config.api, search)?;
//!     let transformer = JobListingTransformer::new();
//!     let pipeline = Pipeline::new(config, pool);
//!     let summary = pipeline.run("nightly-jobs", &mut extractor, &transformer).await?;
//!     println!("Loaded {} rows", summary.rows_loaded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod pool;
pub mod source;
pub mod sql;
pub mod stage;
pub mod template;
pub mod transform;
pub mod value;

// Re-exports for convenient access
pub use config::{ApiConfig, AwsConfig, Config, EtlConfig, WarehouseConfig};
pub use error::{EtlError, Result};
pub use extract::{Extractor, Record, VecExtractor};
pub use load::{BulkLoader, LoadDiagnostic, LoadReport};
pub use pipeline::{timed, Pipeline, RunSummary};
pub use pool::{warehouse_pool, ConnectionManager, PgConnectionManager, Pool, PooledConn, WarehousePool};
pub use sql::SqlRunner;
pub use stage::{StagingReport, StagingWriter};
pub use template::render_template;
pub use transform::{StageSpec, Transformer};
pub use value::{FieldValue, Row};
