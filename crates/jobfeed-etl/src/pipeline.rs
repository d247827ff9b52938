//! Pipeline orchestration: extract, stage, rebuild and bulk-load in one
//! run, with per-phase timing.

use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::extract::Extractor;
use crate::load::BulkLoader;
use crate::pool::WarehousePool;
use crate::stage::StagingWriter;
use crate::transform::Transformer;

/// Await a future and measure how long it took.
pub async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let start = Instant::now();
    let output = fut.await;
    (output, start.elapsed())
}

/// What one pipeline run did, for logging and machine-readable output.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub run_name: String,
    pub records_extracted: u64,
    pub rows_written: u64,
    pub rows_malformed: u64,
    pub rows_loaded: u64,
    pub upload_error: bool,
    pub artifact: PathBuf,
    pub stage_seconds: f64,
    pub load_seconds: f64,
}

impl RunSummary {
    /// Machine-readable rendition for `--output-json`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Drives one extract-stage-load run end to end.
///
/// The staging artifact is left on disk after the run; cleanup or
/// archival is the caller's concern.
pub struct Pipeline {
    config: Config,
    pool: Arc<WarehousePool>,
}

impl Pipeline {
    pub fn new(config: Config, pool: Arc<WarehousePool>) -> Self {
        Self { config, pool }
    }

    /// The shared connection pool, for running maintenance alongside.
    pub fn pool(&self) -> Arc<WarehousePool> {
        self.pool.clone()
    }

    /// Run the full pipeline: stage the extract/transform stream into an
    /// artifact, rebuild the staging table and COPY the artifact in.
    pub async fn run<E, T>(
        &self,
        run_name: &str,
        extractor: &mut E,
        transformer: &T,
    ) -> Result<RunSummary>
    where
        E: Extractor + ?Sized,
        T: Transformer + ?Sized,
    {
        let run_id = Uuid::new_v4().to_string();
        info!("=== Run {} ({}) starting ===", run_name, run_id);

        info!("--- Phase 1: staging ---");
        let writer = StagingWriter::from_config(&self.config);
        let (staging, stage_elapsed) = timed(writer.write(extractor, transformer)).await;
        let staging = staging?;
        info!(
            "Staging finished in {:.2}s ({} rows)",
            stage_elapsed.as_secs_f64(),
            staging.rows_written
        );

        info!("--- Phase 2: loading ---");
        let loader = BulkLoader::new(self.pool.clone(), transformer, &self.config)?
            .with_artifact(&staging.path);
        loader.rebuild_stage_table(true).await?;
        let (load, load_elapsed) = timed(loader.load(None, false)).await;
        let load = load?;
        info!(
            "Load finished in {:.2}s ({} rows)",
            load_elapsed.as_secs_f64(),
            load.rows_loaded
        );

        let summary = RunSummary {
            run_id,
            run_name: run_name.to_string(),
            records_extracted: staging.records_extracted,
            rows_written: staging.rows_written,
            rows_malformed: staging.rows_malformed,
            rows_loaded: load.rows_loaded,
            upload_error: load.upload_error,
            artifact: staging.path,
            stage_seconds: stage_elapsed.as_secs_f64(),
            load_seconds: load_elapsed.as_secs_f64(),
        };
        info!("=== Run {} complete ===", summary.run_name);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timed_measures_elapsed() {
        let ((), elapsed) = timed(tokio::time::sleep(Duration::from_secs(3))).await;
        assert_eq!(elapsed.as_secs(), 3);
    }

    #[test]
    fn test_run_summary_serializes() {
        let summary = RunSummary {
            run_id: "id".to_string(),
            run_name: "nightly".to_string(),
            records_extracted: 10,
            rows_written: 10,
            rows_malformed: 0,
            rows_loaded: 10,
            upload_error: false,
            artifact: PathBuf::from("/tmp/jobs.tsv"),
            stage_seconds: 1.5,
            load_seconds: 2.5,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["run_name"], "nightly");
        assert_eq!(json["rows_loaded"], 10);
    }
}
