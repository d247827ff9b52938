//! jobfeed-etl CLI - job-listing extraction, staging and warehouse loading.

use clap::{Parser, Subcommand};
use jobfeed_etl::source::{JobListingTransformer, JobSearchExtractor, SearchQuery};
use jobfeed_etl::{warehouse_pool, Config, EtlError, Pipeline, SqlRunner};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "jobfeed-etl")]
#[command(about = "Job-listing ETL: paginated API extraction, TSV staging, warehouse bulk loading")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file; falls back to environment variables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: extract, stage and bulk-load one search
    Run {
        /// Search terms
        #[arg(short, long)]
        query: String,

        /// Search location
        #[arg(short, long)]
        location: String,

        /// How many days back to search (default: 1)
        #[arg(long, default_value = "1")]
        days_back: u32,

        /// Name for this run in logs and summaries
        #[arg(long, default_value = "jobfeed")]
        run_name: String,
    },

    /// Execute SQL maintenance scripts against the warehouse
    Sql {
        /// Script files, executed in the order given
        #[arg(required = true)]
        scripts: Vec<PathBuf>,

        /// Commit the work; without this the transaction is discarded
        #[arg(long)]
        commit: bool,

        /// Run scripts across the worker pool, each committing on its
        /// own connection
        #[arg(long)]
        parallel: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), EtlError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| EtlError::Config(e.to_string()))?;

    let config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::from_env()?,
    };

    let pool = Arc::new(warehouse_pool(&config));

    match cli.command {
        Commands::Run {
            query,
            location,
            days_back,
            run_name,
        } => {
            let search = SearchQuery::new(query, location, days_back);
            let mut extractor = JobSearchExtractor::new(&config.api, search)?;
            let transformer = JobListingTransformer::new();

            let pipeline = Pipeline::new(config, pool);
            let summary = pipeline.run(&run_name, &mut extractor, &transformer).await?;

            if cli.output_json {
                println!("{}", summary.to_json()?);
            } else {
                println!("\nETL run completed!");
                println!("  Run ID: {}", summary.run_id);
                println!("  Records extracted: {}", summary.records_extracted);
                println!(
                    "  Rows staged: {} ({} malformed)",
                    summary.rows_written, summary.rows_malformed
                );
                println!("  Rows loaded: {}", summary.rows_loaded);
                println!("  Artifact: {}", summary.artifact.display());
                println!(
                    "  Stage: {:.2}s  Load: {:.2}s",
                    summary.stage_seconds, summary.load_seconds
                );
                if summary.upload_error {
                    println!("  WARNING: the warehouse rejected some rows; see the log");
                }
            }
        }

        Commands::Sql {
            scripts,
            commit,
            parallel,
        } => {
            let runner = SqlRunner::new(
                pool,
                config.etl.workers,
                config.warehouse.schema.clone(),
            );

            if parallel {
                if !commit {
                    warn!("--parallel always commits; --commit is implied");
                }
                let results = runner.exec_scripts_parallel(&scripts).await;
                let mut first_error = None;
                for (path, result) in scripts.iter().zip(results) {
                    match result {
                        Ok(affected) => {
                            println!("  {}: {} rows affected", path.display(), affected)
                        }
                        Err(e) => {
                            eprintln!("  {}: FAILED: {}", path.display(), e);
                            first_error.get_or_insert(e);
                        }
                    }
                }
                if let Some(e) = first_error {
                    return Err(e);
                }
            } else {
                let affected = runner.exec_scripts(&scripts, commit).await?;
                println!(
                    "Executed {} script(s), {} rows affected",
                    scripts.len(),
                    affected
                );
                if !commit {
                    println!("Not committed (pass --commit to keep the changes)");
                }
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
