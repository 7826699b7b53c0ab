//! bqsync - scheduled-job entry point for syncing datasets into BigQuery

mod config;
mod input;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bqsync_bigquery::BigQueryConnector;
use bqsync_core::{fetch_rows, QuerySource, SyncMetrics, Synchronizer, TableId};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::JobConfig;

#[derive(Parser)]
#[command(name = "bqsync")]
#[command(about = "Reconcile tabular data into BigQuery tables")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Service account key file (overrides BIGQUERY_SERVICE_ACCOUNT_FILE_PATH)
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert new rows and update changed ones in a table
    Sync {
        /// JSON array or newline-delimited JSON objects
        #[arg(short, long)]
        input: PathBuf,

        /// Column identifying a row
        #[arg(short, long)]
        reference_column: String,

        /// Target as project.dataset.table, or dataset.table in the configured project
        #[arg(short, long)]
        table: String,

        /// Columns holding RFC 3339 timestamps
        #[arg(long = "timestamp-column")]
        timestamp_columns: Vec<String>,

        /// Write Prometheus text metrics here when the run ends
        #[arg(long, env = "BQSYNC_METRICS_FILE")]
        metrics_file: Option<PathBuf>,
    },

    /// Run a query and print the rows as newline-delimited JSON
    Query {
        /// Inline SQL
        #[arg(long, conflicts_with = "file")]
        sql: Option<String>,

        /// File containing the SQL
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Write rows here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins over --verbose.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = JobConfig::from_env()?;

    match cli.command {
        Commands::Sync {
            input,
            reference_column,
            table,
            timestamp_columns,
            metrics_file,
        } => {
            let table = resolve_table(&table, config.project.as_deref())?;
            run_sync(
                &config,
                cli.credentials,
                &input,
                &reference_column,
                &table,
                &timestamp_columns,
                metrics_file.as_deref(),
            )
            .await?;
        }
        Commands::Query { sql, file, output } => {
            run_query(&config, cli.credentials, sql, file, output.as_deref()).await?;
        }
    }

    Ok(())
}

/// Accept `project.dataset.table`, or `dataset.table` qualified with the
/// configured project.
fn resolve_table(name: &str, project: Option<&str>) -> Result<TableId> {
    if name.split('.').count() == 2 {
        let Some(project) = project else {
            bail!("Table '{}' has no project and BIGQUERY_PROJECT is not set", name);
        };
        return Ok(format!("{}.{}", project, name).parse()?);
    }
    Ok(name.parse()?)
}

async fn run_sync(
    config: &JobConfig,
    credentials: Option<PathBuf>,
    input: &Path,
    reference_column: &str,
    table: &TableId,
    timestamp_columns: &[String],
    metrics_file: Option<&Path>,
) -> Result<()> {
    info!("Loading dataset from {}", input.display());
    let dataset = input::load_dataset(input, timestamp_columns)?;
    info!(
        "Loaded {} rows x {} columns",
        dataset.num_rows(),
        dataset.num_columns()
    );

    let connector = BigQueryConnector::new(
        config.bigquery_settings(credentials),
        table.project.clone(),
    );
    let synchronizer = Synchronizer::new(connector, config.sync_options());
    let result = synchronizer.sync(&dataset, reference_column, table).await;

    if let Some(path) = metrics_file {
        write_metrics(synchronizer.metrics(), path)?;
    }

    match result {
        Ok(result) => {
            println!("{}", serde_json::to_string(&result)?);
            Ok(())
        }
        Err(e) => {
            error!("Sync of {} failed: {}", table, e);
            Err(e).with_context(|| format!("Failed to sync {}", table))
        }
    }
}

async fn run_query(
    config: &JobConfig,
    credentials: Option<PathBuf>,
    sql: Option<String>,
    file: Option<PathBuf>,
    output: Option<&Path>,
) -> Result<()> {
    let source = QuerySource::from_parts(sql, file)?;
    let connector = BigQueryConnector::new(
        config.bigquery_settings(credentials),
        config.project.clone().unwrap_or_default(),
    );
    let rows = fetch_rows(&connector, &source, &config.retry_policy()).await?;

    match output {
        Some(path) => {
            let mut file = std::io::BufWriter::new(
                std::fs::File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?,
            );
            input::write_ndjson(&mut file, &rows)?;
            info!("Wrote {} rows to {}", rows.len(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            input::write_ndjson(&mut stdout.lock(), &rows)?;
        }
    }
    Ok(())
}

fn write_metrics(metrics: &SyncMetrics, path: &Path) -> Result<()> {
    let text = metrics.encode().context("Failed to encode metrics")?;
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    info!("Metrics written to {}", path.display());
    Ok(())
}
