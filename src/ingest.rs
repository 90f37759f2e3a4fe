//! Batch load orchestration (`reel load`).
//!
//! Coordinates the whole run: read the record file → embedding pre-check →
//! keyspace → pool dispatch under the ops/sec ceiling → drain → vector
//! index → summary. Setup failures abort before the first dispatch; item
//! failures are counted by the pool and never abort the batch.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::fetch::{HttpImageFetcher, ImageFetcher};
use crate::filter::RecordFilter;
use crate::models::RawRecord;
use crate::pipeline::Pipeline;
use crate::pool::{IngestPool, PoolStats};
use crate::progress::{self, ProgressEvent, ProgressMode, ProgressReporter};
use crate::store::sqlite::SqliteStore;
use crate::store::{DocumentStore, IndexStatus, VectorIndex};
use crate::throttle::Throttle;

/// Collaborators a load runs against.
pub struct LoadDeps {
    pub fetcher: Arc<dyn ImageFetcher>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn DocumentStore>,
}

/// Final accounting of one load.
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub total: u64,
    pub stats: PoolStats,
    pub index: IndexStatus,
    pub interrupted: bool,
    pub elapsed: Duration,
}

/// Parse the JSON array of records at `path`.
pub fn read_records(path: &Path) -> Result<Vec<RawRecord>> {
    if !path.exists() {
        bail!("input file not found: {}", path.display());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read input file {}", path.display()))?;
    let records: Vec<RawRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse input file {}", path.display()))?;
    Ok(records)
}

/// `reel load`.
pub async fn run_load(config: &Config, file: &Path, mode: ProgressMode) -> Result<()> {
    let records = read_records(file)?;
    tracing::info!("read {} records from {}", records.len(), file.display());

    let embedder: Arc<dyn Embedder> = Arc::from(embedding::create_embedder(&config.embedding)?);
    embedding::check_provider(embedder.as_ref()).await?;
    tracing::info!("embedding model '{}' reachable", embedder.model_name());

    let store = Arc::new(
        SqliteStore::connect(&config.db.path)
            .await
            .with_context(|| format!("failed to open database {}", config.db.path.display()))?,
    );
    let fetcher = Arc::new(HttpImageFetcher::new(Duration::from_secs(
        config.ingest.fetch_timeout_secs,
    ))?);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; draining in-flight records");
            on_signal.cancel();
        }
    });

    let reporter = mode.reporter();
    let deps = LoadDeps {
        fetcher,
        embedder,
        store: store.clone(),
    };
    let summary = load_records(config, records, deps, reporter.as_ref(), cancel).await?;
    if summary.interrupted && mode == ProgressMode::Human {
        eprintln!();
    }

    print_summary(file, config, &summary);
    store.close().await;
    Ok(())
}

/// Run `records` through the pipeline and create the vector index.
///
/// Returns once every dispatched record is terminal. Cancelling `cancel`
/// stops further dispatches; records already queued still finish.
pub async fn load_records(
    config: &Config,
    records: Vec<RawRecord>,
    deps: LoadDeps,
    reporter: &dyn ProgressReporter,
    cancel: CancellationToken,
) -> Result<LoadSummary> {
    let started = Instant::now();
    let keyspace = config.keyspace.keyspace();
    deps.store
        .ensure_keyspace(&keyspace)
        .await
        .with_context(|| format!("failed to provision keyspace {}", keyspace))?;

    let mut throttle = Throttle::new(
        config.ingest.ops_ceiling,
        Duration::from_millis(config.ingest.dispatch_delay_ms),
    )?;

    let pipeline = Pipeline::new(
        RecordFilter::from_config(&config.ingest),
        config.ingest.accepted_formats()?,
        deps.fetcher,
        deps.embedder.clone(),
        deps.store.clone(),
        keyspace.clone(),
    );
    let mut pool = IngestPool::new(
        Arc::new(pipeline),
        config.ingest.workers,
        config.ingest.queue_depth,
    );

    let total = records.len() as u64;
    let mut interrupted = false;
    for (i, record) in records.into_iter().enumerate() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                interrupted = true;
                break;
            }
            waited = throttle.acquire() => {
                if !waited.is_zero() {
                    tracing::debug!("throttled dispatch for {:?}", waited);
                }
            }
        }
        pool.dispatch(record).await?;

        let stats = pool.stats();
        reporter.report(&ProgressEvent {
            index: i as u64 + 1,
            total,
            errors: stats.errors,
            ops_per_sec: stats.ops_per_sec,
        });
        throttle.pause().await;
    }

    let stats = pool.join().await;
    pool.shutdown().await;

    let index = VectorIndex::new(
        &config.index.name,
        &config.index.field,
        deps.embedder.dims(),
    )?;
    let index_status = deps
        .store
        .create_vector_index(&keyspace, &index)
        .await
        .with_context(|| format!("failed to create vector index {}", index.name))?;

    let elapsed = started.elapsed();
    tracing::info!(
        "load completed in {} at {:.2} records/sec",
        progress::format_duration(elapsed),
        progress::throughput(stats.finished(), elapsed)
    );

    Ok(LoadSummary {
        total,
        stats,
        index: index_status,
        interrupted,
        elapsed,
    })
}

fn print_summary(file: &Path, config: &Config, summary: &LoadSummary) {
    let stats = &summary.stats;
    println!("load {}", file.display());
    println!("  keyspace: {}", config.keyspace.keyspace());
    println!("  records: {}", progress::format_number(summary.total));
    println!("  dispatched: {}", progress::format_number(stats.dispatched));
    println!("  completed: {}", progress::format_number(stats.completed));
    println!("  skipped: {}", progress::format_number(stats.skipped));
    println!("  errors: {}", progress::format_number(stats.errors));
    let status = match summary.index {
        IndexStatus::Created => "created",
        IndexStatus::AlreadyExists => "already exists",
    };
    println!("  vector index: {} ({})", config.index.name, status);
    println!("  duration: {}", progress::format_duration(summary.elapsed));
    println!(
        "  throughput: {:.2} records/sec",
        progress::throughput(stats.finished(), summary.elapsed)
    );
    if summary.interrupted {
        println!("interrupted");
    } else {
        println!("ok");
    }
}
