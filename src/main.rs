use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use regsync::config::{RegistryConfig, SyncConfig};
use regsync::registry::RegistryManager;
use regsync::store::{CacheStore, CatalogStore, JobQueue, SqliteStore, Store};
use regsync::sync::{Scheduler, SyncEngine, WorkerPool};
use regsync::types::JobStatus;

#[derive(Parser)]
#[command(name = "regsync", version)]
#[command(about = "Mirror container registry metadata into SQLite", long_about = None)]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record registry health and queue catalog and tag scans
    Sync {
        /// Process the queue on this thread until it is empty
        #[arg(long)]
        wait: bool,
    },

    /// Run the worker pool until interrupted
    Worker {
        /// Number of worker threads (overrides SYNC_WORKERS)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Recompute cached repository and tag aggregates
    Refresh {
        /// Recompute every row instead of only dirty ones
        #[arg(long)]
        full: bool,
    },

    /// Show mirrored registries, cache contents and queue state
    Status,
}

fn open_store(config: &SyncConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::new(&config.database_path).with_context(|| {
        format!("Failed to open database {}", config.database_path.display())
    })?;
    store.initialize()?;
    Ok(Arc::new(store))
}

fn run_sync(config: &SyncConfig, wait: bool) -> anyhow::Result<()> {
    let registries = RegistryConfig::load_from_env()?;
    let store = open_store(config)?;
    let manager = Arc::new(RegistryManager::from_configs(
        &registries,
        config.request_timeout,
    )?);

    let report = Scheduler::new(store.clone(), manager.clone(), config.max_attempts)
        .schedule(&registries)?;
    println!(
        "Queued {} jobs ({} registries removed, {} recreated)",
        report.jobs_queued, report.registries_removed, report.registries_recreated
    );

    if wait {
        let drained = SyncEngine::new(store, manager, config).drain()?;
        println!(
            "Processed {} jobs ({} failed)",
            drained.completed + drained.failed,
            drained.failed
        );
    }

    Ok(())
}

async fn run_worker(config: SyncConfig) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // The blocking HTTP clients must be built off the async runtime.
    let token = cancel.clone();
    let pool = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let registries = RegistryConfig::load_from_env()?;
        let store = open_store(&config)?;
        let manager = Arc::new(RegistryManager::from_configs(
            &registries,
            config.request_timeout,
        )?);
        let engine = Arc::new(SyncEngine::new(store, manager, &config));
        Ok(WorkerPool::new(engine, &config).start(token)?)
    })
    .await??;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, waiting for in-flight jobs");
    cancel.cancel();
    tokio::task::spawn_blocking(move || pool.wait()).await?;

    Ok(())
}

fn run_refresh(config: &SyncConfig, full: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let counts = if full {
        store.refresh_all()?
    } else {
        store.refresh_all_dirty()?
    };
    println!(
        "Refreshed {} repositories and {} tags",
        counts.repositories, counts.tags
    );
    Ok(())
}

fn run_status(config: &SyncConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;

    let registries = store.list_registries()?;
    println!("Registries: {}", registries.len());
    for registry in &registries {
        let status = match registry.last_status {
            Some(-1) => "unreachable".to_string(),
            Some(code) => code.to_string(),
            None => "unknown".to_string(),
        };
        println!("  {} ({}) status={status}", registry.name, registry.host);
    }

    let stats = store.list_repository_stats()?;
    println!("Repositories: {}", stats.len());
    for repo in &stats {
        println!(
            "  {}/{} tags={} size={} arch={}",
            repo.registry_name,
            repo.name,
            repo.tags_count,
            repo.total_size,
            repo.architectures.join(",")
        );
    }

    println!("Jobs:");
    for status in JobStatus::ALL {
        println!("  {status}: {}", store.count_jobs_by_status(status)?);
    }
    for job in store.list_dead_jobs()? {
        println!(
            "  dead #{} {} {}: {}",
            job.id,
            job.job_type,
            job.registry_name,
            job.error_message.unwrap_or_default()
        );
    }

    let dirty = store.count_dirty()?;
    println!(
        "Dirty: {} repositories, {} tags",
        dirty.repositories, dirty.tags
    );

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("regsync=info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = SyncConfig::from_env()?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    match cli.command {
        Commands::Sync { wait } => {
            tokio::task::spawn_blocking(move || run_sync(&config, wait)).await??;
        }
        Commands::Worker { workers } => {
            if let Some(workers) = workers {
                config.workers = workers.max(1);
            }
            run_worker(config).await?;
        }
        Commands::Refresh { full } => run_refresh(&config, full)?,
        Commands::Status => run_status(&config)?,
    }

    Ok(())
}
