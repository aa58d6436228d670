//! Sumi-Ledger main entry point
//!
//! This is the command-line interface for the Sumi-Ledger crawl bookkeeper.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use sumi_ledger::committer::JsonLinesCommitter;
use sumi_ledger::config::{load_config_with_hash, Config, DataStoreConfig};
use sumi_ledger::crawler::{load_statistics, print_statistics, FileFetcher};
use sumi_ledger::reference::ResumePolicy;
use sumi_ledger::storage::{
    migrate_stores, open_engine, RunContext, DEFAULT_COMPACTION_THRESHOLD,
};
use sumi_ledger::Crawler;
use tracing_subscriber::EnvFilter;

/// Sumi-Ledger: crawl bookkeeping for resumable crawlers
///
/// Sumi-Ledger remembers which references a crawler has seen, detects
/// new, modified, unmodified and vanished documents between runs, and
/// resumes interrupted runs where they stopped.
#[derive(Parser, Debug)]
#[command(name = "sumi-ledger")]
#[command(version = "1.0.0")]
#[command(about = "Crawl bookkeeping for resumable crawlers", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the start references as local files (default)
    Crawl {
        /// Start a fresh crawl, ignoring an interrupted run
        #[arg(long)]
        fresh: bool,

        /// Append committed additions and removals to this JSON-lines file
        #[arg(long, value_name = "PATH")]
        commit_log: Option<PathBuf>,
    },

    /// Show statistics from the data stores and exit
    Stats,

    /// Delete every data store of the crawler
    Clean,

    /// Copy every data store to another engine
    Migrate {
        /// Target engine
        #[arg(long, value_enum)]
        to: EngineKind,

        /// Target store directory (log) or database file (sqlite)
        #[arg(long, value_name = "PATH")]
        target: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EngineKind {
    Log,
    Sqlite,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        return handle_dry_run(&config);
    }

    match cli.command.unwrap_or(Command::Crawl {
        fresh: false,
        commit_log: None,
    }) {
        Command::Crawl { fresh, commit_log } => handle_crawl(config, fresh, commit_log).await,
        Command::Stats => handle_stats(&config),
        Command::Clean => handle_clean(config),
        Command::Migrate { to, target } => handle_migrate(&config, to, target),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_ledger=info,warn"),
            1 => EnvFilter::new("sumi_ledger=debug,info"),
            2 => EnvFilter::new("sumi_ledger=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Sumi-Ledger Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Id: {}", config.crawler.id);
    println!("  Work directory: {}", config.crawler.work_dir.display());
    println!("  Threads: {}", config.crawler.num_threads);
    println!("  Orphans strategy: {:?}", config.crawler.orphans_strategy);
    println!("  Reject unmodified: {}", config.crawler.reject_unmodified);

    println!("\nData Store:");
    println!("  Engine: {}", config.data_store.engine_name());
    match &config.data_store {
        DataStoreConfig::Log {
            path,
            compaction_threshold,
        } => {
            println!("  Path: {}", path.as_deref().unwrap_or("(default)"));
            println!("  Compaction threshold: {}", compaction_threshold);
        }
        DataStoreConfig::Sqlite { connection } => {
            println!("  Connection: {}", connection.as_deref().unwrap_or("(default)"));
        }
    }

    println!("\nChecksums:");
    println!("  Document: {:?}", config.checksum.document);
    println!("  Metadata fields: {:?}", config.checksum.metadata_fields);

    let strategizer = &config.spoiled_references;
    println!("\nSpoiled References:");
    for (state, strategy) in strategizer.mappings() {
        println!("  {} -> {}", state, strategy);
    }
    println!("  (fallback) -> {}", strategizer.fallback_strategy());

    println!("\nStart References ({}):", config.crawler.start_references.len());
    for reference in &config.crawler.start_references {
        println!("  - {}", reference);
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the crawl command
async fn handle_crawl(
    config: Config,
    fresh: bool,
    commit_log: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let policy = if fresh {
        tracing::info!("Starting fresh crawl (ignoring previous state)");
        ResumePolicy::Fresh
    } else {
        tracing::info!("Starting crawl (will resume if interrupted run exists)");
        ResumePolicy::Auto
    };

    tracing::info!(
        "Crawler '{}' with {} start references on the {} engine",
        config.crawler.id,
        config.crawler.start_references.len(),
        config.data_store.engine_name()
    );

    let mut builder = Crawler::builder(config)
        .fetcher(Arc::new(FileFetcher))
        .resume_policy(policy);
    if let Some(path) = commit_log {
        tracing::info!("Committing to: {}", path.display());
        builder = builder.committer(Arc::new(JsonLinesCommitter::open(path)?));
    }
    let crawler = builder.build()?;

    let handle = crawler.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop();
        }
    });

    match crawler.run().await {
        Ok(stats) => {
            tracing::info!("Crawl completed successfully");
            print_statistics(&stats);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}

fn run_context(config: &Config) -> RunContext {
    RunContext::new(&config.crawler.id, &config.crawler.work_dir)
}

/// Handles the stats command: shows statistics from the data stores
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(&config.data_store);
    engine.init(&run_context(config))?;

    let result = (|| -> Result<(), Box<dyn std::error::Error>> {
        println!("Engine: {}\n", engine.kind());

        let stats = load_statistics(engine.as_ref())?;
        print_statistics(&stats);

        println!("\nStores:");
        for name in engine.store_names()? {
            let type_name = engine.store_type(&name)?.unwrap_or_default();
            println!("  {} ({})", name, type_name);
        }
        Ok(())
    })();

    engine.close()?;
    result
}

/// Handles the clean command
fn handle_clean(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let id = config.crawler.id.clone();
    let crawler = Crawler::builder(config).fetcher(Arc::new(FileFetcher)).build()?;

    if crawler.clean()? {
        println!("✓ Cleaned data stores of crawler '{}'", id);
    } else {
        println!("Nothing to clean for crawler '{}'", id);
    }
    Ok(())
}

/// Handles the migrate command
fn handle_migrate(
    config: &Config,
    to: EngineKind,
    target: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let target_config = match to {
        EngineKind::Log => DataStoreConfig::Log {
            path: Some(target),
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        },
        EngineKind::Sqlite => DataStoreConfig::Sqlite {
            connection: Some(target),
        },
    };

    let run = run_context(config);
    let source = open_engine(&config.data_store);
    let destination = open_engine(&target_config);
    source.init(&run)?;
    if let Err(e) = destination.init(&run) {
        source.close()?;
        return Err(e.into());
    }

    let result = migrate_stores(source.as_ref(), destination.as_ref());
    let closed_source = source.close();
    let closed_destination = destination.close();

    let copied = result?;
    closed_source?;
    closed_destination?;

    println!(
        "✓ Migrated {} entries from {} to {}",
        copied,
        config.data_store.engine_name(),
        target_config.engine_name()
    );
    Ok(())
}
