//! # Paperdex CLI (`pdx`)
//!
//! Commands for database initialization, conference crawling, search,
//! paper retrieval, and starting the HTTP API.
//!
//! ```bash
//! pdx --config ./config/pdx.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pdx init` | Create the SQLite database and schema |
//! | `pdx connectors` | List registered conference connectors |
//! | `pdx crawl <conference> --volume <v>` | Crawl one proceedings volume |
//! | `pdx search "<query>"` | Full-text or similarity search |
//! | `pdx get <id>` | Show a stored paper |
//! | `pdx serve` | Start the HTTP API server |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use paperdex::config::{self, Config};
use paperdex::connector::ConnectorRegistry;
use paperdex::connectors_cmd;
use paperdex::coordinator::CrawlCoordinator;
use paperdex::db;
use paperdex::embedding::{self, EmbeddingProvider};
use paperdex::migrate;
use paperdex::models::SearchScoreResult;
use paperdex::object_store::ObjectStore;
use paperdex::server;
use paperdex::store::PaperStore;

#[derive(Parser)]
#[command(
    name = "pdx",
    about = "Paperdex — conference paper ingestion and semantic retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pdx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// List registered conference connectors.
    Connectors,

    /// Crawl one conference volume: discover paper links, then fetch,
    /// persist, and embed each paper with a bounded worker pool.
    Crawl {
        /// Conference key (case-insensitive): neurips, pmlr, iclr.
        conference: String,

        /// Volume or year, e.g. 2023 for NeurIPS, 202 for PMLR v202.
        #[arg(long)]
        volume: String,

        /// Worker pool size (overrides [crawl].workers).
        #[arg(long)]
        workers: Option<usize>,

        /// Also download each paper's PDF into object storage.
        #[arg(long)]
        save_pdf: bool,

        /// Maximum number of links to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search stored papers.
    Search {
        query: String,

        /// Search mode: text (ranked full-text) or similarity (vectors).
        #[arg(long, default_value = "text")]
        mode: String,

        /// Maximum number of results (overrides [retrieval].top_k).
        #[arg(long)]
        top_k: Option<i64>,
    },

    /// Show a stored paper by id.
    Get { id: String },

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("paperdex=info,pdx=info")
        }))
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Connectors => {
            let registry = ConnectorRegistry::with_builtins(&config.crawl);
            connectors_cmd::list_connectors(&registry);
            Ok(())
        }
        Commands::Crawl {
            conference,
            volume,
            workers,
            save_pdf,
            limit,
        } => run_crawl(config, &conference, &volume, workers, save_pdf, limit).await,
        Commands::Search { query, mode, top_k } => run_search(&config, &query, &mode, top_k).await,
        Commands::Get { id } => run_get(&config, &id).await,
        Commands::Serve => run_serve(config).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("database initialized at {}", config.db.path.display());
    Ok(())
}

async fn run_crawl(
    mut config: Config,
    conference: &str,
    volume: &str,
    workers: Option<usize>,
    save_pdf: bool,
    limit: Option<usize>,
) -> Result<()> {
    if let Some(workers) = workers {
        config.crawl.workers = workers;
    }
    if save_pdf {
        config.crawl.save_pdf = true;
    }

    if !config.embedding.is_enabled() {
        bail!("crawling requires an embedding provider; set [embedding] provider in config");
    }

    // Resolve the connector before touching the network: an unknown
    // conference key must fail here.
    let registry = ConnectorRegistry::with_builtins(&config.crawl);
    let connector = registry.resolve(conference, volume)?;

    let provider: Arc<dyn EmbeddingProvider> = embedding::create_provider(&config.embedding)?;

    let objects = if config.crawl.save_pdf {
        if !config.storage.enabled {
            bail!("--save-pdf requires [storage] to be enabled in config");
        }
        Some(Arc::new(ObjectStore::new(config.storage.clone())?))
    } else {
        None
    };

    let pool = db::connect(&config).await?;
    migrate::run_migrations(&pool).await?;
    let store = Arc::new(
        PaperStore::new(pool).with_overfetch_factor(config.retrieval.overfetch_factor),
    );

    let coordinator = CrawlCoordinator::new(
        connector.into(),
        store.clone(),
        provider,
        objects,
        &config.crawl,
        &config.chunking,
    )?;

    let report = coordinator.crawl(limit).await?;

    println!("crawl {} v{}", conference.to_lowercase(), volume);
    println!("  discovered: {} links", report.discovered);
    println!("  ingested: {} papers", report.succeeded);
    println!("  failed: {}", report.failed);
    println!("  chunks written: {}", report.chunks_written);
    println!("ok");

    store.pool().close().await;
    Ok(())
}

async fn run_search(config: &Config, query: &str, mode: &str, top_k: Option<i64>) -> Result<()> {
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let store =
        PaperStore::new(pool).with_overfetch_factor(config.retrieval.overfetch_factor);

    let results = match mode {
        "text" => store.text_search(query, top_k).await?,
        "similarity" => {
            let metric = config.retrieval.metric()?;
            let provider = embedding::create_provider(&config.embedding)?;
            let vectors = provider
                .embed(&[query.to_string()])
                .await
                .context("failed to embed query")?;
            let query_vec = vectors
                .into_iter()
                .next()
                .context("empty embedding response")?;
            store.similarity_search(&query_vec, top_k, metric).await?
        }
        other => bail!("unknown search mode: '{}'. Use text or similarity.", other),
    };

    if results.is_empty() {
        println!("No results.");
    } else {
        print_results(&results);
    }

    store.pool().close().await;
    Ok(())
}

fn print_results(results: &[SearchScoreResult]) {
    for (i, result) in results.iter().enumerate() {
        let conference = result.paper.conference.as_deref().unwrap_or("-");
        println!("{}. [{:.4}] {} / {}", i + 1, result.score, conference, result.paper.title);
        println!("    authors: {}", result.paper.authors.join(", "));
        println!(
            "    published: {}",
            result.paper.publication_date.format("%Y-%m-%d")
        );
        if let Some(ref url) = result.paper.url {
            println!("    url: {}", url);
        }
        println!("    id: {}", result.paper.id);
        println!();
    }
}

async fn run_get(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let store = PaperStore::new(pool);

    let Some(paper) = store.get_by_id(id).await? else {
        bail!("paper not found: {}", id);
    };

    println!("{}", paper.title);
    println!("  conference: {}", paper.conference.as_deref().unwrap_or("-"));
    println!("  authors: {}", paper.authors.join(", "));
    println!("  published: {}", paper.publication_date.format("%Y-%m-%d"));
    if let Some(ref url) = paper.url {
        println!("  url: {}", url);
    }
    if !paper.keywords.is_empty() {
        println!("  keywords: {}", paper.keywords.join(", "));
    }
    if let Some(ref abstract_text) = paper.abstract_text {
        println!("  abstract: {}", abstract_text);
    }

    let chunks = store.chunks_for_paper(id).await?;
    println!("  embedded chunks: {}", chunks.len());
    println!("  id: {}", paper.id);

    store.pool().close().await;
    Ok(())
}

async fn run_serve(config: Config) -> Result<()> {
    let pool = db::connect(&config).await?;
    migrate::run_migrations(&pool).await?;
    let store = Arc::new(
        PaperStore::new(pool).with_overfetch_factor(config.retrieval.overfetch_factor),
    );

    let provider: Arc<dyn EmbeddingProvider> = embedding::create_provider(&config.embedding)?;

    let objects = if config.storage.enabled {
        Some(Arc::new(ObjectStore::new(config.storage.clone())?))
    } else {
        None
    };

    server::run_server(Arc::new(config), store, objects, provider).await
}
