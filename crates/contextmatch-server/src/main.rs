//! ContextMatch Server
//!
//! HTTP surface for the contextual ad-matching pipeline:
//!
//! - `POST /analyze`       analyze one content bundle
//! - `POST /analyze/batch` analyze several bundles, bounded concurrency
//! - `GET  /health`        readiness and index size
//! - `GET  /categories`    index statistics and taxonomy sources
//! - `GET  /performance`   per-stage latency summaries
//!
//! Logs go to stderr so stdout stays clean for tooling.

mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use contextmatch_core::{Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(
    name = "contextmatch-server",
    version,
    about = "Contextual ad-matching engine over HTTP"
)]
struct Args {
    /// Address to bind the HTTP server to (host:port)
    #[arg(long, env = "CONTEXTMATCH_BIND", default_value = "127.0.0.1:8700")]
    bind: String,

    /// Taxonomy snapshot (JSON) loaded at startup
    #[arg(long, env = "CONTEXTMATCH_TAXONOMY")]
    taxonomy: Option<PathBuf>,

    /// Data directory for the durable category index
    #[arg(long, env = "CONTEXTMATCH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Run without persistence (in-memory index only)
    #[arg(long)]
    ephemeral: bool,

    /// Maximum matches a request may ask for
    #[arg(long, default_value_t = 50)]
    top_k_limit: usize,

    /// Matches returned when the request does not specify topK
    #[arg(long, default_value_t = 3)]
    default_top_k: usize,

    /// End-to-end deadline per request, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    budget_ms: u64,

    /// Result cache time-to-live, in seconds
    #[arg(long, default_value_t = 30)]
    cache_ttl_secs: u64,

    /// Text-encode coalescing window in milliseconds; 0 disables coalescing
    #[arg(long, default_value_t = 5)]
    coalesce_ms: u64,

    /// Analyses run concurrently within one batch request
    #[arg(long, default_value_t = 4)]
    batch_concurrency: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = PipelineConfig {
        top_k_limit: args.top_k_limit.max(1),
        default_top_k: args.default_top_k.max(1),
        total_budget: Duration::from_millis(args.budget_ms.max(1)),
        cache_ttl: Duration::from_secs(args.cache_ttl_secs),
        coalescing_window: (args.coalesce_ms > 0)
            .then(|| Duration::from_millis(args.coalesce_ms)),
        batch_concurrency: args.batch_concurrency.max(1),
        ..PipelineConfig::default()
    };

    let pipeline = if args.ephemeral {
        Pipeline::in_memory(config)
    } else {
        Pipeline::open(args.data_dir.clone(), config).context("failed to open category index")?
    };

    if let Some(path) = &args.taxonomy {
        // Taxonomy embedding is compute-bound; keep it off the runtime.
        let loader = pipeline.clone();
        let path = path.clone();
        let count = tokio::task::spawn_blocking(move || loader.load_taxonomy_snapshot(&path))
            .await
            .context("taxonomy load task failed")?
            .context("failed to load taxonomy snapshot")?;
        info!(categories = count, "taxonomy loaded");
    } else if pipeline.index().is_empty() {
        tracing::warn!("no taxonomy loaded; /analyze will answer INDEX_NOT_READY");
    }

    let app = routes::router(pipeline).layer(CorsLayer::permissive());

    let addr: SocketAddr = args
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", args.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "contextmatch-server listening");

    axum::serve(listener, app).await.context("server shutdown")?;
    Ok(())
}
