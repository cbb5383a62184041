use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tiller_core::config::LogFormat;
use tiller_core::TillerConfig;
use tiller_gateway::{app, AppState};
use tiller_memory::MemoryError;
use tiller_runtime::{LibraryScrapeSource, OllamaRuntime};
use tiller_store::Store;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tiller", about = "Self-hosted orchestration layer for a local LLM runtime")]
struct Args {
    /// Path to tiller.toml (TILLER_* env vars override file values).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = TillerConfig::load(args.config.as_deref())?;
    init_tracing(&config);

    let store = Store::open(&config.database.path)?;
    let runtime = Arc::new(OllamaRuntime::new(
        config.runtime.host.clone(),
        config.runtime.timeout_secs,
    ));
    let source = Arc::new(LibraryScrapeSource::new(None));

    let bind = config.server.host.clone();
    let port = config.server.port;
    let state = Arc::new(AppState::new(config, store, runtime, source)?);

    // The embedding dimension is a hard schema invariant: probe the
    // configured model now and refuse to start on a mismatch.
    verify_embedding_dimension(&state).await?;

    // Opportunistic catalog sync so the model list is warm; a dead runtime
    // only degrades it.
    {
        let state = state.clone();
        tokio::spawn(async move {
            match state.models.sync_with_runtime().await {
                Ok((_, Some(soft))) => warn!(error = %soft, "initial catalog sync degraded"),
                Ok(_) => info!("initial catalog sync complete"),
                Err(e) => warn!(error = %e, "initial catalog sync failed"),
            }
        });
    }

    let router = app::build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "tiller gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Probe the embedding model once. A vector of a different length than the
/// schema's frozen dimension is a configuration error and boot fails; an
/// unreachable runtime is tolerated only when the schema already carries a
/// dimension to hold the line on.
async fn verify_embedding_dimension(state: &AppState) -> anyhow::Result<()> {
    let schema_dim = state.store.embedding_dim()?;
    match state.memory.embedder().embed("dimension probe").await {
        Ok(vector) => {
            state.store.ensure_vec_tables(vector.len())?;
            info!(dim = vector.len(), "embedding dimension verified");
            Ok(())
        }
        Err(MemoryError::DimensionMismatch { expected, actual }) => Err(anyhow::anyhow!(
            "embedding model produces {actual}-dim vectors but the schema is fixed at {expected}; \
             refusing to start"
        )),
        Err(e) if schema_dim.is_some() => {
            warn!(error = %e, "embedding probe failed; continuing with schema dimension");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(
            "embedding runtime unreachable on first boot and no schema dimension exists yet: {e}"
        )),
    }
}

fn init_tracing(config: &TillerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
