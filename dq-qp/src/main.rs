//! dq-qp - question processing service
//!
//! Runs batch AI operations over the question bank, keeps explanations
//! consistent with canonical answers and serves the review queue to the
//! operator console over HTTP + SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dq_common::config::{
    default_config_path, load_toml_config, prepare_database_path, resolve_root_folder,
    TomlConfig, ROOT_FOLDER_ENV,
};
use dq_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dq_qp::ai::{AiCollaborator, AnswerCache, CachedAiCollaborator, HttpAiClient, SystemClock};
use dq_qp::config::resolve_ai_endpoint;
use dq_qp::AppState;

/// Command-line arguments for dq-qp
#[derive(Parser, Debug)]
#[command(name = "dq-qp")]
#[command(about = "Question processing service for DriveQuiz")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5740", env = "DQ_QP_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "DQ_QP_BIND")]
    bind: std::net::IpAddr,

    /// Root folder holding the database
    #[arg(short, long, env = "DQ_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file (defaults to ~/.config/drivequiz/dq-qp.toml)
    #[arg(short, long, env = "DQ_QP_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| default_config_path("dq-qp"));
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TomlConfig::default(),
    };

    let default_filter = format!("dq_qp={},tower_http=info", toml_config.logging.level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting dq-qp (question processing) service");
    info!(
        "Version: {} ({}, {} build, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("DQ_GIT_HASH"),
        env!("DQ_BUILD_PROFILE"),
        env!("DQ_BUILD_TIMESTAMP")
    );

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV, Some(&toml_config));
    let db_path = prepare_database_path(&root_folder)?;
    info!("Database: {}", db_path.display());

    let db_pool = dq_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let stale = dq_qp::db::tasks::cleanup_stale_tasks(&db_pool).await?;
    if stale > 0 {
        warn!(stale, "Cancelled tasks left running by a previous process");
    }

    let ai = build_ai_collaborator(&db_pool, &toml_config).await?;

    let event_bus = EventBus::new(1000);
    let state = AppState::with_ai(
        db_pool,
        event_bus,
        ai,
        toml_config.orchestrator.default_batch_size,
    );
    let app = dq_qp::build_router(state);

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// HTTP client for the resolved endpoint, behind the answer cache when enabled
async fn build_ai_collaborator(
    db: &sqlx::SqlitePool,
    toml_config: &TomlConfig,
) -> Result<Option<Arc<dyn AiCollaborator>>> {
    let Some(endpoint) = resolve_ai_endpoint(db, toml_config).await? else {
        return Ok(None);
    };

    let client = HttpAiClient::new(
        &endpoint.base_url,
        endpoint.token.unwrap_or_default(),
        endpoint.timeout,
    )
    .context("Failed to build AI client")?;
    info!(endpoint = client.endpoint(), timeout_ms = endpoint.timeout.as_millis() as u64, "AI service configured");

    let client: Arc<dyn AiCollaborator> = Arc::new(client);
    let cache_config = &toml_config.answer_cache;
    if !cache_config.enabled || cache_config.capacity == 0 {
        return Ok(Some(client));
    }

    let cache = Arc::new(AnswerCache::new(
        cache_config.capacity,
        Duration::from_secs(cache_config.ttl_seconds),
        Arc::new(SystemClock),
    ));
    info!(
        capacity = cache_config.capacity,
        ttl_seconds = cache_config.ttl_seconds,
        "AI answer cache enabled"
    );
    Ok(Some(Arc::new(CachedAiCollaborator::new(client, cache))))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
