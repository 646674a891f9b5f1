//! chatrelay-server - streaming chat relay
//!
//! Proxies a streamed generation from Ollama to HTTP clients as an event
//! stream, persists the full response to SQLite, and sends `complete`
//! once the saved record can be read back.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chatrelay_common::config::TomlConfig;
use chatrelay_common::time::millis_to_duration;
use chatrelay_server::pipeline::PipelineSettings;
use chatrelay_server::store::SqliteChatStore;
use chatrelay_server::upstream::OllamaClient;
use chatrelay_server::{build_router, db, AppState, ChatDefaults};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for chatrelay-server
///
/// Each flag overrides the matching TOML setting.
#[derive(Parser, Debug)]
#[command(name = "chatrelay-server")]
#[command(about = "Streaming chat relay with confirmed persistence")]
#[command(version)]
struct Args {
    /// TOML config file (default: platform config dir)
    #[arg(short, long, env = "CHATRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "CHATRELAY_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "CHATRELAY_PORT")]
    port: Option<u16>,

    /// SQLite database file, or `:memory:`
    #[arg(short, long, env = "CHATRELAY_DATABASE")]
    database: Option<PathBuf>,

    /// Ollama base URL
    #[arg(long, env = "CHATRELAY_UPSTREAM_URL")]
    upstream_url: Option<String>,

    /// Default model name
    #[arg(short, long, env = "CHATRELAY_MODEL")]
    model: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut TomlConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(database) = &self.database {
            config.database.path = Some(database.clone());
        }
        if let Some(url) = &self.upstream_url {
            config.upstream.base_url = url.clone();
        }
        if let Some(model) = &self.model {
            config.upstream.model = model.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "chatrelay_server={level},chatrelay_common={level},tower_http={level}",
                    level = config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting chatrelay-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let db_path = config.database.resolved_path();
    info!("Database path: {}", db_path.display());
    let pool = match db::init_database_pool(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };
    let store = Arc::new(SqliteChatStore::new(pool));

    let source = OllamaClient::new(
        config.upstream.base_url.clone(),
        Duration::from_secs(config.upstream.connect_timeout_secs),
    )
    .context("Failed to build upstream client")?;
    info!(
        "Upstream: {} (model {})",
        source.generate_url(),
        config.upstream.model
    );

    let settings = PipelineSettings {
        poll_policy: config.persistence.poll_policy()?,
        persist_warmup: millis_to_duration(config.persistence.warmup_ms),
    };
    if !settings.persist_warmup.is_zero() {
        warn!(
            "Persister warmup of {} ms delays every save",
            config.persistence.warmup_ms
        );
    }

    let state = AppState::new(
        store,
        Arc::new(source),
        settings,
        ChatDefaults {
            model: config.upstream.model.clone(),
            prompt: config.upstream.default_prompt.clone(),
        },
    );
    let app = build_router(state);

    let listen = format!("{}:{}", config.server.host, config.server.port);
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("Invalid listen address {}", listen))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("chatrelay-server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
