//! mapwin - sky-map window server
//!
//! Serves the window API over HTTP and lets map frontends attach over
//! WebSocket. Settings come from an optional TOML file; command-line flags
//! override it.

use clap::Parser as ClapParser;
use mapwin::{
    api,
    config::{ConfigError, ServerConfig},
    session::{SessionEvent, SessionRegistry},
    transport::FrontendHub,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// mapwin - sky-map window server
#[derive(ClapParser, Debug)]
#[command(name = "mapwin", version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "MAPWIN_CONFIG", default_value = "mapwin.toml")]
    config: PathBuf,

    /// Address to bind the HTTP/WebSocket server (overrides the config file)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Origin of the map frontend, allowed by CORS (overrides the config file)
    #[arg(long)]
    frontend_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum MapwinError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), MapwinError> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = match ServerConfig::load(&cli.config)? {
        Some(config) => {
            tracing::info!(path = %cli.config.display(), "loaded config");
            config
        }
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if cli.frontend_url.is_some() {
        config.frontend_url = cli.frontend_url;
    }

    run_server(config).await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "mapwin=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_server(config: ServerConfig) -> Result<(), MapwinError> {
    let hub = FrontendHub::new();
    let registry = SessionRegistry::new(Arc::new(hub.clone()))
        .with_max_sessions(config.max_sessions)
        .with_log_capacity(config.log_capacity);

    let mut events = registry.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Created { id }) => tracing::debug!(session = %id, "window opened"),
                Ok(SessionEvent::Closed { id }) => tracing::debug!(session = %id, "window gone"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "session event monitor lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let bind = config.bind;
    let state = api::AppState {
        registry,
        hub,
        config: Arc::new(config),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "HTTP/WS server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(?e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
