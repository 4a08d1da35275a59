use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use dockd::config::Config;
use dockd::Service;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dockd=info"))
        )
        .init();

    tracing::info!("Starting dockd");

    // Config file is optional; built-in defaults otherwise
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let config = Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path))?;
            tracing::info!("Loaded config from {}", path);
            config
        }
        None => {
            tracing::info!("No config file given, using defaults");
            Config::default()
        }
    };

    let cancel = CancellationToken::new();
    let service = Service::start(&config, cancel.clone())?;
    let app = service.router();

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.listen))?;

    tracing::info!("Listening on {}", config.server.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    // Closing every connection lets the websocket handlers finish, which the
    // graceful shutdown waits on
    service.shutdown().await;
    let _ = server_handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
