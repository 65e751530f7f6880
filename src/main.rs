use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leadgate::cli::{log_filter_directive, run_command, Cli, Commands};
use leadgate::config::{Config, RateLimitBackend};
use leadgate::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Offline subcommands don't need logging or the database
    if !matches!(cli.command, None | Some(Commands::Serve)) {
        return run_command(&cli).await;
    }

    let config = Config::load(&cli.config)?;

    // Initialize logging
    let rust_log = std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV).ok();
    let directive = log_filter_directive(
        cli.log_level.as_deref(),
        rust_log.as_deref(),
        &config.logging.level,
    );
    let filter = tracing_subscriber::EnvFilter::new(directive);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Leadgate v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db = leadgate::db::init(&config).await?;

    if config.auth.legacy_secret().is_none() {
        tracing::warn!("auth.server_secret is not set; legacy password digests will not verify");
    }

    if config.rate_limit.backend == RateLimitBackend::Memory {
        tracing::warn!(
            "Rate limiting uses process memory; limits are not shared between instances"
        );
    }

    let state = Arc::new(AppState::new(config.clone(), db));

    leadgate::api::auth::ensure_admin_user(&state).await?;

    // Also swept on every successful login
    match state.sessions.purge_expired().await {
        Ok(removed) => tracing::info!(removed, "Purged expired sessions"),
        Err(e) => tracing::warn!(error = %e, "Session purge failed"),
    }

    let app = leadgate::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    // Peer addresses feed the rate limiter when no proxy header is present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
