//! request-guard demo service.
//!
//! Serves a small guarded application: form login issues a bearer token,
//! `/hello` and `/admin` require authorities, `/limit` is rate limited.
//!
//! Usage: `request-guard [config.toml]`

use std::path::PathBuf;

use tokio::net::TcpListener;

use request_guard::config::{load_config, GuardConfig};
use request_guard::http::GuardServer;
use request_guard::lifecycle::{shutdown_signal, Shutdown};
use request_guard::observability::{logging, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init_tracing(&config.observability.log_level);
    tracing::info!("request-guard v{} starting", env!("CARGO_PKG_VERSION"));

    match &config_path {
        Some(path) => tracing::info!(path = %path.display(), "Configuration loaded"),
        None => tracing::warn!("No configuration file given; using defaults (no users, no limiter rules)"),
    }
    tracing::info!(
        bind_address = %config.server.bind_address,
        request_timeout_secs = config.server.request_timeout_secs,
        users = config.security.users.len(),
        "Configuration summary"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.trigger();
        });
    }

    let server = GuardServer::new(config)?;
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
