//! Tunnel relay binary

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use tunnel_relay::config;
use tunnel_relay::core::{DohResolver, FallbackTarget, Server, SessionManager};
use tunnel_relay::logger::{self, log};
use tunnel_relay::server_runner;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = config::CliArgs::parse_args();
    cli.validate()?;

    // Initialize logger
    logger::init_logger(&cli.log_mode);

    log::info!(
        host = %cli.host,
        port = cli.port,
        dns_providers = cli.dns_providers.len(),
        "Starting tunnel relay"
    );

    let conn_config = config::ConnConfig::from_cli(&cli);
    let server_config = config::ServerConfig::from_cli(&cli);

    let resolver = Arc::new(DohResolver::new(
        cli.dns_providers.clone(),
        conn_config.dns_timeout,
    )?);
    log::debug!(providers = ?resolver.providers(), "DNS-over-HTTPS resolver ready");
    let sessions = SessionManager::new();

    // Build server using the builder pattern
    let server = Arc::new(
        Server::builder()
            .resolver(resolver)
            .sessions(sessions.clone())
            .conn_config(conn_config)
            .fallback(cli.proxy_ip.as_deref().and_then(FallbackTarget::new))
            .build()?,
    );

    // Create cancellation token for graceful shutdown
    let shutdown = CancellationToken::new();
    let shutdown_trigger = shutdown.clone();

    // Setup shutdown handler
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT");
            let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM");

            tokio::select! {
                _ = sigint.recv() => {
                    log::info!("SIGINT received, shutting down...");
                }
                _ = sigterm.recv() => {
                    log::info!("SIGTERM received, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
            log::info!("Shutdown signal received...");
        }

        shutdown_trigger.cancel();
        let cancelled = sessions.cancel_all();
        log::info!(sessions = cancelled, "Live sessions cancelled");
        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
        std::process::exit(0);
    });

    // Run server
    server_runner::run_server(server, &server_config, shutdown).await
}
