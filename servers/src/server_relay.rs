//! # Relay Server
//!
//! Standalone binary for the collaborative document relay. Every WebSocket
//! client connected to `/ws` receives the current document on connect and
//! every later update from the other clients.
//!
//! ## Startup
//! 1.  Load `.env`, then resolve settings (defaults, `server_relay.conf`,
//!     environment, command line).
//! 2.  Install the console and file loggers.
//! 3.  Spawn the lifecycle coordinator task.
//! 4.  Serve plain HTTP/WS, or HTTPS/WSS when both TLS paths are configured.
//! 5.  On Ctrl-C or SIGTERM, stop accepting work, close every client and
//!     wait for the coordinator to finish.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

mod relay_logic;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use lib_relay::core::{spawn, LifecycleCoordinator};
use lib_relay::loggers::{parse_level, setup_logging};
use lib_relay::transport::{router, serve};

use relay_logic::config::{self, TlsPaths};

const APP_NAME: &str = "server_relay";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::load_config()?;

    let log_file = setup_logging(APP_NAME, Some(&settings.log_dir), parse_level(&settings.log_level))?;
    log::info!("Relay booting on {} (log file: {:?})", settings.addr, log_file);

    let shutdown = CancellationToken::new();
    let (coordinator, coordinator_task) = spawn(LifecycleCoordinator::new(), shutdown.clone());
    let app = router(coordinator, settings.static_dir.clone());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        log::warn!("Shutdown signal received. Closing server gracefully...");
        signal_token.cancel();
    });

    let served = match &settings.tls {
        Some(tls) => serve_tls(settings.addr, tls, app, shutdown.clone()).await,
        None => serve_plain(settings.addr, app, shutdown.clone()).await,
    };

    // The listener may also stop on its own (bind or TLS failure).
    shutdown.cancel();
    let coordinator = coordinator_task.await.context("Coordinator task panicked")?;
    log::info!(
        "Relay stopped. Final document is {} bytes.",
        coordinator.document().len()
    );

    served
}

async fn serve_plain(addr: SocketAddr, app: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    log::info!("Relay live at ws://{}/ws", addr);
    serve(listener, app, shutdown).await?;
    Ok(())
}

async fn serve_tls(addr: SocketAddr, tls: &TlsPaths, app: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    // Rustls 0.23+ needs a process-wide crypto provider.
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    log::info!("Loading TLS certs from: {}", tls.cert.display());
    let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
        .await
        .map_err(|e| anyhow::anyhow!("TLS Configuration Error: {}", e))?;

    let handle = axum_server::Handle::new();
    let signal_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        signal_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    log::info!("Relay live at wss://{}/ws", addr);
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    // On non-UNIX systems, `terminate` never completes.
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
