// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{
    error::Error,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use whatsapp_service_auth::{
    api::router, config::Config, state::AppState, sweeper::MaintenanceSweeper,
    telemetry::init_tracing,
};

/// Time allowed for in-flight requests after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let report = config.validate();
    for warning in &report.warnings {
        warn!(warning = %warning, "Configuration warning");
    }
    if !report.valid {
        for issue in &report.issues {
            error!(issue = %issue, "Configuration issue");
        }
        return Err("invalid configuration, refusing to start".into());
    }

    let state = AppState::from_config(&config);

    let shutdown = CancellationToken::new();
    let sweeper = MaintenanceSweeper::new(
        state.cache(),
        vec![state.ip_limiter.clone(), state.phone_limiter.clone()],
    )
    .with_interval(config.cache.sweep_interval);
    let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

    let app = router(state)?.into_make_service_with_connect_info::<SocketAddr>();

    let ip: IpAddr = config.host.parse()?;
    let addr = SocketAddr::new(ip, config.port);
    let handle = Handle::new();

    match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => {
            // Install the ring crypto provider for rustls (must be done before any TLS operations)
            rustls::crypto::ring::default_provider()
                .install_default()
                .map_err(|_| "failed to install rustls crypto provider")?;
            let tls_config = RustlsConfig::from_pem_file(cert, key).await?;

            let server = axum_server::bind_rustls(addr, tls_config).handle(handle.clone());
            tokio::spawn(shutdown_on_signal(shutdown.clone(), move || {
                handle.graceful_shutdown(Some(SHUTDOWN_GRACE))
            }));
            info!(%addr, "WhatsApp service auth listening on https (docs at /docs)");
            server.serve(app).await?;
        }
        _ => {
            let server = axum_server::bind(addr).handle(handle.clone());
            tokio::spawn(shutdown_on_signal(shutdown.clone(), move || {
                handle.graceful_shutdown(Some(SHUTDOWN_GRACE))
            }));
            info!(%addr, "WhatsApp service auth listening on http (docs at /docs)");
            server.serve(app).await?;
        }
    }

    shutdown.cancel();
    if let Err(e) = sweeper_task.await {
        warn!(error = %e, "Maintenance sweeper task failed");
    }
    info!("Server stopped");
    Ok(())
}

/// Wait for SIGINT/SIGTERM, stop background work, then drain connections.
async fn shutdown_on_signal(shutdown: CancellationToken, drain: impl FnOnce() + Send + 'static) {
    wait_for_signal().await;
    info!(
        grace_secs = SHUTDOWN_GRACE.as_secs(),
        "Shutdown signal received, draining connections"
    );
    shutdown.cancel();
    drain();
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to listen for SIGTERM");
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
}
