use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lcp_server::config::Config;
use lcp_server::license::factory::LicenseFactory;
use lcp_server::license::sign::SigningCert;
use lcp_server::license::status::StatusController;
use lcp_server::store::Store;
use lcp_server::web::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Use JSON logs in production (LCPSERVER_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("LCPSERVER_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("lcp_server={}", config.log_level).parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let database = config.database_path()?;
    let store = Arc::new(Store::open(&database).with_context(|| format!("opening {database}"))?);
    tracing::info!(%database, "store ready");

    let cert = Arc::new(
        SigningCert::load(&config.certificate, &config.private_key)
            .context("loading signing certificate")?,
    );
    tracing::info!(algorithm = cert.algorithm(), "signing certificate loaded");

    let state = Arc::new(AppState {
        factory: LicenseFactory::new(config.factory_config(), cert),
        status: StatusController::new(store.clone(), config.status_config()),
        store,
        config: config.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, public_base_url = %config.public_base_url, "lcp-server listening");

    axum::serve(listener, web::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolve on SIGINT/SIGTERM. In-flight handlers then get a 10-second drain
/// window before the process exits regardless.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining for up to 10s");
    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        tracing::warn!("grace period elapsed, forcing exit");
        std::process::exit(0);
    });
}
