//! Keyledger API Server
//!
//! HTTP interface to the key inventory. Runs the expiry sweeper in-process
//! unless KEYLEDGER_SWEEP_ENABLED=false. See `config` for the environment
//! variables.

use anyhow::Context;
use keyledger_api::{build_state, init_tracing, router, Config};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let state = build_state(&config)?;
    let sweeper = if config.sweep_enabled {
        Some(state.sweeper.clone().spawn())
    } else {
        tracing::info!("in-process sweeper disabled");
        None
    };

    let app = router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(port = config.port, "starting Keyledger API Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  API: http://{}/api/", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
    tracing::info!("shutdown signal received");
}
