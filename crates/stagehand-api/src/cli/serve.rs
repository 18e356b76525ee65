//! `stagehand serve` - run the REST/SSE API server.
//!
//! Startup: restore the registry snapshot, start the scheduler thread and the
//! stream sweeper, then serve until Ctrl+C / SIGTERM. Shutdown runs in
//! reverse and persists the registry last, once no workflow can change state.

use console::style;
use tokio_util::sync::CancellationToken;

use crate::http;
use crate::state::AppState;

pub async fn serve(state: AppState, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);

    let restored = state.restore_snapshot().await;
    if restored > 0 {
        println!(
            "  {} Restored {} workflow(s) from snapshot",
            style("↺").bold(),
            style(restored).bold()
        );
    }

    let gateway = state.gateway.clone();
    // start() and stop() wait on the scheduler thread.
    let executor = gateway.executor().clone();
    tokio::task::spawn_blocking(move || executor.start()).await??;

    let sweeper_shutdown = CancellationToken::new();
    let streams = gateway.streams();
    let sweeper = streams.spawn_sweeper(streams.sweep_interval(), sweeper_shutdown.clone());

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "api server listening");

    println!(
        "  {} Stagehand API listening on {}",
        style("⚡").bold(),
        style(format!("http://{addr}/api/v1")).cyan()
    );
    println!("  {}", style("Press Ctrl+C to stop").dim());

    let router = http::router::build_router(state.clone());
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper_shutdown.cancel();
    let _ = sweeper.await;
    let executor = gateway.executor().clone();
    tokio::task::spawn_blocking(move || executor.stop()).await?;

    if let Err(e) = state.save_snapshot().await {
        tracing::error!(error = %e, "failed to save workflow snapshot");
    }

    println!("\n  Server stopped.");
    served.map_err(Into::into)
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
