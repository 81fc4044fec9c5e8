//! vr-server: HTTP media endpoints and stream management API.
//!
//! This crate ties the vr-* crates together into a running server:
//!
//! - Axum router serving media files by logical name (range, loop or MJPEG)
//! - Management endpoints for the transcoder supervisor and the RTSP relay
//! - Startup launch of enabled streams and the liveness monitor
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use vr_av::LivenessMonitor;
use vr_core::config::Config;

use crate::context::AppContext;

/// Start the vidrelay server.
///
/// Builds the [`AppContext`], launches enabled streams in the background,
/// spawns the liveness monitor and serves HTTP until a shutdown signal is
/// received. On the way out pending launches are abandoned and every
/// transcoder is stopped; a relay we launched is left running.
pub async fn start(config: Config) -> vr_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let ctx = AppContext::from_config(config.clone());

    for info in ctx.tools.check_all().await {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let cancel = ctx.shutdown.clone();

    let mut startup_launch = None;
    if config.transcoder.autostart {
        let supervisor = Arc::clone(&ctx.supervisor);
        let (task, handle) = ctx.tasks.spawn_tracked("startup_launch", async move {
            Ok::<_, vr_core::Error>(supervisor.start_all().await)
        });
        tracing::info!(task = %task, "Launching enabled streams in the background");
        startup_launch = Some(handle);
    }

    let monitor = LivenessMonitor::new(
        Arc::clone(&ctx.supervisor),
        Arc::clone(&ctx.tasks),
        &config.transcoder,
    );
    let monitor_handle = monitor.spawn(cancel.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| vr_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let app = router::build_router(ctx.clone());

    tracing::info!(mode = ?config.server.stream_mode, "Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| vr_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // Launches still in flight see the cancelled token and give up before
    // the final stop pass.
    cancel.cancel();
    if let Some(handle) = monitor_handle {
        let _ = handle.await;
    }
    if let Some(handle) = startup_launch {
        let _ = handle.await;
    }

    let stopped = ctx.supervisor.stop_all().await;
    tracing::info!(stopped = stopped.len(), "Transcoders stopped");

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or for `cancel` to fire.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
