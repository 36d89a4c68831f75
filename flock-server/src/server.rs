//! HTTP server lifecycle

use super::api::build_router;
use super::state::AppState;
use anyhow::Result;
use flock_core::store::Store;
use flock_core::{Config, TimelineService};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

pub struct FlockServer<S> {
    state: Arc<AppState<S>>,
    addr: SocketAddr,
    shutdown_timeout: Duration,
}

impl<S: Store> FlockServer<S> {
    pub fn new(service: TimelineService<S>, config: &Config) -> Self {
        Self {
            state: Arc::new(AppState::new(service, config.timeline.page_size)),
            addr: config.server.bind_address,
            shutdown_timeout: config.server.shutdown_timeout,
        }
    }

    /// Serve until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` completes, then give in-flight requests up to
    /// the configured shutdown timeout to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = build_router(self.state);
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %listener.local_addr()?, "Flock listening");

        let stop = Arc::new(Notify::new());
        let drain = Arc::clone(&stop);
        let mut server = tokio::spawn(
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { drain.notified().await })
                .into_future(),
        );

        tokio::select! {
            finished = &mut server => {
                finished??;
                return Ok(());
            }
            _ = shutdown => {}
        }

        info!(timeout = ?self.shutdown_timeout, "Draining in-flight requests");
        stop.notify_one();
        match tokio::time::timeout(self.shutdown_timeout, &mut server).await {
            Ok(finished) => finished??,
            Err(_) => {
                warn!("Shutdown timeout elapsed, dropping remaining connections");
                server.abort();
            }
        }

        info!("Server shut down");
        Ok(())
    }
}

/// Completes on Ctrl-C, or on SIGTERM where available.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
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
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
