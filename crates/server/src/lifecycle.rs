//! Process lifecycle: restore, serve, snapshot on a timer, snapshot and drain
//! on shutdown.
//!
//! ```text
//! Starting ──restore ok──▶ Running ──signal──▶ ShuttingDown ──drained/grace──▶ Stopped
//!     └──restore failed──▶ (error, nothing bound)
//! ```

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use ytdlp_webui_core::{Registry, RegistryError};

use crate::config::Config;
use crate::metrics::record_persist;
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to restore registry: {0}")]
    Restore(#[from] RegistryError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Drives the server through its lifecycle.
pub struct Lifecycle;

impl Lifecycle {
    /// Restore, bind and serve until SIGINT, SIGTERM or SIGQUIT.
    pub async fn run(config: Config) -> Result<(), LifecycleError> {
        Self::run_until(config, shutdown_signal()).await
    }

    /// Same as [`Lifecycle::run`] with a caller-supplied shutdown trigger.
    pub async fn run_until<F>(config: Config, shutdown: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (listener, state) = Self::bind(&config).await?;
        Self::serve(listener, state, shutdown).await
    }

    /// Restore the registry, then bind the listener.
    ///
    /// Nothing is bound when restore fails.
    pub async fn bind(config: &Config) -> Result<(TcpListener, Arc<AppState>), LifecycleError> {
        let registry = Arc::new(Registry::new(config.snapshot_path()));
        registry.restore()?;

        let addr = config.addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| LifecycleError::Bind { addr, source })?;

        let state = AppState::new(config, registry, CancellationToken::new());
        Ok((listener, state))
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// On shutdown the registry is persisted once, new connections are
    /// refused, and open ones get `state.shutdown_grace` to finish.
    pub async fn serve<F>(
        listener: TcpListener,
        state: Arc<AppState>,
        shutdown: F,
    ) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = state.shutdown.clone();
        let registry = Arc::clone(&state.registry);
        let grace = state.shutdown_grace;

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "listening");
        }

        let persister = tokio::spawn(autopersist(
            Arc::clone(&registry),
            state.persist_interval,
            token.clone(),
        ));

        // Final snapshot first, then stop accepting.
        let trigger = {
            let token = token.clone();
            let registry = Arc::clone(&registry);
            async move {
                tokio::select! {
                    _ = shutdown => {
                        info!("shutting down");
                        persist_now(&registry, "shutdown").await;
                        token.cancel();
                    }
                    // Cancelled from elsewhere (e.g. the server failed)
                    _ = token.cancelled() => {}
                }
            }
        };
        tokio::spawn(trigger);

        let app = crate::create_app(Arc::clone(&state));
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(token.clone().cancelled_owned())
            .into_future();

        let (result, expired) = tokio::select! {
            result = server => (result.map_err(LifecycleError::Serve), false),
            _ = async {
                token.cancelled().await;
                tokio::time::sleep(grace).await;
            } => {
                warn!(
                    grace_secs = grace.as_secs_f64(),
                    open = state.connections.open(),
                    "grace period elapsed, closing remaining connections"
                );
                (Ok(()), true)
            }
        };

        token.cancel();
        // Stream connections still inside a call after axum's drain get one
        // more grace period, then are dropped.
        let remaining = if expired { Duration::ZERO } else { grace };
        let forced = state.connections.close_within(remaining).await;
        if forced > 0 {
            warn!(forced, "stream connections force-closed");
        }
        if let Err(e) = persister.await {
            error!(error = %e, "auto-persist task panicked");
        }
        info!(persists = registry.persist_count(), "server stopped");
        result
    }
}

/// Persist on a fixed period until `token` fires. The first tick is immediate.
async fn autopersist(registry: Arc<Registry>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                persist_now(&registry, "timer").await;
            }
        }
    }
}

/// Persist on the blocking pool. Failures are logged, never raised.
pub async fn persist_now(registry: &Arc<Registry>, trigger: &'static str) -> bool {
    let start = Instant::now();
    let registry = Arc::clone(registry);
    let result = tokio::task::spawn_blocking(move || registry.persist()).await;
    let elapsed = start.elapsed();

    match result {
        Ok(Ok(jobs)) => {
            info!(
                trigger,
                jobs,
                duration_ms = elapsed.as_millis() as u64,
                "registry persisted"
            );
            record_persist(trigger, true, elapsed);
            true
        }
        Ok(Err(e)) => {
            warn!(trigger, error = %e, "registry persist failed");
            record_persist(trigger, false, elapsed);
            false
        }
        Err(e) => {
            error!(trigger, error = %e, "registry persist task panicked");
            record_persist(trigger, false, elapsed);
            false
        }
    }
}

/// Resolves on SIGINT, SIGTERM or SIGQUIT.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let handlers = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    );
    let (mut sigint, mut sigterm, mut sigquit) = match handlers {
        (Ok(int), Ok(term), Ok(quit)) => (int, term, quit),
        (int, term, quit) => {
            let e = [int.err(), term.err(), quit.err()].into_iter().flatten().next();
            warn!(error = ?e, "Failed to register signal handlers, falling back to Ctrl+C");
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigquit.recv() => info!("Received SIGQUIT"),
    }
}

/// Fallback for non-Unix systems
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            // Without a signal source the server runs until killed
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use ytdlp_webui_core::JobRecord;

    #[tokio::test]
    async fn test_bind_fails_on_corrupt_snapshot() {
        let dir = TempDir::new().unwrap();
        let config = Config::for_dir(dir.path());
        std::fs::write(config.snapshot_path(), b"{ not json").unwrap();

        let err = Lifecycle::bind(&config).await.err().unwrap();
        assert!(matches!(err, LifecycleError::Restore(ref e) if e.is_corrupt()));
    }

    #[tokio::test]
    async fn test_persist_now_writes_snapshot() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new(dir.path().join("session.json")));
        registry.put(JobRecord::new("https://example.com/v", vec![]));

        assert!(persist_now(&registry, "timer").await);
        assert!(dir.path().join("session.json").exists());
        assert_eq!(registry.persist_count(), 1);
    }

    #[tokio::test]
    async fn test_persist_now_reports_failure() {
        let dir = TempDir::new().unwrap();
        // Parent of the snapshot is a file, so the write cannot succeed
        std::fs::write(dir.path().join("blocker"), b"").unwrap();
        let registry = Arc::new(Registry::new(dir.path().join("blocker").join("session.json")));

        assert!(!persist_now(&registry, "timer").await);
        assert_eq!(registry.persist_count(), 0);
    }

    #[tokio::test]
    async fn test_autopersist_ticks_until_cancelled() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new(dir.path().join("session.json")));
        let token = CancellationToken::new();

        let task = tokio::spawn(autopersist(
            Arc::clone(&registry),
            Duration::from_millis(20),
            token.clone(),
        ));

        // First tick is immediate, then one per period
        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();
        task.await.unwrap();

        let count = registry.persist_count();
        assert!(count >= 2, "expected several timer persists, got {count}");
        assert!(dir.path().join("session.json").exists());

        // Nothing runs after cancellation
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(registry.persist_count(), count);
    }
}
